//! Inventory error types.

use common::{BookId, City, LedgerKey, OrderEntryId, WarehouseId};
use thiserror::Error;

use crate::stock::LedgerOp;

/// Errors that can occur when reading or mutating stock.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Not enough unreserved stock. An expected business outcome.
    #[error(
        "Insufficient stock for {key}: requested {requested}, available {available}{}",
        entry_suffix(.entry_id)
    )]
    InsufficientStock {
        key: LedgerKey,
        requested: u32,
        available: u32,
        entry_id: Option<OrderEntryId>,
    },

    /// A mutation would break `0 <= reserved <= quantity`. Indicates a caller bug.
    #[error("Invariant violation on {key} during {operation}: {detail}")]
    InvariantViolation {
        key: LedgerKey,
        operation: LedgerOp,
        detail: String,
    },

    /// Ledger deltas must be positive.
    #[error("Invalid {operation} quantity for {key}: must be greater than 0")]
    InvalidQuantity { key: LedgerKey, operation: LedgerOp },

    /// The stock rows could not be locked in time. Transient; retry with backoff.
    #[error("Timed out acquiring stock lock{}", key_suffix(.key))]
    LockTimeout { key: Option<LedgerKey> },

    /// No warehouse serves the requested city.
    #[error("No warehouse registered for city {city}")]
    NoWarehouseForCity { city: City },

    /// The warehouse has never stocked the book.
    #[error("Book {book_id} is not stocked at warehouse {warehouse_id}")]
    StockNotTracked {
        book_id: BookId,
        warehouse_id: WarehouseId,
    },

    /// Stock was addressed to a warehouse that is not registered.
    #[error("Warehouse not registered: {0}")]
    UnknownWarehouse(WarehouseId),

    /// A physical entry arrived without a destination city.
    #[error("Physical order entry {entry_id} has no city")]
    MissingCity { entry_id: OrderEntryId },

    /// A warehouse with the same code or city is already registered.
    #[error("Warehouse conflicts with an existing registration: {0}")]
    DuplicateWarehouse(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

fn entry_suffix(entry_id: &Option<OrderEntryId>) -> String {
    entry_id
        .map(|id| format!(" (order entry {id})"))
        .unwrap_or_default()
}

fn key_suffix(key: &Option<LedgerKey>) -> String {
    key.map(|k| format!(" for {k}")).unwrap_or_default()
}

impl InventoryError {
    /// Returns true for transient faults the caller should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::LockTimeout { .. })
    }

    /// Returns true for outcomes that are part of normal operation.
    pub fn is_business_outcome(&self) -> bool {
        matches!(self, InventoryError::InsufficientStock { .. })
    }

    /// Returns true for errors that indicate a bug in a caller.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, InventoryError::InvariantViolation { .. })
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let key = LedgerKey::new(BookId::new(), WarehouseId::new());
        let timeout = InventoryError::LockTimeout { key: Some(key) };
        let short = InventoryError::InsufficientStock {
            key,
            requested: 2,
            available: 1,
            entry_id: None,
        };
        let bug = InventoryError::InvariantViolation {
            key,
            operation: LedgerOp::Release,
            detail: "release 3 exceeds reserved 1".to_string(),
        };

        assert!(timeout.is_retryable());
        assert!(!timeout.is_business_outcome());
        assert!(short.is_business_outcome());
        assert!(!short.is_retryable());
        assert!(bug.is_invariant_violation());
        assert!(!bug.is_retryable());
    }

    #[test]
    fn test_insufficient_stock_names_entry() {
        let key = LedgerKey::new(BookId::new(), WarehouseId::new());
        let entry_id = OrderEntryId::new();
        let err = InventoryError::InsufficientStock {
            key,
            requested: 5,
            available: 2,
            entry_id: Some(entry_id),
        };
        let message = err.to_string();
        assert!(message.contains("requested 5, available 2"));
        assert!(message.contains(&entry_id.to_string()));
    }
}
