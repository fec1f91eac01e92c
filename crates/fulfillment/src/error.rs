//! Fulfillment error types.

use common::{ConsignmentEntryId, ConsignmentId, OrderEntryId, OrderId};
use domain::{ConsignmentError, OrderError, OrderStatus};
use inventory::InventoryError;
use thiserror::Error;

/// Errors that can occur while fulfilling an order.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Stock could not be reserved, released or consumed.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Order rule violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Consignment rule violated.
    #[error("Consignment error: {0}")]
    Consignment(#[from] ConsignmentError),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    #[error("Consignment not found: {0}")]
    ConsignmentNotFound(ConsignmentId),

    #[error("Consignment entry not found: {0}")]
    ConsignmentEntryNotFound(ConsignmentEntryId),

    /// An allocation refers to an entry the order does not have.
    #[error("Order {order_id} has no entry {entry_id}")]
    UnknownOrderEntry {
        order_id: OrderId,
        entry_id: OrderEntryId,
    },

    /// The order is not in a status that allows the operation.
    #[error("Cannot {action} order {order_id} in {status} state")]
    InvalidOrderState {
        order_id: OrderId,
        status: OrderStatus,
        action: &'static str,
    },

    /// Some units already shipped; only a manual return flow can undo them.
    #[error("Order {order_id} is partially shipped and cannot be cancelled")]
    PartialShipmentConflict { order_id: OrderId },

    /// Returning a consignment goes through order cancellation.
    #[error("Consignment {consignment_id} can only be returned by cancelling its order")]
    ReturnRequiresCancellation { consignment_id: ConsignmentId },

    /// Confirmation failed after stock was reserved, and releasing that
    /// stock failed too. The reservation is stranded until an operator
    /// releases it.
    #[error("{cause}; releasing the reservation of order {order_id} also failed: {release}")]
    CompensationFailed {
        order_id: OrderId,
        cause: Box<FulfillmentError>,
        release: InventoryError,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored aggregate could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FulfillmentError {
    /// Returns true for transient faults the caller should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FulfillmentError::Inventory(e) if e.is_retryable())
    }

    /// Returns true for expected outcomes that are reported, not alerted on.
    pub fn is_business_outcome(&self) -> bool {
        match self {
            FulfillmentError::Inventory(e) => e.is_business_outcome(),
            FulfillmentError::Order(OrderError::InvalidStateTransition { .. }) => true,
            FulfillmentError::Consignment(ConsignmentError::InvalidTransition { .. }) => true,
            FulfillmentError::InvalidOrderState { .. }
            | FulfillmentError::PartialShipmentConflict { .. } => true,
            _ => false,
        }
    }

    /// Short machine-readable name, used in replies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::Inventory(e) => match e {
                InventoryError::InsufficientStock { .. } => "insufficient_stock",
                InventoryError::InvariantViolation { .. } => "invariant_violation",
                InventoryError::InvalidQuantity { .. } => "invalid_quantity",
                InventoryError::LockTimeout { .. } => "lock_timeout",
                InventoryError::NoWarehouseForCity { .. } => "no_warehouse_for_city",
                InventoryError::StockNotTracked { .. } => "stock_not_tracked",
                InventoryError::UnknownWarehouse(_) => "unknown_warehouse",
                InventoryError::MissingCity { .. } => "missing_city",
                InventoryError::DuplicateWarehouse(_) => "duplicate_warehouse",
                InventoryError::Database(_) | InventoryError::Migration(_) => "database",
            },
            FulfillmentError::Order(_) => "invalid_order",
            FulfillmentError::Consignment(ConsignmentError::InvalidTransition { .. }) => {
                "invalid_transition"
            }
            FulfillmentError::Consignment(_) => "invalid_shipment",
            FulfillmentError::OrderNotFound(_) => "order_not_found",
            FulfillmentError::DuplicateOrder(_) => "duplicate_order",
            FulfillmentError::ConsignmentNotFound(_) => "consignment_not_found",
            FulfillmentError::ConsignmentEntryNotFound(_) => "consignment_entry_not_found",
            FulfillmentError::UnknownOrderEntry { .. } => "unknown_order_entry",
            FulfillmentError::InvalidOrderState { .. } => "invalid_order_state",
            FulfillmentError::PartialShipmentConflict { .. } => "partial_shipment_conflict",
            FulfillmentError::ReturnRequiresCancellation { .. } => "return_requires_cancellation",
            FulfillmentError::CompensationFailed { .. } => "compensation_failed",
            FulfillmentError::Database(_) => "database",
            FulfillmentError::Serialization(_) => "serialization",
        }
    }
}

/// Result type for fulfillment operations.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use common::{BookId, LedgerKey, WarehouseId};
    use domain::ConsignmentStatus;

    use super::*;

    #[test]
    fn test_lock_timeout_is_only_retryable_error() {
        let timeout: FulfillmentError = InventoryError::LockTimeout { key: None }.into();
        assert!(timeout.is_retryable());
        assert!(!timeout.is_business_outcome());
        assert_eq!(timeout.kind(), "lock_timeout");

        let conflict = FulfillmentError::PartialShipmentConflict {
            order_id: OrderId::new(),
        };
        assert!(!conflict.is_retryable());
        assert!(conflict.is_business_outcome());
    }

    #[test]
    fn test_business_outcomes() {
        let short: FulfillmentError = InventoryError::InsufficientStock {
            key: LedgerKey::new(BookId::new(), WarehouseId::new()),
            requested: 1,
            available: 0,
            entry_id: None,
        }
        .into();
        assert!(short.is_business_outcome());
        assert_eq!(short.kind(), "insufficient_stock");

        let transition: FulfillmentError = ConsignmentError::InvalidTransition {
            from: ConsignmentStatus::Pending,
            to: ConsignmentStatus::Delivered,
        }
        .into();
        assert!(transition.is_business_outcome());
        assert_eq!(transition.kind(), "invalid_transition");

        let stranded = FulfillmentError::CompensationFailed {
            order_id: OrderId::new(),
            cause: Box::new(FulfillmentError::OrderNotFound(OrderId::new())),
            release: InventoryError::LockTimeout { key: None },
        };
        assert!(!stranded.is_retryable());
        assert!(!stranded.is_business_outcome());
        assert_eq!(stranded.kind(), "compensation_failed");

        let missing = FulfillmentError::OrderNotFound(OrderId::new());
        assert!(!missing.is_business_outcome());
        assert!(!missing.is_retryable());
    }
}
