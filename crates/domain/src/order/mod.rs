//! Order entity and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use state::OrderStatus;
pub use value_objects::{ItemType, Money, OrderEntry, ShippingAddress};

use common::OrderEntryId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// Order has no entries.
    #[error("Order has no entries")]
    NoEntries,

    /// Two entries share an id.
    #[error("Duplicate order entry: {entry_id}")]
    DuplicateEntry { entry_id: OrderEntryId },

    /// Invalid quantity.
    #[error("Invalid quantity {quantity} on entry {entry_id} (must be greater than 0)")]
    InvalidQuantity {
        entry_id: OrderEntryId,
        quantity: u32,
    },

    /// Invalid price.
    #[error("Invalid price {price} on entry {entry_id} (must not be negative)")]
    InvalidPrice { entry_id: OrderEntryId, price: i64 },

    /// A physical entry has no destination city.
    #[error("Physical entry {entry_id} has no city")]
    MissingCity { entry_id: OrderEntryId },

    /// A digital entry names a city.
    #[error("Digital entry {entry_id} must not have a city")]
    UnexpectedCity { entry_id: OrderEntryId },
}
