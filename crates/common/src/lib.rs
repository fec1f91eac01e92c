//! Shared identifiers for the bookstore fulfillment system.

pub mod types;

pub use types::{
    BookId, City, ConsignmentEntryId, ConsignmentId, LedgerKey, OrderEntryId, OrderId,
    UnknownCity, WarehouseId,
};
