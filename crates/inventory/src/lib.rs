//! Stock ledger, warehouse selection and reservation.
//!
//! The ledger keeps one counter pair (on hand, reserved) per book and
//! warehouse and is the unit of concurrency control: every mutation locks the
//! rows it touches, in ascending key order, for the whole read-modify-write.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod reservation;
pub mod stock;
pub mod warehouse;

pub use error::{InventoryError, Result};
pub use ledger::{LedgerConfig, StockLedger};
pub use memory::InMemoryStockLedger;
pub use postgres::{PostgresStockLedger, PostgresWarehouseDirectory};
pub use reservation::{Allocation, ReservationService};
pub use stock::{LedgerBatch, LedgerMutation, LedgerOp, ReorderPolicy, StockLevel};
pub use warehouse::{
    InMemoryWarehouseDirectory, LedgerWarehouseSelector, Warehouse, WarehouseContact,
    WarehouseDirectory, WarehouseSelector,
};
