//! Domain model for bookstore order fulfillment.
//!
//! This crate provides:
//! - `Order` with its line items and status state machine
//! - `Consignment` shipment batches with their shipping state machine
//! - value objects shared by the inventory and fulfillment crates

pub mod consignment;
pub mod order;

pub use consignment::{
    CarrierUpdate, Consignment, ConsignmentEntry, ConsignmentError, ConsignmentStatus,
};
pub use order::{ItemType, Money, Order, OrderEntry, OrderError, OrderStatus, ShippingAddress};
