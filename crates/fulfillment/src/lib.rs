//! Consignment planning and order fulfillment.
//!
//! [`OrderFulfillmentCoordinator`] drives an order through reservation,
//! planning, shipment and cancellation, keeping the stock ledger, the
//! consignments and the order status consistent with each other.

pub mod commands;
pub mod coordinator;
pub mod error;
pub mod events;
mod locks;
pub mod planner;
pub mod postgres;
pub mod store;

pub use commands::{FulfillmentCommand, FulfillmentReply};
pub use coordinator::OrderFulfillmentCoordinator;
pub use error::{FulfillmentError, Result};
pub use events::{EventSink, FulfillmentEvent, InMemoryEventSink, TracingEventSink};
pub use planner::ConsignmentPlanner;
pub use postgres::{PostgresConsignmentStore, PostgresOrderStore};
pub use store::{ConsignmentStore, InMemoryConsignmentStore, InMemoryOrderStore, OrderStore};
