//! Consignments: shipment batches of an order.

mod aggregate;
mod state;

pub use aggregate::{Consignment, ConsignmentEntry};
pub use state::ConsignmentStatus;

use chrono::{DateTime, Utc};
use common::{ConsignmentEntryId, ConsignmentId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during consignment operations.
#[derive(Debug, Error)]
pub enum ConsignmentError {
    /// The status change is not an edge of the shipping graph.
    #[error("Invalid consignment transition: {from} -> {to}")]
    InvalidTransition {
        from: ConsignmentStatus,
        to: ConsignmentStatus,
    },

    /// The consignment cannot leave Pending while units are still unshipped.
    #[error("Consignment {consignment_id} still has unshipped units")]
    ShipmentIncomplete { consignment_id: ConsignmentId },

    /// Shipments are only recorded while the consignment is at the warehouse.
    #[error("Consignment {consignment_id} is {status} and no longer accepts shipments")]
    NotAcceptingShipments {
        consignment_id: ConsignmentId,
        status: ConsignmentStatus,
    },

    /// The consignment entry does not exist.
    #[error("Consignment entry not found: {entry_id}")]
    EntryNotFound { entry_id: ConsignmentEntryId },

    /// Shipped delta must be positive.
    #[error("Shipment quantity for entry {entry_id} must be greater than 0")]
    InvalidShipmentQuantity { entry_id: ConsignmentEntryId },

    /// Shipping the delta would exceed the entry quantity.
    #[error(
        "Shipping {delta} more units of entry {entry_id} exceeds its quantity ({shipped}/{quantity} shipped)"
    )]
    ShipmentExceedsQuantity {
        entry_id: ConsignmentEntryId,
        quantity: u32,
        shipped: u32,
        delta: u32,
    },

    /// Units already left the warehouse.
    #[error("Consignment {consignment_id} has shipped units")]
    HasShipments { consignment_id: ConsignmentId },
}

/// An externally driven status change, from a carrier webhook or an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierUpdate {
    pub status: ConsignmentStatus,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub shipping_company: Option<String>,
    #[serde(default)]
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    /// Defaults to the time the update is applied when moving to Delivered.
    #[serde(default)]
    pub actual_delivery_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CarrierUpdate {
    /// Creates an update that only changes the status.
    pub fn to(status: ConsignmentStatus) -> Self {
        Self {
            status,
            tracking_number: None,
            shipping_company: None,
            estimated_delivery_date: None,
            actual_delivery_date: None,
            notes: None,
        }
    }

    pub fn with_tracking(
        mut self,
        tracking_number: impl Into<String>,
        shipping_company: impl Into<String>,
    ) -> Self {
        self.tracking_number = Some(tracking_number.into());
        self.shipping_company = Some(shipping_company.into());
        self
    }

    pub fn with_estimated_delivery(mut self, eta: DateTime<Utc>) -> Self {
        self.estimated_delivery_date = Some(eta);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
