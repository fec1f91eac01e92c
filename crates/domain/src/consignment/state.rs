//! Consignment status state machine.

use serde::{Deserialize, Serialize};

use super::ConsignmentError;

/// The shipping status of a consignment.
///
/// State transitions:
/// ```text
/// Pending ──► PickedUp ──► InTransit ──► OutForDelivery ──► Delivered
///    │            │            │               │
///    │            └────────────┴───────────────┴──► FailedDelivery
///    └──► Returned
/// ```
///
/// Only the edges drawn above are valid. Delivered, FailedDelivery and
/// Returned are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsignmentStatus {
    /// Planned, still at the warehouse.
    #[default]
    Pending,

    /// Handed over to the carrier.
    PickedUp,

    /// Moving between carrier hubs.
    InTransit,

    /// On the last-mile vehicle.
    OutForDelivery,

    /// Received by the customer (terminal state).
    Delivered,

    /// Carrier gave up; retried outside the core (terminal state).
    FailedDelivery,

    /// Cancelled before pickup (terminal state).
    Returned,
}

impl ConsignmentStatus {
    /// Returns true if `next` is a valid forward edge from this status.
    pub fn can_transition_to(&self, next: ConsignmentStatus) -> bool {
        use ConsignmentStatus::*;
        matches!(
            (self, next),
            (Pending, PickedUp)
                | (Pending, Returned)
                | (PickedUp, InTransit)
                | (InTransit, OutForDelivery)
                | (OutForDelivery, Delivered)
                | (PickedUp, FailedDelivery)
                | (InTransit, FailedDelivery)
                | (OutForDelivery, FailedDelivery)
        )
    }

    /// Validates the edge and returns the new status.
    pub fn transition_to(
        &self,
        next: ConsignmentStatus,
    ) -> Result<ConsignmentStatus, ConsignmentError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ConsignmentError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsignmentStatus::Delivered
                | ConsignmentStatus::FailedDelivery
                | ConsignmentStatus::Returned
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsignmentStatus::Pending => "PENDING",
            ConsignmentStatus::PickedUp => "PICKED_UP",
            ConsignmentStatus::InTransit => "IN_TRANSIT",
            ConsignmentStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            ConsignmentStatus::Delivered => "DELIVERED",
            ConsignmentStatus::FailedDelivery => "FAILED_DELIVERY",
            ConsignmentStatus::Returned => "RETURNED",
        }
    }
}

impl std::fmt::Display for ConsignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
