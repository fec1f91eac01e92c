//! Order root entity.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{OrderEntryId, OrderId};
use serde::{Deserialize, Serialize};

use super::{ItemType, Money, OrderEntry, OrderError, OrderStatus, ShippingAddress};

/// A checked-out order and its line items.
///
/// The order exclusively owns its entries; they are fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    status: OrderStatus,
    entries: Vec<OrderEntry>,
    shipping_address: ShippingAddress,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order after validating its entries.
    ///
    /// Every entry needs a positive quantity and a unique id. Physical entries
    /// must name a destination city; digital entries must not.
    pub fn new(
        id: OrderId,
        entries: Vec<OrderEntry>,
        shipping_address: ShippingAddress,
    ) -> Result<Self, OrderError> {
        if entries.is_empty() {
            return Err(OrderError::NoEntries);
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.id) {
                return Err(OrderError::DuplicateEntry { entry_id: entry.id });
            }
            if entry.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    entry_id: entry.id,
                    quantity: entry.quantity,
                });
            }
            if entry.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    entry_id: entry.id,
                    price: entry.unit_price.cents(),
                });
            }
            match (entry.item_type, entry.city) {
                (ItemType::Physical, None) => {
                    return Err(OrderError::MissingCity { entry_id: entry.id });
                }
                (ItemType::Digital, Some(_)) => {
                    return Err(OrderError::UnexpectedCity { entry_id: entry.id });
                }
                _ => {}
            }
        }

        let now = Utc::now();
        Ok(Self {
            id,
            status: OrderStatus::Pending,
            entries,
            shipping_address,
            created_at: now,
            updated_at: now,
        })
    }
}

// Query methods
impl Order {
    /// Returns the order ID.
    pub fn id(&self) -> OrderId {
        self.id
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns all entries in creation order.
    pub fn entries(&self) -> &[OrderEntry] {
        &self.entries
    }

    /// Returns the entries that ship from a warehouse.
    pub fn physical_entries(&self) -> impl Iterator<Item = &OrderEntry> {
        self.entries.iter().filter(|e| e.is_physical())
    }

    /// Returns true if any entry ships from a warehouse.
    pub fn has_physical_entries(&self) -> bool {
        self.physical_entries().next().is_some()
    }

    /// Returns an entry by ID.
    pub fn entry(&self, entry_id: OrderEntryId) -> Option<&OrderEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    /// Returns the delivery address.
    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    /// Returns the sum of all entry totals.
    pub fn total_amount(&self) -> Money {
        self.entries.iter().map(|e| e.total_price).sum()
    }

    /// Returns when the order was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the status last changed.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// Status transitions
impl Order {
    /// Marks stock as reserved and consignments as planned.
    pub fn confirm(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::can_confirm, OrderStatus::Confirmed, "confirm")
    }

    /// Marks every consignment as having left its warehouse.
    pub fn mark_shipped(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::can_ship, OrderStatus::Shipped, "ship")
    }

    /// Marks every consignment as delivered.
    pub fn mark_delivered(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::can_deliver, OrderStatus::Delivered, "deliver")
    }

    /// Cancels the order.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::can_cancel, OrderStatus::Cancelled, "cancel")
    }

    fn transition(
        &mut self,
        allowed: fn(&OrderStatus) -> bool,
        next: OrderStatus,
        action: &'static str,
    ) -> Result<(), OrderError> {
        if !allowed(&self.status) {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
