//! Consignment entity and its entries.

use chrono::{DateTime, Utc};
use common::{BookId, ConsignmentEntryId, ConsignmentId, OrderEntryId, OrderId, WarehouseId};
use serde::{Deserialize, Serialize};

use super::{CarrierUpdate, ConsignmentError, ConsignmentStatus};
use crate::order::{OrderEntry, ShippingAddress};

/// The part of one order entry assigned to a consignment.
///
/// An order entry lives in exactly one consignment. `shipped_quantity` only
/// grows and never exceeds `quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentEntry {
    id: ConsignmentEntryId,
    order_entry_id: OrderEntryId,
    book_id: BookId,
    quantity: u32,
    shipped_quantity: u32,
}

impl ConsignmentEntry {
    fn from_order_entry(entry: &OrderEntry) -> Self {
        Self {
            id: ConsignmentEntryId::new(),
            order_entry_id: entry.id,
            book_id: entry.book_id,
            quantity: entry.quantity,
            shipped_quantity: 0,
        }
    }

    pub fn id(&self) -> ConsignmentEntryId {
        self.id
    }

    pub fn order_entry_id(&self) -> OrderEntryId {
        self.order_entry_id
    }

    pub fn book_id(&self) -> BookId {
        self.book_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn shipped_quantity(&self) -> u32 {
        self.shipped_quantity
    }

    /// Units still waiting at the warehouse.
    pub fn remaining(&self) -> u32 {
        self.quantity - self.shipped_quantity
    }

    pub fn is_fully_shipped(&self) -> bool {
        self.shipped_quantity == self.quantity
    }
}

/// One shipment batch of an order, sent from a single warehouse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consignment {
    id: ConsignmentId,
    order_id: OrderId,
    warehouse_id: WarehouseId,
    status: ConsignmentStatus,
    tracking_number: Option<String>,
    shipping_company: Option<String>,
    estimated_delivery_date: Option<DateTime<Utc>>,
    actual_delivery_date: Option<DateTime<Utc>>,
    shipping_address: ShippingAddress,
    notes: Option<String>,
    entries: Vec<ConsignmentEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Consignment {
    /// Plans a pending consignment with one entry per order entry.
    pub fn plan<'a>(
        order_id: OrderId,
        warehouse_id: WarehouseId,
        shipping_address: ShippingAddress,
        entries: impl IntoIterator<Item = &'a OrderEntry>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ConsignmentId::new(),
            order_id,
            warehouse_id,
            status: ConsignmentStatus::Pending,
            tracking_number: None,
            shipping_company: None,
            estimated_delivery_date: None,
            actual_delivery_date: None,
            shipping_address,
            notes: None,
            entries: entries
                .into_iter()
                .map(ConsignmentEntry::from_order_entry)
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }
}

// Query methods
impl Consignment {
    pub fn id(&self) -> ConsignmentId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// The warehouse the consignment ships from.
    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn status(&self) -> ConsignmentStatus {
        self.status
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn shipping_company(&self) -> Option<&str> {
        self.shipping_company.as_deref()
    }

    pub fn estimated_delivery_date(&self) -> Option<DateTime<Utc>> {
        self.estimated_delivery_date
    }

    pub fn actual_delivery_date(&self) -> Option<DateTime<Utc>> {
        self.actual_delivery_date
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn entries(&self) -> &[ConsignmentEntry] {
        &self.entries
    }

    pub fn entry(&self, entry_id: ConsignmentEntryId) -> Option<&ConsignmentEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    /// Returns the entry covering the given order entry.
    pub fn entry_for_order_entry(&self, order_entry_id: OrderEntryId) -> Option<&ConsignmentEntry> {
        self.entries
            .iter()
            .find(|e| e.order_entry_id == order_entry_id)
    }

    /// Returns true once every entry has shipped its full quantity.
    pub fn is_fully_shipped(&self) -> bool {
        self.entries.iter().all(ConsignmentEntry::is_fully_shipped)
    }

    /// Returns true if any unit of any entry has shipped.
    pub fn has_shipments(&self) -> bool {
        self.entries.iter().any(|e| e.shipped_quantity > 0)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// Mutations
impl Consignment {
    /// Checks that `delta` more units of an entry may ship, without changing anything.
    pub fn check_shipment(
        &self,
        entry_id: ConsignmentEntryId,
        delta: u32,
    ) -> Result<&ConsignmentEntry, ConsignmentError> {
        if self.status != ConsignmentStatus::Pending {
            return Err(ConsignmentError::NotAcceptingShipments {
                consignment_id: self.id,
                status: self.status,
            });
        }
        let entry = self
            .entry(entry_id)
            .ok_or(ConsignmentError::EntryNotFound { entry_id })?;
        if delta == 0 {
            return Err(ConsignmentError::InvalidShipmentQuantity { entry_id });
        }
        if delta > entry.remaining() {
            return Err(ConsignmentError::ShipmentExceedsQuantity {
                entry_id,
                quantity: entry.quantity,
                shipped: entry.shipped_quantity,
                delta,
            });
        }
        Ok(entry)
    }

    /// Records `delta` shipped units on an entry.
    ///
    /// Once the last unit ships a pending consignment moves to PickedUp.
    pub fn record_shipment(
        &mut self,
        entry_id: ConsignmentEntryId,
        delta: u32,
    ) -> Result<(), ConsignmentError> {
        self.check_shipment(entry_id, delta)?;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == entry_id) {
            entry.shipped_quantity += delta;
        }
        if self.is_fully_shipped() {
            self.status = self.status.transition_to(ConsignmentStatus::PickedUp)?;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Applies a carrier or manual status update.
    ///
    /// The consignment can only leave Pending once every unit has shipped.
    /// Returns the previous status.
    pub fn apply_update(
        &mut self,
        update: CarrierUpdate,
    ) -> Result<ConsignmentStatus, ConsignmentError> {
        let previous = self.status;
        let next = previous.transition_to(update.status)?;
        if previous == ConsignmentStatus::Pending
            && next != ConsignmentStatus::Returned
            && !self.is_fully_shipped()
        {
            return Err(ConsignmentError::ShipmentIncomplete {
                consignment_id: self.id,
            });
        }

        self.status = next;
        if let Some(tracking_number) = update.tracking_number {
            self.tracking_number = Some(tracking_number);
        }
        if let Some(shipping_company) = update.shipping_company {
            self.shipping_company = Some(shipping_company);
        }
        if let Some(eta) = update.estimated_delivery_date {
            self.estimated_delivery_date = Some(eta);
        }
        if let Some(notes) = update.notes {
            self.notes = Some(notes);
        }
        if next == ConsignmentStatus::Delivered {
            self.actual_delivery_date = Some(update.actual_delivery_date.unwrap_or_else(Utc::now));
        }
        self.updated_at = Utc::now();
        Ok(previous)
    }

    /// Moves a pending consignment to Returned on order cancellation.
    pub fn mark_returned(&mut self) -> Result<(), ConsignmentError> {
        if self.has_shipments() {
            return Err(ConsignmentError::HasShipments {
                consignment_id: self.id,
            });
        }
        self.status = self.status.transition_to(ConsignmentStatus::Returned)?;
        self.updated_at = Utc::now();
        Ok(())
    }
}
