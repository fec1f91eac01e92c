//! Fulfillment audit events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, ConsignmentEntryId, ConsignmentId, OrderId, WarehouseId};
use domain::{ConsignmentStatus, OrderStatus};
use inventory::Allocation;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A state change made by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FulfillmentEvent {
    /// A new order was accepted.
    OrderPlaced {
        order_id: OrderId,
        entries: usize,
        at: DateTime<Utc>,
    },

    /// Stock was held for every physical entry of an order.
    StockReserved {
        order_id: OrderId,
        allocations: Vec<Allocation>,
        at: DateTime<Utc>,
    },

    /// Held stock was returned to available.
    StockReleased {
        order_id: OrderId,
        allocations: Vec<Allocation>,
        at: DateTime<Utc>,
    },

    /// A consignment was planned for one warehouse.
    ConsignmentPlanned {
        order_id: OrderId,
        consignment_id: ConsignmentId,
        warehouse_id: WarehouseId,
        entries: usize,
        at: DateTime<Utc>,
    },

    /// Units of a consignment entry left the warehouse.
    ShipmentRecorded {
        order_id: OrderId,
        consignment_id: ConsignmentId,
        entry_id: ConsignmentEntryId,
        book_id: BookId,
        warehouse_id: WarehouseId,
        delta: u32,
        shipped_quantity: u32,
        at: DateTime<Utc>,
    },

    ConsignmentStatusChanged {
        order_id: OrderId,
        consignment_id: ConsignmentId,
        from: ConsignmentStatus,
        to: ConsignmentStatus,
        at: DateTime<Utc>,
    },

    OrderStatusChanged {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    },

    /// New units arrived at a warehouse.
    StockRestocked {
        book_id: BookId,
        warehouse_id: WarehouseId,
        quantity: u32,
        at: DateTime<Utc>,
    },
}

impl FulfillmentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            FulfillmentEvent::OrderPlaced { .. } => "OrderPlaced",
            FulfillmentEvent::StockReserved { .. } => "StockReserved",
            FulfillmentEvent::StockReleased { .. } => "StockReleased",
            FulfillmentEvent::ConsignmentPlanned { .. } => "ConsignmentPlanned",
            FulfillmentEvent::ShipmentRecorded { .. } => "ShipmentRecorded",
            FulfillmentEvent::ConsignmentStatusChanged { .. } => "ConsignmentStatusChanged",
            FulfillmentEvent::OrderStatusChanged { .. } => "OrderStatusChanged",
            FulfillmentEvent::StockRestocked { .. } => "StockRestocked",
        }
    }

    /// The order the event belongs to. Restocks belong to none.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            FulfillmentEvent::OrderPlaced { order_id, .. }
            | FulfillmentEvent::StockReserved { order_id, .. }
            | FulfillmentEvent::StockReleased { order_id, .. }
            | FulfillmentEvent::ConsignmentPlanned { order_id, .. }
            | FulfillmentEvent::ShipmentRecorded { order_id, .. }
            | FulfillmentEvent::ConsignmentStatusChanged { order_id, .. }
            | FulfillmentEvent::OrderStatusChanged { order_id, .. } => Some(*order_id),
            FulfillmentEvent::StockRestocked { .. } => None,
        }
    }
}

/// Receives fulfillment events after the change they describe is stored.
///
/// Recording is infallible from the coordinator's point of view: a sink that
/// cannot deliver an event logs the failure itself.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: FulfillmentEvent);
}

#[async_trait]
impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    async fn record(&self, event: FulfillmentEvent) {
        (**self).record(event).await
    }
}

/// Keeps every event in memory, in recording order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<RwLock<Vec<FulfillmentEvent>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<FulfillmentEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for_order(&self, order_id: OrderId) -> Vec<FulfillmentEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.order_id() == Some(order_id))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn record(&self, event: FulfillmentEvent) {
        self.events.write().await.push(event);
    }
}

/// Writes every event to the log as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn record(&self, event: FulfillmentEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(event_type = event.event_type(), event = %json, "fulfillment event"),
            Err(e) => tracing::error!(event_type = event.event_type(), error = %e, "failed to serialize fulfillment event"),
        }
    }
}
