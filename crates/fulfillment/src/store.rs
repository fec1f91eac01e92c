//! Persistence for orders and their consignments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ConsignmentEntryId, ConsignmentId, OrderId};
use domain::{Consignment, Order};
use tokio::sync::RwLock;

use crate::error::{FulfillmentError, Result};

/// Storage for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Stores a new order. Fails with `DuplicateOrder` if the id is taken.
    async fn insert(&self, order: Order) -> Result<()>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Replaces a stored order.
    async fn save(&self, order: Order) -> Result<()>;
}

/// Storage for consignments, indexed by order and by entry.
///
/// An order owns its consignments: they are written as one plan and
/// removed together.
#[async_trait]
pub trait ConsignmentStore: Send + Sync {
    /// Stores the plan of an order unless one already exists.
    ///
    /// Returns false, writing nothing, when the order already has a plan.
    async fn insert_plan(&self, order_id: OrderId, consignments: Vec<Consignment>) -> Result<bool>;

    /// Consignments of an order in plan order. Empty if none were planned.
    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Consignment>>;

    async fn get(&self, id: ConsignmentId) -> Result<Option<Consignment>>;

    /// Returns the consignment holding the given entry.
    async fn find_by_entry(&self, entry_id: ConsignmentEntryId) -> Result<Option<Consignment>>;

    /// Replaces a stored consignment.
    async fn save(&self, consignment: Consignment) -> Result<()>;

    /// Deletes the plan of an order and returns how many consignments it had.
    async fn remove_for_order(&self, order_id: OrderId) -> Result<usize>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for Arc<T> {
    async fn insert(&self, order: Order) -> Result<()> {
        (**self).insert(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        (**self).get(id).await
    }

    async fn save(&self, order: Order) -> Result<()> {
        (**self).save(order).await
    }
}

/// In-memory order store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id()) {
            return Err(FulfillmentError::DuplicateOrder(order.id()));
        }
        orders.insert(order.id(), order);
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn save(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.id()) {
            Some(stored) => {
                *stored = order;
                Ok(())
            }
            None => Err(FulfillmentError::OrderNotFound(order.id())),
        }
    }
}

#[derive(Debug, Default)]
struct ConsignmentState {
    consignments: HashMap<ConsignmentId, Consignment>,
    by_order: HashMap<OrderId, Vec<ConsignmentId>>,
    by_entry: HashMap<ConsignmentEntryId, ConsignmentId>,
}

/// In-memory consignment store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConsignmentStore {
    state: Arc<RwLock<ConsignmentState>>,
}

impl InMemoryConsignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored consignments across all orders.
    pub async fn len(&self) -> usize {
        self.state.read().await.consignments.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.consignments.is_empty()
    }
}

#[async_trait]
impl ConsignmentStore for InMemoryConsignmentStore {
    async fn insert_plan(&self, order_id: OrderId, consignments: Vec<Consignment>) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.by_order.contains_key(&order_id) {
            return Ok(false);
        }

        let mut ids = Vec::with_capacity(consignments.len());
        for consignment in consignments {
            for entry in consignment.entries() {
                state.by_entry.insert(entry.id(), consignment.id());
            }
            ids.push(consignment.id());
            state.consignments.insert(consignment.id(), consignment);
        }
        // An empty plan is still a plan: pure-digital orders keep no consignments.
        state.by_order.insert(order_id, ids);
        Ok(true)
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Consignment>> {
        let state = self.state.read().await;
        Ok(state
            .by_order
            .get(&order_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.consignments.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, id: ConsignmentId) -> Result<Option<Consignment>> {
        Ok(self.state.read().await.consignments.get(&id).cloned())
    }

    async fn find_by_entry(&self, entry_id: ConsignmentEntryId) -> Result<Option<Consignment>> {
        let state = self.state.read().await;
        Ok(state
            .by_entry
            .get(&entry_id)
            .and_then(|id| state.consignments.get(id))
            .cloned())
    }

    async fn save(&self, consignment: Consignment) -> Result<()> {
        let mut state = self.state.write().await;
        match state.consignments.get_mut(&consignment.id()) {
            Some(stored) => {
                *stored = consignment;
                Ok(())
            }
            None => Err(FulfillmentError::ConsignmentNotFound(consignment.id())),
        }
    }

    async fn remove_for_order(&self, order_id: OrderId) -> Result<usize> {
        let mut state = self.state.write().await;
        let Some(ids) = state.by_order.remove(&order_id) else {
            return Ok(0);
        };
        for id in &ids {
            if let Some(consignment) = state.consignments.remove(id) {
                for entry in consignment.entries() {
                    state.by_entry.remove(&entry.id());
                }
            }
        }
        Ok(ids.len())
    }
}
