//! Splits confirmed orders into per-warehouse consignments.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::WarehouseId;
use domain::{Consignment, Order, OrderEntry};
use inventory::{Allocation, ReservationService, StockLedger, WarehouseSelector};

use crate::error::{FulfillmentError, Result};
use crate::store::ConsignmentStore;

/// Materializes the shipment plan of an order.
///
/// Physical entries are grouped by origin warehouse into one pending
/// consignment per warehouse, in ascending warehouse order; entries keep
/// their order-entry order. Digital entries never appear in a plan.
///
/// Planning is idempotent per order: once a plan is stored, later calls
/// return it unchanged.
pub struct ConsignmentPlanner<L, S, C> {
    reservations: Arc<ReservationService<L, S>>,
    consignments: C,
}

impl<L, S, C> ConsignmentPlanner<L, S, C>
where
    L: StockLedger,
    S: WarehouseSelector,
    C: ConsignmentStore,
{
    pub fn new(reservations: Arc<ReservationService<L, S>>, consignments: C) -> Self {
        Self {
            reservations,
            consignments,
        }
    }

    /// Plans an order, resolving origin warehouses the same way reservation does.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    pub async fn plan(&self, order: &Order) -> Result<Vec<Consignment>> {
        if let Some(existing) = self.existing(order).await? {
            return Ok(existing);
        }
        let allocations = self.reservations.resolve(order.entries()).await?;
        self.store(order, &allocations).await
    }

    /// Plans an order from the allocations its reservation produced.
    ///
    /// Used right after reserving so the plan ships from exactly the
    /// warehouses that hold the stock.
    #[tracing::instrument(skip(self, order, allocations), fields(order_id = %order.id()))]
    pub async fn plan_allocations(
        &self,
        order: &Order,
        allocations: &[Allocation],
    ) -> Result<Vec<Consignment>> {
        if let Some(existing) = self.existing(order).await? {
            return Ok(existing);
        }
        self.store(order, allocations).await
    }

    async fn existing(&self, order: &Order) -> Result<Option<Vec<Consignment>>> {
        let existing = self.consignments.for_order(order.id()).await?;
        if existing.is_empty() {
            Ok(None)
        } else {
            tracing::debug!(consignments = existing.len(), "order already planned");
            Ok(Some(existing))
        }
    }

    async fn store(&self, order: &Order, allocations: &[Allocation]) -> Result<Vec<Consignment>> {
        let mut groups: BTreeMap<WarehouseId, Vec<&OrderEntry>> = BTreeMap::new();
        for allocation in allocations {
            let entry = order
                .entry(allocation.order_entry_id)
                .filter(|e| e.is_physical())
                .ok_or(FulfillmentError::UnknownOrderEntry {
                    order_id: order.id(),
                    entry_id: allocation.order_entry_id,
                })?;
            groups.entry(allocation.warehouse_id).or_default().push(entry);
        }

        let planned: Vec<Consignment> = groups
            .into_iter()
            .map(|(warehouse_id, entries)| {
                Consignment::plan(
                    order.id(),
                    warehouse_id,
                    order.shipping_address().clone(),
                    entries,
                )
            })
            .collect();

        if !self
            .consignments
            .insert_plan(order.id(), planned.clone())
            .await?
        {
            return self.consignments.for_order(order.id()).await;
        }

        metrics::counter!("consignments_planned_total").increment(planned.len() as u64);
        tracing::info!(consignments = planned.len(), "order planned");
        Ok(planned)
    }
}
