//! Order fulfillment coordinator.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{BookId, ConsignmentEntryId, ConsignmentId, LedgerKey, OrderId, WarehouseId};
use domain::{CarrierUpdate, Consignment, ConsignmentStatus, Order, OrderStatus};
use inventory::{Allocation, ReservationService, StockLedger, StockLevel, WarehouseSelector};

use crate::error::{FulfillmentError, Result};
use crate::events::{EventSink, FulfillmentEvent};
use crate::locks::OrderLocks;
use crate::planner::ConsignmentPlanner;
use crate::store::{ConsignmentStore, OrderStore};

/// Keeps stock, consignments and order status consistent across the order
/// lifecycle.
///
/// Order status follows:
/// ```text
/// Pending ──► Confirmed ──► Shipped ──► Delivered
///    │            │
///    └────────────┴──► Cancelled
/// ```
///
/// Every operation on an order runs under that order's mutex, so two
/// shipments or a shipment and a cancellation of the same order never
/// interleave. The mutex is dropped again when the operation ends and no
/// other operation waits on it. Stock itself is protected by the ledger's
/// row locks.
pub struct OrderFulfillmentCoordinator<L, S, O, C, E> {
    reservations: Arc<ReservationService<L, S>>,
    planner: ConsignmentPlanner<L, S, C>,
    orders: O,
    consignments: C,
    events: E,
    locks: OrderLocks,
}

impl<L, S, O, C, E> OrderFulfillmentCoordinator<L, S, O, C, E>
where
    L: StockLedger,
    S: WarehouseSelector,
    O: OrderStore,
    C: ConsignmentStore + Clone,
    E: EventSink,
{
    pub fn new(reservations: ReservationService<L, S>, orders: O, consignments: C, events: E) -> Self {
        let reservations = Arc::new(reservations);
        let planner = ConsignmentPlanner::new(reservations.clone(), consignments.clone());
        Self {
            reservations,
            planner,
            orders,
            consignments,
            events,
            locks: OrderLocks::default(),
        }
    }

    pub fn ledger(&self) -> &L {
        self.reservations.ledger()
    }

    pub fn planner(&self) -> &ConsignmentPlanner<L, S, C> {
        &self.planner
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    /// Accepts a new pending order.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    pub async fn place_order(&self, order: Order) -> Result<()> {
        if order.status() != OrderStatus::Pending {
            return Err(invalid_state(&order, "place"));
        }
        let order_id = order.id();
        let entries = order.entries().len();
        self.orders.insert(order).await?;

        tracing::info!(entries, "order placed");
        self.events
            .record(FulfillmentEvent::OrderPlaced {
                order_id,
                entries,
                at: Utc::now(),
            })
            .await;
        Ok(())
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    pub async fn consignments(&self, order_id: OrderId) -> Result<Vec<Consignment>> {
        self.consignments.for_order(order_id).await
    }

    pub async fn consignment(&self, consignment_id: ConsignmentId) -> Result<Consignment> {
        self.consignments
            .get(consignment_id)
            .await?
            .ok_or(FulfillmentError::ConsignmentNotFound(consignment_id))
    }

    /// Reserves stock for a pending order, plans its consignments and
    /// confirms it.
    ///
    /// On any failure the order stays pending. Stock reserved before a
    /// later step failed is released again.
    #[tracing::instrument(skip(self))]
    pub async fn on_order_confirmed(&self, order_id: OrderId) -> Result<Vec<Consignment>> {
        let started = Instant::now();
        observe("confirm", started, self.confirm(order_id).await)
    }

    /// Records `delta` units of a consignment entry leaving its warehouse.
    #[tracing::instrument(skip(self))]
    pub async fn on_shipment(&self, entry_id: ConsignmentEntryId, delta: u32) -> Result<Consignment> {
        let started = Instant::now();
        observe("ship", started, self.ship(entry_id, delta).await)
    }

    /// Applies a carrier or operator status change to a consignment.
    #[tracing::instrument(skip(self, update), fields(status = %update.status))]
    pub async fn update_consignment_status(
        &self,
        consignment_id: ConsignmentId,
        update: CarrierUpdate,
    ) -> Result<Consignment> {
        let started = Instant::now();
        observe(
            "update_consignment",
            started,
            self.update_consignment(consignment_id, update).await,
        )
    }

    /// Cancels an order that has not shipped anything.
    ///
    /// A confirmed order gets its reservations released and its consignments
    /// returned. Once any unit has shipped, cancellation is refused.
    #[tracing::instrument(skip(self))]
    pub async fn on_order_cancelled(&self, order_id: OrderId) -> Result<()> {
        let started = Instant::now();
        observe("cancel", started, self.cancel(order_id).await)
    }

    /// Receives new stock at a registered warehouse.
    #[tracing::instrument(skip(self))]
    pub async fn restock(
        &self,
        book_id: BookId,
        warehouse_id: WarehouseId,
        quantity: u32,
    ) -> Result<StockLevel> {
        let started = Instant::now();
        let result = self
            .reservations
            .restock(book_id, warehouse_id, quantity)
            .await
            .map_err(FulfillmentError::from);

        if result.is_ok() {
            tracing::info!(quantity, "stock restocked");
            self.events
                .record(FulfillmentEvent::StockRestocked {
                    book_id,
                    warehouse_id,
                    quantity,
                    at: Utc::now(),
                })
                .await;
        }
        observe("restock", started, result)
    }

    /// Units currently available to reserve. Advisory only.
    pub async fn available(&self, book_id: BookId, warehouse_id: WarehouseId) -> Result<u32> {
        Ok(self
            .ledger()
            .available(LedgerKey::new(book_id, warehouse_id))
            .await?)
    }

    /// Runs `operation` under the order's mutex.
    async fn locked<T, F>(&self, order_id: OrderId, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guard = self.locks.acquire(order_id).await;
        let result = operation.await;
        self.locks.release(order_id, guard).await;
        result
    }

    async fn confirm(&self, order_id: OrderId) -> Result<Vec<Consignment>> {
        self.locked(order_id, self.confirm_locked(order_id)).await
    }

    async fn confirm_locked(&self, order_id: OrderId) -> Result<Vec<Consignment>> {
        let mut order = self.order(order_id).await?;
        if !order.status().can_confirm() {
            return Err(invalid_state(&order, "confirm"));
        }

        let allocations = self.reservations.reserve_for_order(order.entries()).await?;
        let consignments = match self.plan_and_confirm(&mut order, &allocations).await {
            Ok(consignments) => consignments,
            Err(err) => return Err(self.compensate_confirm(order_id, &allocations, err).await),
        };

        let at = Utc::now();
        if !allocations.is_empty() {
            self.events
                .record(FulfillmentEvent::StockReserved {
                    order_id,
                    allocations,
                    at,
                })
                .await;
        }
        for consignment in &consignments {
            self.events
                .record(FulfillmentEvent::ConsignmentPlanned {
                    order_id,
                    consignment_id: consignment.id(),
                    warehouse_id: consignment.warehouse_id(),
                    entries: consignment.entries().len(),
                    at,
                })
                .await;
        }
        self.record_order_change(order_id, OrderStatus::Pending, OrderStatus::Confirmed)
            .await;

        tracing::info!(consignments = consignments.len(), "order confirmed");
        Ok(consignments)
    }

    async fn plan_and_confirm(
        &self,
        order: &mut Order,
        allocations: &[Allocation],
    ) -> Result<Vec<Consignment>> {
        let consignments = self.planner.plan_allocations(order, allocations).await?;
        order.confirm()?;
        self.orders.save(order.clone()).await?;
        Ok(consignments)
    }

    /// Undoes a reservation whose order could not be confirmed.
    ///
    /// Returns `cause`, or `CompensationFailed` when the stock stays reserved.
    async fn compensate_confirm(
        &self,
        order_id: OrderId,
        allocations: &[Allocation],
        cause: FulfillmentError,
    ) -> FulfillmentError {
        tracing::warn!(error = %cause, "confirmation failed after reserving stock, releasing");

        if let Err(e) = self.consignments.remove_for_order(order_id).await {
            tracing::error!(error = %e, "failed to remove consignment plan");
        }
        match self.reservations.release_allocations(allocations).await {
            Ok(()) => {
                if !allocations.is_empty() {
                    self.events
                        .record(FulfillmentEvent::StockReleased {
                            order_id,
                            allocations: allocations.to_vec(),
                            at: Utc::now(),
                        })
                        .await;
                }
                cause
            }
            Err(release) => {
                metrics::counter!("fulfillment_compensation_failures_total").increment(1);
                tracing::error!(
                    error = %release,
                    cause = %cause,
                    allocations = allocations.len(),
                    "failed to release reservation of unconfirmed order, stock left reserved"
                );
                FulfillmentError::CompensationFailed {
                    order_id,
                    cause: Box::new(cause),
                    release,
                }
            }
        }
    }

    async fn ship(&self, entry_id: ConsignmentEntryId, delta: u32) -> Result<Consignment> {
        let order_id = self.find_by_entry(entry_id).await?.order_id();
        self.locked(order_id, self.ship_locked(order_id, entry_id, delta))
            .await
    }

    async fn ship_locked(
        &self,
        order_id: OrderId,
        entry_id: ConsignmentEntryId,
        delta: u32,
    ) -> Result<Consignment> {
        // Re-read under the order lock.
        let mut consignment = self.find_by_entry(entry_id).await?;
        let mut order = self.order(order_id).await?;
        if !order.status().can_ship() {
            return Err(invalid_state(&order, "ship"));
        }

        let (book_id, shipped_quantity) = {
            let entry = consignment.check_shipment(entry_id, delta)?;
            (entry.book_id(), entry.shipped_quantity() + delta)
        };
        let warehouse_id = consignment.warehouse_id();

        self.ledger()
            .consume(LedgerKey::new(book_id, warehouse_id), delta)
            .await?;

        let previous = consignment.status();
        consignment.record_shipment(entry_id, delta)?;
        self.consignments.save(consignment.clone()).await?;

        tracing::info!(%book_id, delta, shipped_quantity, "shipment recorded");
        self.events
            .record(FulfillmentEvent::ShipmentRecorded {
                order_id,
                consignment_id: consignment.id(),
                entry_id,
                book_id,
                warehouse_id,
                delta,
                shipped_quantity,
                at: Utc::now(),
            })
            .await;
        if consignment.status() != previous {
            self.record_consignment_change(&consignment, previous).await;
        }

        if consignment.is_fully_shipped()
            && self
                .consignments
                .for_order(order_id)
                .await?
                .iter()
                .all(Consignment::is_fully_shipped)
        {
            order.mark_shipped()?;
            self.orders.save(order).await?;
            self.record_order_change(order_id, OrderStatus::Confirmed, OrderStatus::Shipped)
                .await;
            tracing::info!("order fully shipped");
        }

        Ok(consignment)
    }

    async fn update_consignment(
        &self,
        consignment_id: ConsignmentId,
        update: CarrierUpdate,
    ) -> Result<Consignment> {
        if update.status == ConsignmentStatus::Returned {
            return Err(FulfillmentError::ReturnRequiresCancellation { consignment_id });
        }

        let order_id = self.consignment(consignment_id).await?.order_id();
        self.locked(
            order_id,
            self.update_consignment_locked(order_id, consignment_id, update),
        )
        .await
    }

    async fn update_consignment_locked(
        &self,
        order_id: OrderId,
        consignment_id: ConsignmentId,
        update: CarrierUpdate,
    ) -> Result<Consignment> {
        let mut consignment = self.consignment(consignment_id).await?;
        let previous = consignment.apply_update(update)?;
        self.consignments.save(consignment.clone()).await?;
        self.record_consignment_change(&consignment, previous).await;

        if consignment.status() == ConsignmentStatus::Delivered
            && self
                .consignments
                .for_order(order_id)
                .await?
                .iter()
                .all(|c| c.status() == ConsignmentStatus::Delivered)
        {
            let mut order = self.order(order_id).await?;
            let from = order.status();
            order.mark_delivered()?;
            self.orders.save(order).await?;
            self.record_order_change(order_id, from, OrderStatus::Delivered)
                .await;
            tracing::info!("order delivered");
        }

        Ok(consignment)
    }

    async fn cancel(&self, order_id: OrderId) -> Result<()> {
        self.locked(order_id, self.cancel_locked(order_id)).await
    }

    async fn cancel_locked(&self, order_id: OrderId) -> Result<()> {
        let mut order = self.order(order_id).await?;
        let previous = order.status();

        match previous {
            OrderStatus::Pending => {}
            OrderStatus::Confirmed => self.return_consignments(order_id).await?,
            _ => return Err(invalid_state(&order, "cancel")),
        }

        order.cancel()?;
        self.orders.save(order).await?;
        self.record_order_change(order_id, previous, OrderStatus::Cancelled)
            .await;
        tracing::info!(from = %previous, "order cancelled");
        Ok(())
    }

    /// Releases the stock held by an unshipped order and returns its consignments.
    async fn return_consignments(&self, order_id: OrderId) -> Result<()> {
        let mut consignments = self.consignments.for_order(order_id).await?;
        if consignments.iter().any(Consignment::has_shipments) {
            return Err(FulfillmentError::PartialShipmentConflict { order_id });
        }

        // Release exactly what the plan holds, at the warehouses it ships from.
        let allocations: Vec<Allocation> = consignments
            .iter()
            .flat_map(|c| {
                c.entries().iter().map(move |e| Allocation {
                    order_entry_id: e.order_entry_id(),
                    book_id: e.book_id(),
                    warehouse_id: c.warehouse_id(),
                    quantity: e.quantity(),
                })
            })
            .collect();
        self.reservations.release_allocations(&allocations).await?;
        if !allocations.is_empty() {
            self.events
                .record(FulfillmentEvent::StockReleased {
                    order_id,
                    allocations,
                    at: Utc::now(),
                })
                .await;
        }

        for consignment in &mut consignments {
            let previous = consignment.status();
            consignment.mark_returned()?;
            self.consignments.save(consignment.clone()).await?;
            self.record_consignment_change(consignment, previous).await;
        }
        Ok(())
    }

    async fn find_by_entry(&self, entry_id: ConsignmentEntryId) -> Result<Consignment> {
        self.consignments
            .find_by_entry(entry_id)
            .await?
            .ok_or(FulfillmentError::ConsignmentEntryNotFound(entry_id))
    }

    async fn record_order_change(&self, order_id: OrderId, from: OrderStatus, to: OrderStatus) {
        self.events
            .record(FulfillmentEvent::OrderStatusChanged {
                order_id,
                from,
                to,
                at: Utc::now(),
            })
            .await;
    }

    async fn record_consignment_change(&self, consignment: &Consignment, from: ConsignmentStatus) {
        tracing::info!(
            consignment_id = %consignment.id(),
            %from,
            to = %consignment.status(),
            "consignment status changed"
        );
        self.events
            .record(FulfillmentEvent::ConsignmentStatusChanged {
                order_id: consignment.order_id(),
                consignment_id: consignment.id(),
                from,
                to: consignment.status(),
                at: Utc::now(),
            })
            .await;
    }
}

fn invalid_state(order: &Order, action: &'static str) -> FulfillmentError {
    FulfillmentError::InvalidOrderState {
        order_id: order.id(),
        status: order.status(),
        action,
    }
}

/// Records the duration of an operation and logs how it failed.
fn observe<T>(operation: &'static str, started: Instant, result: Result<T>) -> Result<T> {
    metrics::histogram!("fulfillment_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());

    if let Err(err) = &result {
        if err.is_business_outcome() {
            tracing::warn!(operation, error = %err, "operation rejected");
        } else if err.is_retryable() {
            tracing::warn!(operation, error = %err, "operation timed out, retryable");
        } else {
            tracing::error!(operation, error = %err, "operation failed");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use common::City;
    use domain::{Money, OrderEntry, ShippingAddress};
    use inventory::{
        InMemoryStockLedger, InMemoryWarehouseDirectory, InventoryError, LedgerBatch, LedgerOp,
        LedgerWarehouseSelector, ReorderPolicy, Warehouse, WarehouseDirectory,
    };

    use super::*;
    use crate::events::InMemoryEventSink;
    use crate::store::{InMemoryConsignmentStore, InMemoryOrderStore};

    type TestCoordinator = OrderFulfillmentCoordinator<
        InMemoryStockLedger,
        LedgerWarehouseSelector<InMemoryWarehouseDirectory, InMemoryStockLedger>,
        InMemoryOrderStore,
        InMemoryConsignmentStore,
        InMemoryEventSink,
    >;

    async fn setup() -> (TestCoordinator, Warehouse) {
        let ledger = InMemoryStockLedger::new();
        let directory = InMemoryWarehouseDirectory::new();
        let hanoi = Warehouse::new("HN-01", "Hanoi Central", City::Hanoi);
        directory.register(hanoi.clone()).await.unwrap();

        let reservations = ReservationService::new(
            ledger.clone(),
            LedgerWarehouseSelector::new(directory, ledger),
        );
        let coordinator = OrderFulfillmentCoordinator::new(
            reservations,
            InMemoryOrderStore::new(),
            InMemoryConsignmentStore::new(),
            InMemoryEventSink::new(),
        );
        (coordinator, hanoi)
    }

    async fn place(coordinator: &TestCoordinator, entries: Vec<OrderEntry>) -> OrderId {
        let order = Order::new(OrderId::new(), entries, ShippingAddress::default()).unwrap();
        let order_id = order.id();
        coordinator.place_order(order).await.unwrap();
        order_id
    }

    #[tokio::test]
    async fn test_confirm_twice_is_rejected() {
        let (coordinator, hanoi) = setup().await;
        let book = BookId::new();
        coordinator.restock(book, hanoi.id, 5).await.unwrap();
        let order_id = place(
            &coordinator,
            vec![OrderEntry::physical(book, 2, Money::from_cents(800), City::Hanoi)],
        )
        .await;

        coordinator.on_order_confirmed(order_id).await.unwrap();
        let err = coordinator.on_order_confirmed(order_id).await.unwrap_err();

        assert!(matches!(
            err,
            FulfillmentError::InvalidOrderState {
                status: OrderStatus::Confirmed,
                ..
            }
        ));
        assert_eq!(coordinator.available(book, hanoi.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_confirmation_keeps_order_pending() {
        let (coordinator, hanoi) = setup().await;
        let book = BookId::new();
        coordinator.restock(book, hanoi.id, 1).await.unwrap();
        let order_id = place(
            &coordinator,
            vec![OrderEntry::physical(book, 2, Money::from_cents(800), City::Hanoi)],
        )
        .await;

        let err = coordinator.on_order_confirmed(order_id).await.unwrap_err();
        assert!(err.is_business_outcome());

        let order = coordinator.order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert!(coordinator.consignments(order_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_digital_order_confirms_without_consignments() {
        let (coordinator, _) = setup().await;
        let order_id = place(
            &coordinator,
            vec![OrderEntry::digital(BookId::new(), 1, Money::from_cents(500))],
        )
        .await;

        let consignments = coordinator.on_order_confirmed(order_id).await.unwrap();
        assert!(consignments.is_empty());
        assert_eq!(
            coordinator.order(order_id).await.unwrap().status(),
            OrderStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_carrier_cannot_return_consignment() {
        let (coordinator, hanoi) = setup().await;
        let book = BookId::new();
        coordinator.restock(book, hanoi.id, 5).await.unwrap();
        let order_id = place(
            &coordinator,
            vec![OrderEntry::physical(book, 1, Money::from_cents(800), City::Hanoi)],
        )
        .await;
        let consignments = coordinator.on_order_confirmed(order_id).await.unwrap();

        let err = coordinator
            .update_consignment_status(
                consignments[0].id(),
                CarrierUpdate::to(ConsignmentStatus::Returned),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::ReturnRequiresCancellation { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelling_twice_is_rejected() {
        let (coordinator, _) = setup().await;
        let order_id = place(
            &coordinator,
            vec![OrderEntry::digital(BookId::new(), 1, Money::from_cents(500))],
        )
        .await;

        coordinator.on_order_cancelled(order_id).await.unwrap();
        let err = coordinator.on_order_cancelled(order_id).await.unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::InvalidOrderState {
                status: OrderStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_order_locks_are_released_after_every_outcome() {
        let (coordinator, hanoi) = setup().await;
        let book = BookId::new();
        coordinator.restock(book, hanoi.id, 1).await.unwrap();

        // Rejected confirmations: nothing in stock for these.
        for _ in 0..50 {
            let order_id = place(
                &coordinator,
                vec![OrderEntry::physical(BookId::new(), 1, Money::from_cents(800), City::Hanoi)],
            )
            .await;
            assert!(coordinator.on_order_confirmed(order_id).await.is_err());
        }
        // Unknown orders.
        for _ in 0..10 {
            assert!(coordinator.on_order_confirmed(OrderId::new()).await.is_err());
            assert!(coordinator.on_order_cancelled(OrderId::new()).await.is_err());
        }
        // An order whose only consignment fails delivery.
        let order_id = place(
            &coordinator,
            vec![OrderEntry::physical(book, 1, Money::from_cents(800), City::Hanoi)],
        )
        .await;
        let consignments = coordinator.on_order_confirmed(order_id).await.unwrap();
        let consignment = &consignments[0];
        coordinator
            .on_shipment(consignment.entries()[0].id(), 1)
            .await
            .unwrap();
        for status in [ConsignmentStatus::InTransit, ConsignmentStatus::FailedDelivery] {
            coordinator
                .update_consignment_status(consignment.id(), CarrierUpdate::to(status))
                .await
                .unwrap();
        }

        assert_eq!(coordinator.locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_restock_of_unregistered_warehouse_is_rejected() {
        let (coordinator, _) = setup().await;
        let book = BookId::new();
        let stray = WarehouseId::new();

        let err = coordinator.restock(book, stray, 5).await.unwrap_err();
        assert_eq!(err.kind(), "unknown_warehouse");
        assert_eq!(coordinator.available(book, stray).await.unwrap(), 0);
        assert!(
            coordinator
                .ledger()
                .stock_level(LedgerKey::new(book, stray))
                .await
                .unwrap()
                .is_none()
        );
    }

    /// Ledger whose release batches always time out.
    #[derive(Clone, Default)]
    struct StuckReleaseLedger {
        inner: InMemoryStockLedger,
    }

    #[async_trait]
    impl StockLedger for StuckReleaseLedger {
        async fn apply(&self, batch: LedgerBatch) -> inventory::Result<Vec<StockLevel>> {
            if batch.mutations().iter().any(|m| m.op == LedgerOp::Release) {
                return Err(InventoryError::LockTimeout { key: None });
            }
            self.inner.apply(batch).await
        }

        async fn track(&self, key: LedgerKey, policy: ReorderPolicy) -> inventory::Result<StockLevel> {
            self.inner.track(key, policy).await
        }

        async fn stock_level(&self, key: LedgerKey) -> inventory::Result<Option<StockLevel>> {
            self.inner.stock_level(key).await
        }
    }

    /// Order store that accepts new orders but cannot persist changes.
    #[derive(Clone, Default)]
    struct ReadOnlyOrders {
        inner: InMemoryOrderStore,
    }

    #[async_trait]
    impl OrderStore for ReadOnlyOrders {
        async fn insert(&self, order: Order) -> Result<()> {
            self.inner.insert(order).await
        }

        async fn get(&self, id: OrderId) -> Result<Option<Order>> {
            self.inner.get(id).await
        }

        async fn save(&self, _order: Order) -> Result<()> {
            Err(FulfillmentError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn test_stranded_reservation_is_reported() {
        let ledger = StuckReleaseLedger::default();
        let directory = InMemoryWarehouseDirectory::new();
        let hanoi = Warehouse::new("HN-01", "Hanoi Central", City::Hanoi);
        directory.register(hanoi.clone()).await.unwrap();
        let coordinator = OrderFulfillmentCoordinator::new(
            ReservationService::new(
                ledger.clone(),
                LedgerWarehouseSelector::new(directory, ledger.clone()),
            ),
            ReadOnlyOrders::default(),
            InMemoryConsignmentStore::new(),
            InMemoryEventSink::new(),
        );
        let book = BookId::new();
        coordinator.restock(book, hanoi.id, 5).await.unwrap();

        let order = Order::new(
            OrderId::new(),
            vec![OrderEntry::physical(book, 2, Money::from_cents(800), City::Hanoi)],
            ShippingAddress::default(),
        )
        .unwrap();
        let order_id = order.id();
        coordinator.place_order(order).await.unwrap();

        let err = coordinator.on_order_confirmed(order_id).await.unwrap_err();
        match &err {
            FulfillmentError::CompensationFailed {
                order_id: failed,
                cause,
                release,
            } => {
                assert_eq!(*failed, order_id);
                assert!(matches!(**cause, FulfillmentError::Database(_)));
                assert!(release.is_retryable());
            }
            other => panic!("expected CompensationFailed, got {other:?}"),
        }
        assert!(!err.is_retryable());
        // The units stay held and the plan is gone.
        assert_eq!(coordinator.available(book, hanoi.id).await.unwrap(), 3);
        assert!(coordinator.consignments(order_id).await.unwrap().is_empty());
        assert_eq!(coordinator.locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_references() {
        let (coordinator, _) = setup().await;

        assert!(matches!(
            coordinator.on_order_confirmed(OrderId::new()).await,
            Err(FulfillmentError::OrderNotFound(_))
        ));
        assert!(matches!(
            coordinator.on_shipment(ConsignmentEntryId::new(), 1).await,
            Err(FulfillmentError::ConsignmentEntryNotFound(_))
        ));
        assert!(matches!(
            coordinator
                .update_consignment_status(
                    ConsignmentId::new(),
                    CarrierUpdate::to(ConsignmentStatus::InTransit)
                )
                .await,
            Err(FulfillmentError::ConsignmentNotFound(_))
        ));
    }
}
