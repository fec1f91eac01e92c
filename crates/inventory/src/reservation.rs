//! All-or-nothing stock reservation for order entries.

use common::{BookId, LedgerKey, OrderEntryId, WarehouseId};
use domain::OrderEntry;
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};
use crate::ledger::StockLedger;
use crate::stock::{LedgerBatch, LedgerOp, StockLevel};
use crate::warehouse::WarehouseSelector;

/// Stock held for one physical order entry at one warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub order_entry_id: OrderEntryId,
    pub book_id: BookId,
    pub warehouse_id: WarehouseId,
    pub quantity: u32,
}

impl Allocation {
    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(self.book_id, self.warehouse_id)
    }
}

/// Turns order entries into stock reservations.
///
/// Digital entries are ignored. Physical entries are routed to the warehouse
/// of their city; the warehouse is looked up again on every call.
pub struct ReservationService<L, S> {
    ledger: L,
    selector: S,
}

impl<L, S> ReservationService<L, S>
where
    L: StockLedger,
    S: WarehouseSelector,
{
    pub fn new(ledger: L, selector: S) -> Self {
        Self { ledger, selector }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Receives new stock at a registered warehouse.
    #[tracing::instrument(skip(self))]
    pub async fn restock(
        &self,
        book_id: BookId,
        warehouse_id: WarehouseId,
        quantity: u32,
    ) -> Result<StockLevel> {
        if self.selector.warehouse(warehouse_id).await?.is_none() {
            return Err(InventoryError::UnknownWarehouse(warehouse_id));
        }
        self.ledger
            .restock(LedgerKey::new(book_id, warehouse_id), quantity)
            .await
    }

    /// Resolves the origin warehouse of every physical entry, in entry order.
    ///
    /// A warehouse that never stocked the book still resolves; reserving from
    /// it then fails as out of stock.
    #[tracing::instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn resolve(&self, entries: &[OrderEntry]) -> Result<Vec<Allocation>> {
        let mut allocations = Vec::new();
        for entry in entries.iter().filter(|e| e.is_physical()) {
            let city = entry
                .city
                .ok_or(InventoryError::MissingCity { entry_id: entry.id })?;

            let warehouse_id = match self.selector.select(entry.book_id, city).await {
                Ok(warehouse) => warehouse.id,
                Err(InventoryError::StockNotTracked {
                    book_id,
                    warehouse_id,
                }) => {
                    tracing::warn!(%book_id, %warehouse_id, "book not stocked at warehouse, treating as zero stock");
                    warehouse_id
                }
                Err(err) => return Err(err),
            };

            allocations.push(Allocation {
                order_entry_id: entry.id,
                book_id: entry.book_id,
                warehouse_id,
                quantity: entry.quantity,
            });
        }
        Ok(allocations)
    }

    /// Reserves stock for every physical entry, or for none of them.
    ///
    /// On `InsufficientStock` the error names the first entry, in entry
    /// order, that could not be satisfied; no row is changed.
    #[tracing::instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn reserve_for_order(&self, entries: &[OrderEntry]) -> Result<Vec<Allocation>> {
        let allocations = self.resolve(entries).await?;
        if allocations.is_empty() {
            return Ok(allocations);
        }

        let batch = allocations.iter().fold(LedgerBatch::new(), |batch, a| {
            batch.push(a.key(), LedgerOp::Reserve, a.quantity, Some(a.order_entry_id))
        });

        match self.ledger.apply(batch).await {
            Ok(_) => {
                metrics::counter!("stock_reservations_total", "outcome" => "reserved").increment(1);
                tracing::info!(allocations = allocations.len(), "stock reserved");
                Ok(allocations)
            }
            Err(err) => {
                let outcome = match &err {
                    InventoryError::InsufficientStock { .. } => "insufficient",
                    InventoryError::LockTimeout { .. } => "timeout",
                    _ => "error",
                };
                metrics::counter!("stock_reservations_total", "outcome" => outcome).increment(1);
                if err.is_business_outcome() {
                    tracing::warn!(error = %err, "reservation rejected");
                }
                Err(err)
            }
        }
    }

    /// Releases the reservation of every physical entry.
    ///
    /// Must be called at most once per successful reservation.
    #[tracing::instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn release_for_order(&self, entries: &[OrderEntry]) -> Result<()> {
        let allocations = self.resolve(entries).await?;
        self.release_allocations(&allocations).await
    }

    /// Releases exactly the given allocations, all or nothing.
    #[tracing::instrument(skip(self, allocations), fields(allocations = allocations.len()))]
    pub async fn release_allocations(&self, allocations: &[Allocation]) -> Result<()> {
        if allocations.is_empty() {
            return Ok(());
        }

        let batch = allocations.iter().fold(LedgerBatch::new(), |batch, a| {
            batch.push(a.key(), LedgerOp::Release, a.quantity, Some(a.order_entry_id))
        });
        self.ledger.apply(batch).await?;
        tracing::info!(allocations = allocations.len(), "stock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::City;
    use domain::Money;

    use super::*;
    use crate::memory::InMemoryStockLedger;
    use crate::warehouse::{
        InMemoryWarehouseDirectory, LedgerWarehouseSelector, Warehouse, WarehouseDirectory,
    };

    type TestService = ReservationService<
        InMemoryStockLedger,
        LedgerWarehouseSelector<InMemoryWarehouseDirectory, InMemoryStockLedger>,
    >;

    struct Fixture {
        service: TestService,
        ledger: InMemoryStockLedger,
        hanoi: Warehouse,
        danang: Warehouse,
    }

    async fn fixture() -> Fixture {
        let ledger = InMemoryStockLedger::new();
        let directory = InMemoryWarehouseDirectory::new();
        let hanoi = Warehouse::new("HN-01", "Hanoi Central", City::Hanoi);
        let danang = Warehouse::new("DN-01", "Da Nang Port", City::DaNang);
        directory.register(hanoi.clone()).await.unwrap();
        directory.register(danang.clone()).await.unwrap();

        let selector = LedgerWarehouseSelector::new(directory, ledger.clone());
        Fixture {
            service: ReservationService::new(ledger.clone(), selector),
            ledger,
            hanoi,
            danang,
        }
    }

    fn physical(book: BookId, qty: u32, city: City) -> OrderEntry {
        OrderEntry::physical(book, qty, Money::from_cents(1000), city)
    }

    #[tokio::test]
    async fn test_reserves_across_warehouses() {
        let f = fixture().await;
        let book = BookId::new();
        f.ledger.restock(LedgerKey::new(book, f.hanoi.id), 5).await.unwrap();
        f.ledger.restock(LedgerKey::new(book, f.danang.id), 5).await.unwrap();

        let entries = vec![
            physical(book, 2, City::Hanoi),
            physical(book, 3, City::DaNang),
            OrderEntry::digital(BookId::new(), 1, Money::from_cents(500)),
        ];
        let allocations = f.service.reserve_for_order(&entries).await.unwrap();

        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].warehouse_id, f.hanoi.id);
        assert_eq!(allocations[1].warehouse_id, f.danang.id);
        assert_eq!(f.ledger.available(LedgerKey::new(book, f.hanoi.id)).await.unwrap(), 3);
        assert_eq!(f.ledger.available(LedgerKey::new(book, f.danang.id)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_digital_only_order_touches_nothing() {
        let f = fixture().await;
        let entries = vec![OrderEntry::digital(BookId::new(), 3, Money::from_cents(500))];

        let allocations = f.service.reserve_for_order(&entries).await.unwrap();
        assert!(allocations.is_empty());
        assert_eq!(f.ledger.row_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_names_entry() {
        let f = fixture().await;
        let plenty = BookId::new();
        let scarce = BookId::new();
        let plenty_key = LedgerKey::new(plenty, f.hanoi.id);
        let scarce_key = LedgerKey::new(scarce, f.hanoi.id);
        f.ledger.restock(plenty_key, 10).await.unwrap();
        f.ledger.restock(scarce_key, 1).await.unwrap();
        let before = f.ledger.snapshot(&[plenty_key, scarce_key]).await.unwrap();

        let short_entry = physical(scarce, 2, City::Hanoi);
        let entries = vec![physical(plenty, 4, City::Hanoi), short_entry.clone()];
        let err = f.service.reserve_for_order(&entries).await.unwrap_err();

        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                entry_id: Some(id),
                requested: 2,
                available: 1,
                ..
            } if id == short_entry.id
        ));
        assert_eq!(
            f.ledger.snapshot(&[plenty_key, scarce_key]).await.unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn test_untracked_book_is_out_of_stock() {
        let f = fixture().await;
        let entry = physical(BookId::new(), 1, City::Hanoi);

        let err = f.service.reserve_for_order(&[entry.clone()]).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock { available: 0, entry_id: Some(id), .. } if id == entry.id
        ));
    }

    #[tokio::test]
    async fn test_restock_requires_registered_warehouse() {
        let f = fixture().await;
        let book = BookId::new();
        let stray = WarehouseId::new();

        let err = f.service.restock(book, stray, 5).await.unwrap_err();
        assert!(matches!(err, InventoryError::UnknownWarehouse(id) if id == stray));
        assert!(
            f.ledger
                .stock_level(LedgerKey::new(book, stray))
                .await
                .unwrap()
                .is_none()
        );

        let level = f.service.restock(book, f.hanoi.id, 5).await.unwrap();
        assert_eq!(level.quantity, 5);
    }

    #[tokio::test]
    async fn test_unserved_city_is_not_out_of_stock() {
        let f = fixture().await;
        let entry = physical(BookId::new(), 1, City::CanTho);

        let err = f.service.reserve_for_order(&[entry]).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::NoWarehouseForCity { city: City::CanTho }
        ));
    }

    #[tokio::test]
    async fn test_physical_entry_without_city() {
        let f = fixture().await;
        let mut entry = physical(BookId::new(), 1, City::Hanoi);
        entry.city = None;

        let err = f.service.reserve_for_order(&[entry]).await.unwrap_err();
        assert!(matches!(err, InventoryError::MissingCity { .. }));
    }

    #[tokio::test]
    async fn test_release_restores_reservation() {
        let f = fixture().await;
        let book = BookId::new();
        let key = LedgerKey::new(book, f.hanoi.id);
        f.ledger.restock(key, 5).await.unwrap();

        let entries = vec![physical(book, 3, City::Hanoi)];
        f.service.reserve_for_order(&entries).await.unwrap();
        assert_eq!(f.ledger.available(key).await.unwrap(), 2);

        f.service.release_for_order(&entries).await.unwrap();
        let level = f.ledger.stock_level(key).await.unwrap().unwrap();
        assert_eq!(level.reserved_quantity, 0);
        assert_eq!(level.quantity, 5);
    }

    #[tokio::test]
    async fn test_double_release_is_invariant_violation() {
        let f = fixture().await;
        let book = BookId::new();
        f.ledger.restock(LedgerKey::new(book, f.hanoi.id), 5).await.unwrap();

        let allocations = f
            .service
            .reserve_for_order(&[physical(book, 2, City::Hanoi)])
            .await
            .unwrap();
        f.service.release_allocations(&allocations).await.unwrap();

        let err = f.service.release_allocations(&allocations).await.unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_last_unit_goes_to_exactly_one_order() {
        let f = fixture().await;
        let book = BookId::new();
        let key = LedgerKey::new(book, f.hanoi.id);
        f.ledger.restock(key, 1).await.unwrap();

        let service = std::sync::Arc::new(f.service);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .reserve_for_order(&[physical(book, 1, City::Hanoi)])
                        .await
                })
            })
            .collect();

        let mut won = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(err) => assert!(matches!(err, InventoryError::InsufficientStock { .. })),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(f.ledger.stock_level(key).await.unwrap().unwrap().reserved_quantity, 1);
    }
}
