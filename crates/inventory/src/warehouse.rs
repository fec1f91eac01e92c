//! Warehouses and the per-city warehouse lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{BookId, City, LedgerKey, WarehouseId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{InventoryError, Result};
use crate::ledger::StockLedger;

/// Contact details of a warehouse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseContact {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A physical stock location. Each warehouse serves exactly one city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    #[serde(default)]
    pub id: WarehouseId,
    pub code: String,
    pub name: String,
    pub city: City,
    #[serde(default)]
    pub contact: WarehouseContact,
}

impl Warehouse {
    pub fn new(code: impl Into<String>, name: impl Into<String>, city: City) -> Self {
        Self {
            id: WarehouseId::new(),
            code: code.into(),
            name: name.into(),
            city,
            contact: WarehouseContact::default(),
        }
    }
}

/// Registry of warehouses, unique by id, code and city.
#[async_trait]
pub trait WarehouseDirectory: Send + Sync {
    /// Adds a warehouse, rejecting a second one for the same city or code.
    async fn register(&self, warehouse: Warehouse) -> Result<()>;

    async fn by_city(&self, city: City) -> Result<Option<Warehouse>>;

    async fn by_id(&self, id: WarehouseId) -> Result<Option<Warehouse>>;

    async fn all(&self) -> Result<Vec<Warehouse>>;
}

#[async_trait]
impl<T: WarehouseDirectory + ?Sized> WarehouseDirectory for Arc<T> {
    async fn register(&self, warehouse: Warehouse) -> Result<()> {
        (**self).register(warehouse).await
    }

    async fn by_city(&self, city: City) -> Result<Option<Warehouse>> {
        (**self).by_city(city).await
    }

    async fn by_id(&self, id: WarehouseId) -> Result<Option<Warehouse>> {
        (**self).by_id(id).await
    }

    async fn all(&self) -> Result<Vec<Warehouse>> {
        (**self).all().await
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    warehouses: HashMap<WarehouseId, Warehouse>,
    by_city: HashMap<City, WarehouseId>,
}

/// In-memory warehouse directory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWarehouseDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryWarehouseDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WarehouseDirectory for InMemoryWarehouseDirectory {
    async fn register(&self, warehouse: Warehouse) -> Result<()> {
        let mut state = self.state.write().await;

        if state.by_city.contains_key(&warehouse.city) {
            return Err(InventoryError::DuplicateWarehouse(format!(
                "city {} already has a warehouse",
                warehouse.city
            )));
        }
        if state.warehouses.contains_key(&warehouse.id)
            || state.warehouses.values().any(|w| w.code == warehouse.code)
        {
            return Err(InventoryError::DuplicateWarehouse(format!(
                "warehouse {} ({}) already registered",
                warehouse.code, warehouse.id
            )));
        }

        tracing::info!(code = %warehouse.code, city = %warehouse.city, "warehouse registered");
        state.by_city.insert(warehouse.city, warehouse.id);
        state.warehouses.insert(warehouse.id, warehouse);
        Ok(())
    }

    async fn by_city(&self, city: City) -> Result<Option<Warehouse>> {
        let state = self.state.read().await;
        Ok(state
            .by_city
            .get(&city)
            .and_then(|id| state.warehouses.get(id))
            .cloned())
    }

    async fn by_id(&self, id: WarehouseId) -> Result<Option<Warehouse>> {
        Ok(self.state.read().await.warehouses.get(&id).cloned())
    }

    async fn all(&self) -> Result<Vec<Warehouse>> {
        let mut all: Vec<_> = self.state.read().await.warehouses.values().cloned().collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(all)
    }
}

/// Picks the warehouse that fulfills a physical order entry.
#[async_trait]
pub trait WarehouseSelector: Send + Sync {
    /// Returns the warehouse serving `city` for `book_id`.
    ///
    /// Fails with `NoWarehouseForCity` when the city has no warehouse and
    /// with `StockNotTracked` when that warehouse never stocked the book.
    async fn select(&self, book_id: BookId, city: City) -> Result<Warehouse>;

    /// Looks up a registered warehouse.
    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>>;
}

/// Selector backed by a warehouse directory and a stock ledger.
///
/// Selection is a plain lookup: one warehouse per city, no load balancing.
#[derive(Clone)]
pub struct LedgerWarehouseSelector<D, L> {
    directory: D,
    ledger: L,
}

impl<D, L> LedgerWarehouseSelector<D, L>
where
    D: WarehouseDirectory,
    L: StockLedger,
{
    pub fn new(directory: D, ledger: L) -> Self {
        Self { directory, ledger }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }
}

#[async_trait]
impl<D, L> WarehouseSelector for LedgerWarehouseSelector<D, L>
where
    D: WarehouseDirectory,
    L: StockLedger,
{
    async fn select(&self, book_id: BookId, city: City) -> Result<Warehouse> {
        let warehouse = self
            .directory
            .by_city(city)
            .await?
            .ok_or(InventoryError::NoWarehouseForCity { city })?;

        let key = LedgerKey::new(book_id, warehouse.id);
        if self.ledger.stock_level(key).await?.is_none() {
            return Err(InventoryError::StockNotTracked {
                book_id,
                warehouse_id: warehouse.id,
            });
        }
        Ok(warehouse)
    }

    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>> {
        self.directory.by_id(id).await
    }
}
