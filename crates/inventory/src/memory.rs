use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::LedgerKey;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::{Instant, timeout_at};

use crate::error::{InventoryError, Result};
use crate::ledger::{LedgerConfig, StockLedger, record_batch_failure, record_batch_success};
use crate::stock::{LedgerBatch, ReorderPolicy, StockLevel, apply_batch};

type Row = Arc<Mutex<StockLevel>>;

/// In-memory stock ledger with one async mutex per row.
///
/// The row table itself is only locked long enough to look up or insert row
/// handles, so batches on disjoint keys never wait for each other.
#[derive(Clone, Default)]
pub struct InMemoryStockLedger {
    rows: Arc<RwLock<HashMap<LedgerKey, Row>>>,
    config: LedgerConfig,
}

impl InMemoryStockLedger {
    /// Creates an empty ledger with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty ledger with the given settings.
    pub fn with_config(config: LedgerConfig) -> Self {
        Self {
            rows: Arc::default(),
            config,
        }
    }

    /// Returns the number of tracked rows.
    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Returns row handles for every key, creating rows for restocked keys.
    async fn handles(&self, batch: &LedgerBatch) -> Vec<(LedgerKey, Option<Row>)> {
        let restocked = batch.restocked_keys();
        let missing_restock = {
            let rows = self.rows.read().await;
            restocked.iter().any(|key| !rows.contains_key(key))
        };

        if missing_restock {
            let mut rows = self.rows.write().await;
            for key in &restocked {
                rows.entry(*key).or_insert_with(|| {
                    Arc::new(Mutex::new(StockLevel::empty(*key, ReorderPolicy::default())))
                });
            }
        }

        let rows = self.rows.read().await;
        batch
            .keys()
            .into_iter()
            .map(|key| (key, rows.get(&key).cloned()))
            .collect()
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn apply(&self, batch: LedgerBatch) -> Result<Vec<StockLevel>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        // Handles come back in ascending key order, which is the lock order.
        let handles = self.handles(&batch).await;
        let deadline = Instant::now() + self.config.lock_timeout;

        let mut guards: Vec<(LedgerKey, OwnedMutexGuard<StockLevel>)> =
            Vec::with_capacity(handles.len());
        let mut working: BTreeMap<LedgerKey, Option<StockLevel>> = BTreeMap::new();
        for (key, handle) in handles {
            match handle {
                Some(row) => {
                    let guard = timeout_at(deadline, row.lock_owned()).await.map_err(|_| {
                        let err = InventoryError::LockTimeout { key: Some(key) };
                        record_batch_failure(&err);
                        err
                    })?;
                    working.insert(key, Some(guard.clone()));
                    guards.push((key, guard));
                }
                None => {
                    working.insert(key, None);
                }
            }
        }

        if let Err(err) = apply_batch(&mut working, &batch, Utc::now()) {
            record_batch_failure(&err);
            return Err(err);
        }

        // Commit: no await point between the first and the last write.
        let mut updated = Vec::with_capacity(guards.len());
        for (key, mut guard) in guards {
            if let Some(Some(row)) = working.remove(&key) {
                *guard = row;
                updated.push(guard.clone());
            }
        }
        record_batch_success(&batch);
        Ok(updated)
    }

    async fn track(&self, key: LedgerKey, policy: ReorderPolicy) -> Result<StockLevel> {
        let row = {
            let mut rows = self.rows.write().await;
            rows.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(StockLevel::empty(key, policy))))
                .clone()
        };
        let guard = row.lock().await;
        Ok(guard.clone())
    }

    async fn stock_level(&self, key: LedgerKey) -> Result<Option<StockLevel>> {
        let row = self.rows.read().await.get(&key).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }
}
