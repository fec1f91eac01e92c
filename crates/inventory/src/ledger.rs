//! The stock ledger abstraction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::LedgerKey;

use crate::error::{InventoryError, Result};
use crate::stock::{LedgerBatch, LedgerOp, ReorderPolicy, StockLevel};

/// Tuning shared by ledger backends.
#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    /// Upper bound on the wait for every row lock of one batch.
    pub lock_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
        }
    }
}

/// Source of truth for on-hand and reserved stock per (book, warehouse).
///
/// Every mutation goes through [`apply`](StockLedger::apply): the backend
/// locks all keys of the batch in ascending [`LedgerKey`] order within
/// [`LedgerConfig::lock_timeout`], applies every mutation, and commits only if
/// all of them succeed. A failed or abandoned batch leaves every row unchanged.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Applies a batch atomically and returns the touched rows after the change.
    async fn apply(&self, batch: LedgerBatch) -> Result<Vec<StockLevel>>;

    /// Creates an empty row for the key if none exists and returns the current row.
    async fn track(&self, key: LedgerKey, policy: ReorderPolicy) -> Result<StockLevel>;

    /// Returns the current row, if the warehouse stocks the book.
    async fn stock_level(&self, key: LedgerKey) -> Result<Option<StockLevel>>;

    /// Returns current rows for the given keys, skipping untracked ones.
    async fn snapshot(&self, keys: &[LedgerKey]) -> Result<Vec<StockLevel>> {
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = self.stock_level(*key).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Units available to reserve. Untracked stock counts as zero.
    ///
    /// Advisory only: the value may be stale as soon as it is returned.
    async fn available(&self, key: LedgerKey) -> Result<u32> {
        Ok(self
            .stock_level(key)
            .await?
            .map(|row| row.available())
            .unwrap_or(0))
    }

    /// Holds `delta` units for an unshipped order.
    async fn reserve(&self, key: LedgerKey, delta: u32) -> Result<StockLevel> {
        self.apply_single(key, LedgerOp::Reserve, delta).await
    }

    /// Returns `delta` held units to available stock.
    async fn release(&self, key: LedgerKey, delta: u32) -> Result<StockLevel> {
        self.apply_single(key, LedgerOp::Release, delta).await
    }

    /// Ships `delta` held units out of the warehouse.
    async fn consume(&self, key: LedgerKey, delta: u32) -> Result<StockLevel> {
        self.apply_single(key, LedgerOp::Consume, delta).await
    }

    /// Receives `delta` new units, creating the row if needed.
    async fn restock(&self, key: LedgerKey, delta: u32) -> Result<StockLevel> {
        self.apply_single(key, LedgerOp::Restock, delta).await
    }

    #[doc(hidden)]
    async fn apply_single(&self, key: LedgerKey, op: LedgerOp, delta: u32) -> Result<StockLevel> {
        self.apply(LedgerBatch::single(key, op, delta))
            .await?
            .into_iter()
            .next()
            .ok_or(InventoryError::StockNotTracked {
                book_id: key.book_id,
                warehouse_id: key.warehouse_id,
            })
    }
}

#[async_trait]
impl<T: StockLedger + ?Sized> StockLedger for Arc<T> {
    async fn apply(&self, batch: LedgerBatch) -> Result<Vec<StockLevel>> {
        (**self).apply(batch).await
    }

    async fn track(&self, key: LedgerKey, policy: ReorderPolicy) -> Result<StockLevel> {
        (**self).track(key, policy).await
    }

    async fn stock_level(&self, key: LedgerKey) -> Result<Option<StockLevel>> {
        (**self).stock_level(key).await
    }

    async fn snapshot(&self, keys: &[LedgerKey]) -> Result<Vec<StockLevel>> {
        (**self).snapshot(keys).await
    }
}

/// Logs and counts a failed batch the way every backend reports it.
pub(crate) fn record_batch_failure(err: &InventoryError) {
    match err {
        InventoryError::InvariantViolation {
            key,
            operation,
            detail,
        } => {
            metrics::counter!("stock_invariant_violations_total").increment(1);
            tracing::error!(%key, %operation, %detail, "stock ledger invariant violation");
        }
        InventoryError::LockTimeout { key } => {
            metrics::counter!("stock_lock_timeouts_total").increment(1);
            tracing::warn!(key = ?key, "timed out waiting for stock lock");
        }
        InventoryError::InsufficientStock {
            key,
            requested,
            available,
            ..
        } => {
            tracing::debug!(%key, requested, available, "insufficient stock");
        }
        other => {
            tracing::warn!(error = %other, "stock batch rejected");
        }
    }
}

/// Counts units that physically left a warehouse.
pub(crate) fn record_batch_success(batch: &LedgerBatch) {
    let consumed: u64 = batch
        .mutations()
        .iter()
        .filter(|m| m.op == LedgerOp::Consume)
        .map(|m| u64::from(m.delta))
        .sum();
    if consumed > 0 {
        metrics::counter!("stock_units_consumed_total").increment(consumed);
    }
}
