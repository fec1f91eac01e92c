//! Stock counters and the mutations applied to them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use common::{BookId, LedgerKey, OrderEntryId, WarehouseId};
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};

/// Restocking thresholds for a stock row. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderPolicy {
    pub reorder_level: u32,
    pub reorder_quantity: u32,
}

impl ReorderPolicy {
    pub fn new(reorder_level: u32, reorder_quantity: u32) -> Self {
        Self {
            reorder_level,
            reorder_quantity,
        }
    }
}

/// On-hand and reserved units of one book at one warehouse.
///
/// Values handed out by a ledger are snapshots; the ledger keeps the
/// authoritative row and guarantees `reserved_quantity <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub book_id: BookId,
    pub warehouse_id: WarehouseId,
    pub quantity: u32,
    pub reserved_quantity: u32,
    pub reorder_level: u32,
    pub reorder_quantity: u32,
    pub last_restocked: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// Creates an empty row for a book the warehouse starts carrying.
    pub fn empty(key: LedgerKey, policy: ReorderPolicy) -> Self {
        Self {
            book_id: key.book_id,
            warehouse_id: key.warehouse_id,
            quantity: 0,
            reserved_quantity: 0,
            reorder_level: policy.reorder_level,
            reorder_quantity: policy.reorder_quantity,
            last_restocked: None,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(self.book_id, self.warehouse_id)
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> u32 {
        self.quantity.saturating_sub(self.reserved_quantity)
    }

    /// Returns true when available stock has dropped to the reorder level.
    pub fn needs_reorder(&self) -> bool {
        self.available() <= self.reorder_level
    }

    /// Applies one mutation in place, or leaves the row untouched on error.
    pub fn apply(&mut self, op: LedgerOp, delta: u32, now: DateTime<Utc>) -> Result<()> {
        let key = self.key();
        if delta == 0 {
            return Err(InventoryError::InvalidQuantity { key, operation: op });
        }

        match op {
            LedgerOp::Reserve => {
                let available = self.available();
                if delta > available {
                    return Err(InventoryError::InsufficientStock {
                        key,
                        requested: delta,
                        available,
                        entry_id: None,
                    });
                }
                self.reserved_quantity += delta;
            }
            LedgerOp::Release => {
                if delta > self.reserved_quantity {
                    return Err(InventoryError::InvariantViolation {
                        key,
                        operation: op,
                        detail: format!(
                            "release of {delta} exceeds reserved {}",
                            self.reserved_quantity
                        ),
                    });
                }
                self.reserved_quantity -= delta;
            }
            LedgerOp::Consume => {
                if delta > self.reserved_quantity || delta > self.quantity {
                    return Err(InventoryError::InvariantViolation {
                        key,
                        operation: op,
                        detail: format!(
                            "consume of {delta} exceeds reserved {} / on hand {}",
                            self.reserved_quantity, self.quantity
                        ),
                    });
                }
                self.quantity -= delta;
                self.reserved_quantity -= delta;
            }
            LedgerOp::Restock => {
                self.quantity = self.quantity.checked_add(delta).ok_or_else(|| {
                    InventoryError::InvariantViolation {
                        key,
                        operation: op,
                        detail: format!("restock of {delta} overflows on hand {}", self.quantity),
                    }
                })?;
                self.last_restocked = Some(now);
            }
        }

        self.updated_at = now;
        Ok(())
    }
}

/// The kinds of change a ledger row accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOp {
    /// Hold units for an unshipped order.
    Reserve,
    /// Return held units to available stock.
    Release,
    /// Ship held units: both on-hand and reserved drop.
    Consume,
    /// Receive new units.
    Restock,
}

impl LedgerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOp::Reserve => "reserve",
            LedgerOp::Release => "release",
            LedgerOp::Consume => "consume",
            LedgerOp::Restock => "restock",
        }
    }
}

impl std::fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One change to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMutation {
    pub key: LedgerKey,
    pub op: LedgerOp,
    pub delta: u32,
    /// The order entry the change is made for, reported back on failure.
    pub entry_id: Option<OrderEntryId>,
}

/// An all-or-nothing group of mutations.
///
/// Mutations apply in insertion order; a key may appear more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerBatch {
    mutations: Vec<LedgerMutation>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch holding a single mutation.
    pub fn single(key: LedgerKey, op: LedgerOp, delta: u32) -> Self {
        Self::new().push(key, op, delta, None)
    }

    pub fn push(
        mut self,
        key: LedgerKey,
        op: LedgerOp,
        delta: u32,
        entry_id: Option<OrderEntryId>,
    ) -> Self {
        self.mutations.push(LedgerMutation {
            key,
            op,
            delta,
            entry_id,
        });
        self
    }

    pub fn mutations(&self) -> &[LedgerMutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Distinct keys in lock order.
    pub fn keys(&self) -> BTreeSet<LedgerKey> {
        self.mutations.iter().map(|m| m.key).collect()
    }

    /// Keys that receive a restock and may be created on the fly.
    pub fn restocked_keys(&self) -> BTreeSet<LedgerKey> {
        self.mutations
            .iter()
            .filter(|m| m.op == LedgerOp::Restock)
            .map(|m| m.key)
            .collect()
    }
}

/// Applies a batch to working copies of the locked rows.
///
/// `rows` holds one slot per key of the batch; `None` marks a row that does
/// not exist. Reserving from a missing row reports zero available stock;
/// releasing or consuming from one is an invariant violation. On error the
/// caller must discard `rows`.
pub fn apply_batch(
    rows: &mut BTreeMap<LedgerKey, Option<StockLevel>>,
    batch: &LedgerBatch,
    now: DateTime<Utc>,
) -> Result<()> {
    for mutation in batch.mutations() {
        let slot = rows.entry(mutation.key).or_insert(None);
        let result = match slot {
            Some(row) => row.apply(mutation.op, mutation.delta, now),
            None if mutation.delta == 0 => Err(InventoryError::InvalidQuantity {
                key: mutation.key,
                operation: mutation.op,
            }),
            None if mutation.op == LedgerOp::Reserve => Err(InventoryError::InsufficientStock {
                key: mutation.key,
                requested: mutation.delta,
                available: 0,
                entry_id: None,
            }),
            None => Err(InventoryError::InvariantViolation {
                key: mutation.key,
                operation: mutation.op,
                detail: "stock row does not exist".to_string(),
            }),
        };

        result.map_err(|err| match err {
            InventoryError::InsufficientStock {
                key,
                requested,
                available,
                ..
            } => InventoryError::InsufficientStock {
                key,
                requested,
                available,
                entry_id: mutation.entry_id,
            },
            other => other,
        })?;
    }
    Ok(())
}
