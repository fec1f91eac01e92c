use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use common::{BookId, City, LedgerKey, WarehouseId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{InventoryError, Result};
use crate::ledger::{LedgerConfig, StockLedger, record_batch_failure, record_batch_success};
use crate::stock::{LedgerBatch, ReorderPolicy, StockLevel, apply_batch};
use crate::warehouse::{Warehouse, WarehouseContact, WarehouseDirectory};

/// PostgreSQL SQLSTATE for `lock_not_available`.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// PostgreSQL SQLSTATE for `deadlock_detected`.
const DEADLOCK_DETECTED: &str = "40P01";
/// PostgreSQL SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

const STOCK_COLUMNS: &str = "book_id, warehouse_id, quantity, reserved_quantity, reorder_level, \
                             reorder_quantity, last_restocked, updated_at";

const WAREHOUSE_COLUMNS: &str = "id, code, name, city, address, phone, email";

/// PostgreSQL-backed stock ledger.
///
/// Each batch runs in one transaction that row-locks its keys with
/// `SELECT ... FOR UPDATE` in ascending (warehouse, book) order under a
/// transaction-local `lock_timeout`.
#[derive(Clone)]
pub struct PostgresStockLedger {
    pool: PgPool,
    config: LedgerConfig,
}

impl PostgresStockLedger {
    /// Creates a new PostgreSQL stock ledger.
    pub fn new(pool: PgPool, config: LedgerConfig) -> Self {
        Self { pool, config }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn insert_if_missing(&self, key: LedgerKey, policy: ReorderPolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_levels (book_id, warehouse_id, reorder_level, reorder_quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (book_id, warehouse_id) DO NOTHING
            "#,
        )
        .bind(key.book_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(i64::from(policy.reorder_level))
        .bind(i64::from(policy.reorder_quantity))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_level(row: PgRow) -> Result<StockLevel> {
        let key = LedgerKey::new(
            BookId::from_uuid(row.try_get::<Uuid, _>("book_id")?),
            WarehouseId::from_uuid(row.try_get::<Uuid, _>("warehouse_id")?),
        );
        let counter = |column: &str| -> Result<u32> {
            let value: i64 = row.try_get(column)?;
            u32::try_from(value).map_err(|_| InventoryError::Database(sqlx::Error::ColumnDecode {
                index: column.to_string(),
                source: format!("{value} out of range for {key}").into(),
            }))
        };

        Ok(StockLevel {
            book_id: key.book_id,
            warehouse_id: key.warehouse_id,
            quantity: counter("quantity")?,
            reserved_quantity: counter("reserved_quantity")?,
            reorder_level: counter("reorder_level")?,
            reorder_quantity: counter("reorder_quantity")?,
            last_restocked: row.try_get("last_restocked")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Maps lock waits and deadlocks to the retryable timeout error.
fn map_db_error(err: sqlx::Error) -> InventoryError {
    if let sqlx::Error::Database(ref db_err) = err
        && matches!(
            db_err.code().as_deref(),
            Some(LOCK_NOT_AVAILABLE) | Some(DEADLOCK_DETECTED)
        )
    {
        let timeout = InventoryError::LockTimeout { key: None };
        record_batch_failure(&timeout);
        return timeout;
    }
    InventoryError::Database(err)
}

#[async_trait]
impl StockLedger for PostgresStockLedger {
    async fn apply(&self, batch: LedgerBatch) -> Result<Vec<StockLevel>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        for key in batch.restocked_keys() {
            self.insert_if_missing(key, ReorderPolicy::default()).await?;
        }

        let keys = batch.keys();
        let warehouse_ids: Vec<Uuid> = keys.iter().map(|k| k.warehouse_id.as_uuid()).collect();
        let book_ids: Vec<Uuid> = keys.iter().map(|k| k.book_id.as_uuid()).collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.config.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT s.*
            FROM stock_levels s
            JOIN UNNEST($1::uuid[], $2::uuid[]) AS k(warehouse_id, book_id)
              ON s.warehouse_id = k.warehouse_id AND s.book_id = k.book_id
            ORDER BY s.warehouse_id, s.book_id
            FOR UPDATE OF s
            "#,
        )
        .bind(&warehouse_ids)
        .bind(&book_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_error)?;

        let mut working: BTreeMap<LedgerKey, Option<StockLevel>> =
            keys.iter().map(|k| (*k, None)).collect();
        for row in rows {
            let level = Self::row_to_level(row)?;
            working.insert(level.key(), Some(level));
        }

        if let Err(err) = apply_batch(&mut working, &batch, Utc::now()) {
            record_batch_failure(&err);
            return Err(err);
        }

        let mut updated = Vec::with_capacity(working.len());
        for level in working.into_values().flatten() {
            sqlx::query(
                r#"
                UPDATE stock_levels
                SET quantity = $3, reserved_quantity = $4, last_restocked = $5, updated_at = $6
                WHERE book_id = $1 AND warehouse_id = $2
                "#,
            )
            .bind(level.book_id.as_uuid())
            .bind(level.warehouse_id.as_uuid())
            .bind(i64::from(level.quantity))
            .bind(i64::from(level.reserved_quantity))
            .bind(level.last_restocked)
            .bind(level.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
            updated.push(level);
        }

        tx.commit().await.map_err(map_db_error)?;
        record_batch_success(&batch);
        Ok(updated)
    }

    async fn track(&self, key: LedgerKey, policy: ReorderPolicy) -> Result<StockLevel> {
        self.insert_if_missing(key, policy).await?;
        self.stock_level(key)
            .await?
            .ok_or(InventoryError::StockNotTracked {
                book_id: key.book_id,
                warehouse_id: key.warehouse_id,
            })
    }

    async fn stock_level(&self, key: LedgerKey) -> Result<Option<StockLevel>> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_levels WHERE book_id = $1 AND warehouse_id = $2"
        ))
        .bind(key.book_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_level).transpose()
    }
}

/// PostgreSQL-backed warehouse directory.
#[derive(Clone)]
pub struct PostgresWarehouseDirectory {
    pool: PgPool,
}

impl PostgresWarehouseDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_warehouse(row: PgRow) -> Result<Warehouse> {
        let city: String = row.try_get("city")?;
        let city: City = city
            .parse()
            .map_err(|e| InventoryError::Database(sqlx::Error::Decode(Box::new(e))))?;

        Ok(Warehouse {
            id: WarehouseId::from_uuid(row.try_get::<Uuid, _>("id")?),
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            city,
            contact: WarehouseContact {
                address: row.try_get("address")?,
                phone: row.try_get("phone")?,
                email: row.try_get("email")?,
            },
        })
    }
}

#[async_trait]
impl WarehouseDirectory for PostgresWarehouseDirectory {
    async fn register(&self, warehouse: Warehouse) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO warehouses (id, code, name, city, address, phone, email)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(warehouse.id.as_uuid())
        .bind(&warehouse.code)
        .bind(&warehouse.name)
        .bind(warehouse.city.as_str())
        .bind(&warehouse.contact.address)
        .bind(&warehouse.contact.phone)
        .bind(&warehouse.contact.email)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
            {
                return InventoryError::DuplicateWarehouse(format!(
                    "{} ({})",
                    warehouse.code,
                    db_err.constraint().unwrap_or("unique constraint")
                ));
            }
            InventoryError::Database(e)
        })?;

        tracing::info!(code = %warehouse.code, city = %warehouse.city, "warehouse registered");
        Ok(())
    }

    async fn by_city(&self, city: City) -> Result<Option<Warehouse>> {
        let row = sqlx::query(&format!("SELECT {WAREHOUSE_COLUMNS} FROM warehouses WHERE city = $1"))
            .bind(city.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_warehouse).transpose()
    }

    async fn by_id(&self, id: WarehouseId) -> Result<Option<Warehouse>> {
        let row = sqlx::query(&format!("SELECT {WAREHOUSE_COLUMNS} FROM warehouses WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_warehouse).transpose()
    }

    async fn all(&self) -> Result<Vec<Warehouse>> {
        let rows = sqlx::query(&format!(
            "SELECT {WAREHOUSE_COLUMNS} FROM warehouses ORDER BY code"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_warehouse).collect()
    }
}
