//! PostgreSQL-backed order and consignment stores.
//!
//! Aggregates are stored whole as JSONB `state`, the way snapshots are. Entry
//! rows are written next to them so lookups by entry and the one-consignment-
//! per-order-entry rule live in the schema.

use async_trait::async_trait;
use chrono::Utc;
use common::{ConsignmentEntryId, ConsignmentId, OrderId};
use domain::{Consignment, Order};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{FulfillmentError, Result};
use crate::store::{ConsignmentStore, OrderStore};

/// Primary key constraint of the `orders` table.
const ORDERS_PKEY: &str = "orders_pkey";

fn decode<T: serde::de::DeserializeOwned>(row: PgRow) -> Result<T> {
    let state: serde_json::Value = row.try_get("state")?;
    Ok(serde_json::from_value(state)?)
}

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let order_id = order.id();
        let state = serde_json::to_value(&order)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, status, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(order.status().as_str())
        .bind(state)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(ORDERS_PKEY)
            {
                return FulfillmentError::DuplicateOrder(order_id);
            }
            FulfillmentError::Database(e)
        })?;

        for (position, entry) in order.entries().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_entries (id, order_id, position, book_id, item_type, quantity, city)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(position as i32)
            .bind(entry.book_id.as_uuid())
            .bind(entry.item_type.as_str())
            .bind(i64::from(entry.quantity))
            .bind(entry.city.map(|c| c.as_str()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT state FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode).transpose()
    }

    async fn save(&self, order: Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET status = $2, state = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.status().as_str())
        .bind(serde_json::to_value(&order)?)
        .bind(order.updated_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FulfillmentError::OrderNotFound(order.id()));
        }
        Ok(())
    }
}

/// PostgreSQL-backed consignment store.
///
/// A plan is marked by a `consignment_plans` row, so an order whose plan has
/// no consignments still counts as planned.
#[derive(Clone)]
pub struct PostgresConsignmentStore {
    pool: PgPool,
}

impl PostgresConsignmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConsignmentStore for PostgresConsignmentStore {
    async fn insert_plan(&self, order_id: OrderId, consignments: Vec<Consignment>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            "INSERT INTO consignment_plans (order_id) VALUES ($1) ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await?;
        if marked.rows_affected() == 0 {
            return Ok(false);
        }

        for (position, consignment) in consignments.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO consignments (id, order_id, warehouse_id, position, status, state, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(consignment.id().as_uuid())
            .bind(order_id.as_uuid())
            .bind(consignment.warehouse_id().as_uuid())
            .bind(position as i32)
            .bind(consignment.status().as_str())
            .bind(serde_json::to_value(consignment)?)
            .bind(consignment.updated_at())
            .execute(&mut *tx)
            .await?;

            for entry in consignment.entries() {
                sqlx::query(
                    r#"
                    INSERT INTO consignment_entries
                        (id, consignment_id, order_entry_id, book_id, quantity, shipped_quantity)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(entry.id().as_uuid())
                .bind(consignment.id().as_uuid())
                .bind(entry.order_entry_id().as_uuid())
                .bind(entry.book_id().as_uuid())
                .bind(i64::from(entry.quantity()))
                .bind(i64::from(entry.shipped_quantity()))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Consignment>> {
        let rows = sqlx::query("SELECT state FROM consignments WHERE order_id = $1 ORDER BY position")
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(decode).collect()
    }

    async fn get(&self, id: ConsignmentId) -> Result<Option<Consignment>> {
        let row = sqlx::query("SELECT state FROM consignments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode).transpose()
    }

    async fn find_by_entry(&self, entry_id: ConsignmentEntryId) -> Result<Option<Consignment>> {
        let row = sqlx::query(
            r#"
            SELECT c.state
            FROM consignments c
            JOIN consignment_entries e ON e.consignment_id = c.id
            WHERE e.id = $1
            "#,
        )
        .bind(entry_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(decode).transpose()
    }

    async fn save(&self, consignment: Consignment) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE consignments SET status = $2, state = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(consignment.id().as_uuid())
        .bind(consignment.status().as_str())
        .bind(serde_json::to_value(&consignment)?)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(FulfillmentError::ConsignmentNotFound(consignment.id()));
        }

        for entry in consignment.entries() {
            sqlx::query("UPDATE consignment_entries SET shipped_quantity = $2 WHERE id = $1")
                .bind(entry.id().as_uuid())
                .bind(i64::from(entry.shipped_quantity()))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_for_order(&self, order_id: OrderId) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM consignments WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM consignment_plans WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed as usize)
    }
}
