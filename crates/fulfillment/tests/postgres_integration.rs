//! PostgreSQL integration tests for the order and consignment stores.
//!
//! These tests share one PostgreSQL container and truncate the tables before
//! each test, so they run serially. Run with:
//!
//! ```bash
//! cargo test -p fulfillment --test postgres_integration
//! ```

use std::sync::Arc;

use common::{BookId, City, OrderId};
use domain::{
    CarrierUpdate, Consignment, ConsignmentStatus, Money, Order, OrderEntry, OrderStatus,
    ShippingAddress,
};
use fulfillment::{
    ConsignmentStore, FulfillmentError, InMemoryEventSink, OrderFulfillmentCoordinator,
    OrderStore, PostgresConsignmentStore, PostgresOrderStore,
};
use inventory::{
    LedgerConfig, LedgerWarehouseSelector, PostgresStockLedger, PostgresWarehouseDirectory,
    ReservationService, Warehouse, WarehouseDirectory,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_stock_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/002_create_fulfillment_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

type PgCoordinator = OrderFulfillmentCoordinator<
    PostgresStockLedger,
    LedgerWarehouseSelector<PostgresWarehouseDirectory, PostgresStockLedger>,
    PostgresOrderStore,
    PostgresConsignmentStore,
    InMemoryEventSink,
>;

struct Fixture {
    pool: PgPool,
    orders: PostgresOrderStore,
    consignments: PostgresConsignmentStore,
    hanoi: Warehouse,
}

/// Fresh pool, cleared tables and one registered warehouse.
async fn fixture() -> Fixture {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE consignment_entries, consignments, consignment_plans, \
         order_entries, orders, stock_levels, warehouses CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    let directory = PostgresWarehouseDirectory::new(pool.clone());
    let hanoi = Warehouse::new("HN-01", "Hanoi Central", City::Hanoi);
    directory.register(hanoi.clone()).await.unwrap();

    Fixture {
        orders: PostgresOrderStore::new(pool.clone()),
        consignments: PostgresConsignmentStore::new(pool.clone()),
        pool,
        hanoi,
    }
}

/// A coordinator with nothing cached, as after a process restart.
fn coordinator(pool: &PgPool) -> PgCoordinator {
    let ledger = PostgresStockLedger::new(pool.clone(), LedgerConfig::default());
    let directory = PostgresWarehouseDirectory::new(pool.clone());
    OrderFulfillmentCoordinator::new(
        ReservationService::new(
            ledger.clone(),
            LedgerWarehouseSelector::new(directory, ledger),
        ),
        PostgresOrderStore::new(pool.clone()),
        PostgresConsignmentStore::new(pool.clone()),
        InMemoryEventSink::new(),
    )
}

fn order(entries: Vec<OrderEntry>) -> Order {
    Order::new(OrderId::new(), entries, ShippingAddress::default()).unwrap()
}

fn hanoi_book(book: BookId, quantity: u32) -> OrderEntry {
    OrderEntry::physical(book, quantity, Money::from_cents(1000), City::Hanoi)
}

#[tokio::test]
#[serial]
async fn order_round_trip() {
    let f = fixture().await;
    let order = order(vec![
        hanoi_book(BookId::new(), 2),
        OrderEntry::digital(BookId::new(), 1, Money::from_cents(500)),
    ]);
    let order_id = order.id();

    f.orders.insert(order.clone()).await.unwrap();
    let loaded = f.orders.get(order_id).await.unwrap().unwrap();
    assert_eq!(loaded.status(), OrderStatus::Pending);
    assert_eq!(loaded.entries(), order.entries());
    assert_eq!(loaded.total_amount(), order.total_amount());

    let err = f.orders.insert(order).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::DuplicateOrder(id) if id == order_id));

    let mut confirmed = loaded;
    confirmed.confirm().unwrap();
    f.orders.save(confirmed).await.unwrap();
    let loaded = f.orders.get(order_id).await.unwrap().unwrap();
    assert_eq!(loaded.status(), OrderStatus::Confirmed);

    let (status,): (String,) = sqlx::query_as("SELECT status FROM orders WHERE id = $1")
        .bind(order_id.as_uuid())
        .fetch_one(&f.pool)
        .await
        .unwrap();
    assert_eq!(status, "CONFIRMED");

    assert!(f.orders.get(OrderId::new()).await.unwrap().is_none());
    let stray = self::order(vec![hanoi_book(BookId::new(), 1)]);
    assert!(matches!(
        f.orders.save(stray).await,
        Err(FulfillmentError::OrderNotFound(_))
    ));
}

#[tokio::test]
#[serial]
async fn plan_is_written_once() {
    let f = fixture().await;
    let order = order(vec![hanoi_book(BookId::new(), 2), hanoi_book(BookId::new(), 1)]);
    let order_id = order.id();
    f.orders.insert(order.clone()).await.unwrap();

    let plan = vec![Consignment::plan(
        order_id,
        f.hanoi.id,
        ShippingAddress::default(),
        order.entries(),
    )];
    let consignment_id = plan[0].id();
    let entry_id = plan[0].entries()[1].id();

    assert!(f.consignments.insert_plan(order_id, plan.clone()).await.unwrap());
    let replan = vec![Consignment::plan(
        order_id,
        f.hanoi.id,
        ShippingAddress::default(),
        order.entries(),
    )];
    assert!(!f.consignments.insert_plan(order_id, replan).await.unwrap());

    let stored = f.consignments.for_order(order_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id(), consignment_id);
    assert_eq!(stored[0].entries().len(), 2);
    let found = f.consignments.find_by_entry(entry_id).await.unwrap().unwrap();
    assert_eq!(found.id(), consignment_id);

    assert_eq!(f.consignments.remove_for_order(order_id).await.unwrap(), 1);
    assert!(f.consignments.for_order(order_id).await.unwrap().is_empty());
    assert!(f.consignments.find_by_entry(entry_id).await.unwrap().is_none());
    assert!(f.consignments.insert_plan(order_id, plan).await.unwrap());
}

#[tokio::test]
#[serial]
async fn empty_plan_counts_as_planned() {
    let f = fixture().await;
    let order = order(vec![OrderEntry::digital(BookId::new(), 1, Money::from_cents(500))]);
    let order_id = order.id();
    f.orders.insert(order).await.unwrap();

    assert!(f.consignments.insert_plan(order_id, Vec::new()).await.unwrap());
    assert!(!f.consignments.insert_plan(order_id, Vec::new()).await.unwrap());
    assert!(f.consignments.for_order(order_id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn order_entry_ships_in_one_consignment() {
    let f = fixture().await;
    let order = order(vec![hanoi_book(BookId::new(), 1)]);
    let order_id = order.id();
    f.orders.insert(order.clone()).await.unwrap();

    let twice: Vec<Consignment> = (0..2)
        .map(|_| {
            Consignment::plan(
                order_id,
                f.hanoi.id,
                ShippingAddress::default(),
                order.entries(),
            )
        })
        .collect();
    let err = f.consignments.insert_plan(order_id, twice).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::Database(_)));

    // The whole plan rolled back, including its marker.
    assert!(f.consignments.for_order(order_id).await.unwrap().is_empty());
    let plan = vec![Consignment::plan(
        order_id,
        f.hanoi.id,
        ShippingAddress::default(),
        order.entries(),
    )];
    assert!(f.consignments.insert_plan(order_id, plan).await.unwrap());
}

#[tokio::test]
#[serial]
async fn shipment_progress_is_persisted() {
    let f = fixture().await;
    let coordinator = coordinator(&f.pool);
    let book = BookId::new();
    coordinator.restock(book, f.hanoi.id, 5).await.unwrap();

    let order = order(vec![hanoi_book(book, 3)]);
    let order_id = order.id();
    coordinator.place_order(order).await.unwrap();
    let consignments = coordinator.on_order_confirmed(order_id).await.unwrap();
    let consignment_id = consignments[0].id();
    let entry_id = consignments[0].entries()[0].id();

    coordinator.on_shipment(entry_id, 2).await.unwrap();
    let (shipped,): (i64,) =
        sqlx::query_as("SELECT shipped_quantity FROM consignment_entries WHERE id = $1")
            .bind(entry_id.as_uuid())
            .fetch_one(&f.pool)
            .await
            .unwrap();
    assert_eq!(shipped, 2);

    coordinator.on_shipment(entry_id, 1).await.unwrap();
    for status in [
        ConsignmentStatus::InTransit,
        ConsignmentStatus::OutForDelivery,
        ConsignmentStatus::Delivered,
    ] {
        coordinator
            .update_consignment_status(consignment_id, CarrierUpdate::to(status))
            .await
            .unwrap();
    }

    let order = f.orders.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Delivered);
    let consignment = f.consignments.get(consignment_id).await.unwrap().unwrap();
    assert_eq!(consignment.status(), ConsignmentStatus::Delivered);
    assert_eq!(coordinator.available(book, f.hanoi.id).await.unwrap(), 2);
}

#[tokio::test]
#[serial]
async fn confirmed_order_survives_restart() {
    let f = fixture().await;
    let book = BookId::new();
    let order = order(vec![hanoi_book(book, 2)]);
    let order_id = order.id();

    {
        let coordinator = coordinator(&f.pool);
        coordinator.restock(book, f.hanoi.id, 4).await.unwrap();
        coordinator.place_order(order).await.unwrap();
        coordinator.on_order_confirmed(order_id).await.unwrap();
    }

    let restarted = coordinator(&f.pool);
    assert_eq!(
        restarted.order(order_id).await.unwrap().status(),
        OrderStatus::Confirmed
    );
    assert_eq!(restarted.consignments(order_id).await.unwrap().len(), 1);
    assert_eq!(restarted.available(book, f.hanoi.id).await.unwrap(), 2);

    restarted.on_order_cancelled(order_id).await.unwrap();
    assert_eq!(restarted.available(book, f.hanoi.id).await.unwrap(), 4);
    let consignments = restarted.consignments(order_id).await.unwrap();
    assert_eq!(consignments[0].status(), ConsignmentStatus::Returned);
    assert_eq!(
        restarted.order(order_id).await.unwrap().status(),
        OrderStatus::Cancelled
    );
}
