//! Fulfillment worker.
//!
//! Wires a stock ledger, a warehouse directory and the order and consignment
//! stores into an [`OrderFulfillmentCoordinator`] and runs newline-delimited
//! JSON commands against it, retrying commands that hit a stock lock timeout.

pub mod config;
pub mod error;

use std::path::Path;
use std::time::Instant;

use fulfillment::{
    ConsignmentStore, FulfillmentCommand, FulfillmentError, FulfillmentReply,
    InMemoryConsignmentStore, InMemoryOrderStore, OrderFulfillmentCoordinator, OrderStore,
    TracingEventSink,
};
use inventory::{
    InventoryError, LedgerWarehouseSelector, ReservationService, StockLedger, Warehouse,
    WarehouseDirectory,
};
use serde_json::{Value, json};

pub use config::{LogFormat, WorkerConfig};
pub use error::{Result, WorkerError};

/// The coordinator the worker drives, generic over the storage backend.
pub type Coordinator<L, D, O = InMemoryOrderStore, C = InMemoryConsignmentStore> =
    OrderFulfillmentCoordinator<L, LedgerWarehouseSelector<D, L>, O, C, TracingEventSink>;

/// Reads warehouse registrations from a JSON file.
pub async fn load_warehouses(path: &Path) -> Result<Vec<Warehouse>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Registers warehouses, skipping any that are already registered.
///
/// Returns the number of newly registered warehouses.
pub async fn seed_warehouses<D: WarehouseDirectory>(
    directory: &D,
    warehouses: Vec<Warehouse>,
) -> Result<usize> {
    let mut registered = 0;
    for warehouse in warehouses {
        let code = warehouse.code.clone();
        match directory.register(warehouse).await {
            Ok(()) => registered += 1,
            Err(InventoryError::DuplicateWarehouse(reason)) => {
                tracing::debug!(%code, %reason, "warehouse already registered");
            }
            Err(e) => return Err(e.into()),
        }
    }
    tracing::info!(registered, "warehouses seeded");
    Ok(registered)
}

/// Runs commands against a coordinator.
pub struct Worker<L, D, O = InMemoryOrderStore, C = InMemoryConsignmentStore> {
    coordinator: Coordinator<L, D, O, C>,
    config: WorkerConfig,
}

impl<L, D> Worker<L, D>
where
    L: StockLedger + Clone,
    D: WarehouseDirectory,
{
    /// Creates a worker that keeps orders and consignments in memory.
    pub fn new(ledger: L, directory: D, config: WorkerConfig) -> Self {
        Self::with_stores(
            ledger,
            directory,
            InMemoryOrderStore::new(),
            InMemoryConsignmentStore::new(),
            config,
        )
    }
}

impl<L, D, O, C> Worker<L, D, O, C>
where
    L: StockLedger + Clone,
    D: WarehouseDirectory,
    O: OrderStore,
    C: ConsignmentStore + Clone,
{
    pub fn with_stores(
        ledger: L,
        directory: D,
        orders: O,
        consignments: C,
        config: WorkerConfig,
    ) -> Self {
        let reservations = ReservationService::new(
            ledger.clone(),
            LedgerWarehouseSelector::new(directory, ledger),
        );
        let coordinator =
            OrderFulfillmentCoordinator::new(reservations, orders, consignments, TracingEventSink);
        Self {
            coordinator,
            config,
        }
    }

    pub fn coordinator(&self) -> &Coordinator<L, D, O, C> {
        &self.coordinator
    }

    /// Executes a command, retrying lock timeouts with exponential backoff.
    pub async fn dispatch(
        &self,
        command: FulfillmentCommand,
    ) -> std::result::Result<FulfillmentReply, FulfillmentError> {
        let name = command.name();
        let started = Instant::now();
        let mut attempt = 0;

        let result = loop {
            match self.coordinator.execute(command.clone()).await {
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt);
                    attempt += 1;
                    metrics::counter!("worker_command_retries_total", "command" => name)
                        .increment(1);
                    tracing::warn!(
                        command = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying command"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => break result,
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) if err.is_business_outcome() => "rejected",
            Err(_) => "failed",
        };
        metrics::counter!("worker_commands_total", "command" => name, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("worker_command_duration_seconds", "command" => name)
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Parses one input line, runs it and renders the JSON reply.
    pub async fn handle_line(&self, line: &str) -> Value {
        let command: FulfillmentCommand = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, "rejected malformed command");
                return json!({
                    "result": "error",
                    "kind": "invalid_command",
                    "message": e.to_string(),
                    "retryable": false,
                });
            }
        };

        match self.dispatch(command).await {
            Ok(reply) => serde_json::to_value(&reply).unwrap_or_else(|e| {
                json!({
                    "result": "error",
                    "kind": "serialization",
                    "message": e.to_string(),
                    "retryable": false,
                })
            }),
            Err(err) => json!({
                "result": "error",
                "kind": err.kind(),
                "message": err.to_string(),
                "retryable": err.is_retryable(),
            }),
        }
    }
}
