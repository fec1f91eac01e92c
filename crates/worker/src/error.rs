//! Worker startup errors.

use inventory::InventoryError;
use thiserror::Error;

/// Errors that stop the worker from starting or reading input.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The warehouses file is not a JSON array of warehouses.
    #[error("Invalid warehouses file: {0}")]
    Warehouses(#[from] serde_json::Error),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Metrics exporter error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
