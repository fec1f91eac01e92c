//! Worker entry point.
//!
//! Reads one JSON command per line from stdin and writes one JSON reply per
//! line to stdout. Logs go to stderr.

use fulfillment::{ConsignmentStore, OrderStore, PostgresConsignmentStore, PostgresOrderStore};
use inventory::{
    InMemoryStockLedger, InMemoryWarehouseDirectory, PostgresStockLedger,
    PostgresWarehouseDirectory, StockLedger, WarehouseDirectory,
};
use sqlx::postgres::PgPoolOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::{LogFormat, Worker, WorkerConfig};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

fn init_tracing(config: &WorkerConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Reads commands until stdin closes or a shutdown signal arrives.
async fn run<L, D, O, C>(worker: Worker<L, D, O, C>) -> worker::Result<()>
where
    L: StockLedger + Clone,
    D: WarehouseDirectory,
    O: OrderStore,
    C: ConsignmentStore + Clone,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            () = &mut shutdown => break,
        };
        let Some(line) = line else {
            tracing::info!("input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = worker.handle_line(&line).await;
        stdout.write_all(reply.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> worker::Result<()> {
    // 1. Load configuration and initialize tracing
    let config = WorkerConfig::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder with its scrape listener
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()?;
    tracing::info!(addr = %config.metrics_addr, "metrics listener started");

    let warehouses = match &config.warehouses_file {
        Some(path) => worker::load_warehouses(path).await?,
        None => Vec::new(),
    };

    // 3. Pick the storage backend, seed warehouses and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(&url).await?;
            let ledger = PostgresStockLedger::new(pool.clone(), config.ledger_config());
            ledger.run_migrations().await?;
            let directory = PostgresWarehouseDirectory::new(pool.clone());
            worker::seed_warehouses(&directory, warehouses).await?;
            let orders = PostgresOrderStore::new(pool.clone());
            let consignments = PostgresConsignmentStore::new(pool);

            tracing::info!(backend = "postgres", "worker ready");
            run(Worker::with_stores(ledger, directory, orders, consignments, config)).await?;
        }
        None => {
            let ledger = InMemoryStockLedger::with_config(config.ledger_config());
            let directory = InMemoryWarehouseDirectory::new();
            worker::seed_warehouses(&directory, warehouses).await?;

            tracing::info!(backend = "memory", "worker ready");
            run(Worker::new(ledger, directory, config)).await?;
        }
    }

    tracing::info!("worker shut down");
    Ok(())
}
