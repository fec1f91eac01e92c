//! Worker configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use inventory::LedgerConfig;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `LOCK_TIMEOUT_MS`: bound on stock row lock waits (default: `2000`)
/// - `MAX_RETRIES`: retries of a command after a lock timeout (default: `3`)
/// - `RETRY_BACKOFF_MS`: first retry delay, doubled per attempt (default: `50`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `METRICS_ADDR`: Prometheus scrape address (default: `0.0.0.0:9000`)
/// - `DATABASE_URL`: selects the PostgreSQL ledger when set
/// - `WAREHOUSES_FILE`: JSON array of warehouses to register at startup
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub lock_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_addr: SocketAddr,
    pub database_url: Option<String>,
    pub warehouses_file: Option<PathBuf>,
}

impl WorkerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            lock_timeout: millis("LOCK_TIMEOUT_MS", defaults.lock_timeout),
            max_retries: lookup("MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_backoff: millis("RETRY_BACKOFF_MS", defaults.retry_backoff),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            metrics_addr: lookup("METRICS_ADDR")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.metrics_addr),
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            warehouses_file: lookup("WAREHOUSES_FILE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            lock_timeout: self.lock_timeout,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(50),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            database_url: None,
            warehouses_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = config(&[]);
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(50));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.metrics_addr.to_string(), "0.0.0.0:9000");
        assert!(config.database_url.is_none());
        assert!(config.warehouses_file.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("LOCK_TIMEOUT_MS", "500"),
            ("MAX_RETRIES", "5"),
            ("LOG_FORMAT", "JSON"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
            ("DATABASE_URL", "postgres://localhost/bookstore"),
            ("WAREHOUSES_FILE", "warehouses.json"),
        ]);
        assert_eq!(config.ledger_config().lock_timeout, Duration::from_millis(500));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.metrics_addr.port(), 9100);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/bookstore")
        );
        assert_eq!(config.warehouses_file, Some(PathBuf::from("warehouses.json")));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[
            ("LOCK_TIMEOUT_MS", "soon"),
            ("LOG_FORMAT", "xml"),
            ("METRICS_ADDR", "nowhere"),
            ("DATABASE_URL", ""),
        ]);
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.metrics_addr.port(), 9000);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        let config = WorkerConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(50));
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
    }
}
