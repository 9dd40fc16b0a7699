//! Application configuration loaded from environment variables.

use std::time::Duration;

use outbox::PublisherConfig;
use saga::EngineConfig;

use crate::consumer::Redelivery;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` `text` or `json` (default: `text`)
/// - `DATABASE_URL` PostgreSQL stores when set, in-memory otherwise
/// - `SERVICE_NAME` used in the publisher id (default: `"orchestrator"`)
/// - `OUTBOX_POLL_INTERVAL_MS` (default: `1000`)
/// - `OUTBOX_BATCH_SIZE` (default: `100`)
/// - `OUTBOX_MAX_RETRIES` (default: `10`)
/// - `OUTBOX_CLAIM_LEASE_MS` (default: `30000`)
/// - `ACTIVITY_WORKERS` (default: `32`)
/// - `DEDUP_RETENTION_HOURS` (default: `24`)
/// - `CONSUMER_RETRY_ATTEMPTS` (default: `5`)
/// - `CONSUMER_RETRY_BACKOFF_MS` (default: `100`)
/// - `CONSUMER_SWEEP_INTERVAL_MS` (default: `30000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub service_name: String,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_max_retries: i32,
    pub outbox_claim_lease: Duration,
    pub activity_workers: usize,
    pub dedup_retention_hours: i64,
    pub consumer_retry_attempts: u32,
    pub consumer_retry_backoff: Duration,
    pub consumer_sweep_interval: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: var("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            service_name: var("SERVICE_NAME").unwrap_or(defaults.service_name),
            outbox_poll_interval: parsed("OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
            outbox_batch_size: parsed("OUTBOX_BATCH_SIZE")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.outbox_batch_size),
            outbox_max_retries: parsed("OUTBOX_MAX_RETRIES")
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(defaults.outbox_max_retries),
            outbox_claim_lease: parsed("OUTBOX_CLAIM_LEASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_claim_lease),
            activity_workers: parsed("ACTIVITY_WORKERS")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.activity_workers),
            dedup_retention_hours: parsed("DEDUP_RETENTION_HOURS")
                .and_then(|n| i64::try_from(n).ok())
                .unwrap_or(defaults.dedup_retention_hours),
            consumer_retry_attempts: parsed("CONSUMER_RETRY_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .map(|n| n.max(1))
                .unwrap_or(defaults.consumer_retry_attempts),
            consumer_retry_backoff: parsed("CONSUMER_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.consumer_retry_backoff),
            consumer_sweep_interval: parsed("CONSUMER_SWEEP_INTERVAL_MS")
                .map(|n| Duration::from_millis(n.max(1)))
                .unwrap_or(defaults.consumer_sweep_interval),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            publisher_id: format!("{}-{}", self.service_name, std::process::id()),
            poll_interval: self.outbox_poll_interval,
            batch_size: self.outbox_batch_size,
            max_retries: self.outbox_max_retries,
            claim_lease: self.outbox_claim_lease,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            activity_workers: self.activity_workers,
            ..EngineConfig::default()
        }
    }

    pub fn dedup_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.dedup_retention_hours)
    }

    /// Redelivery settings for the bus consumers. The sweep window matches
    /// the dedup retention.
    pub fn redelivery(&self) -> Redelivery {
        Redelivery {
            attempts: self.consumer_retry_attempts,
            backoff: self.consumer_retry_backoff,
            sweep_interval: self.consumer_sweep_interval,
            window: self.dedup_retention(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            service_name: "orchestrator".to_string(),
            outbox_poll_interval: Duration::from_millis(1000),
            outbox_batch_size: 100,
            outbox_max_retries: 10,
            outbox_claim_lease: Duration::from_millis(30_000),
            activity_workers: 32,
            dedup_retention_hours: 24,
            consumer_retry_attempts: 5,
            consumer_retry_backoff: Duration::from_millis(100),
            consumer_sweep_interval: Duration::from_millis(30_000),
        }
    }
}
