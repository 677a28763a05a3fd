//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so a minimal (or empty) file is valid.

use serde::{Deserialize, Serialize};

/// Root configuration for the ingress gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deployment mode. Some downstream checks only run in production.
    pub mode: RunMode,

    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-route circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Fixed-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Job queue backlog sampling.
    pub backlog: BacklogConfig,

    /// Telemetry retry spool.
    pub spool: SpoolConfig,

    /// Telemetry sink.
    pub telemetry: TelemetryConfig,

    /// Callback ingestion.
    pub callbacks: CallbackConfig,

    /// Downstream notification backend, selected once at load.
    pub publisher: PublisherConfig,

    /// Optional existence probe against the object store.
    pub storage_probe: StorageProbeConfig,

    /// Callback record persistence.
    pub store: StoreConfig,

    /// Job queue settings.
    pub queue: QueueConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Development,
    Production,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout in seconds.
    pub request_secs: u64,

    /// Deadline for every datastore / queue / publish / probe call, in milliseconds.
    pub downstream_ms: u64,

    /// Deadline for each individual readiness check, in milliseconds.
    pub health_check_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            downstream_ms: 3_000,
            health_check_ms: 2_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the breaker.
    pub success_threshold: u32,

    /// Seconds an open breaker waits before admitting trial traffic.
    pub reset_timeout_secs: u64,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,

    /// Routes whose breaker gates inbound requests and readiness.
    pub critical_routes: Vec<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout_secs: 60,
            half_open_max_calls: 3,
            critical_routes: vec!["/callbacks/scf".to_string()],
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests admitted per key per window.
    pub max_requests: u32,

    /// Key windows by `x-client-id` as well as route.
    pub per_client: bool,

    /// How often expired windows are evicted.
    pub prune_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            max_requests: 100,
            per_client: true,
            prune_interval_secs: 60,
        }
    }
}

/// Backlog monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BacklogConfig {
    pub enabled: bool,

    /// Sampling interval in seconds.
    pub check_interval_secs: u64,

    /// Depth strictly above this value counts as a breach.
    pub high_backlog_threshold: u64,

    /// Consecutive breaches that raise an alert.
    pub consecutive_alerts_threshold: u32,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 30,
            high_backlog_threshold: 1_000,
            consecutive_alerts_threshold: 3,
        }
    }
}

/// Retry spool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Maximum buffered entries.
    pub max_size: usize,

    /// JSON file the spool is persisted to. `None` keeps it in memory only.
    pub path: Option<String>,

    /// Flush loop interval in seconds.
    pub flush_interval_secs: u64,

    /// Maximum entries attempted per flush tick.
    pub flush_batch: usize,

    /// Delivery attempts before an entry is discarded.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_backoff_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            path: Some("data/telemetry-spool.json".to_string()),
            flush_interval_secs: 10,
            flush_batch: 50,
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// Telemetry sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    /// HTTP endpoint receiving JSON telemetry batches. `None` logs records instead.
    pub endpoint: Option<String>,
}

/// Callback ingestion configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Shared HMAC secret. Overridden by `SCF_CALLBACK_SECRET`.
    pub secret: String,

    /// Reject deliveries whose signature is missing or wrong.
    pub enforce_signature: bool,

    /// Allow a RETRYING record to be corrected to a terminal status.
    pub allow_status_corrections: bool,

    /// Records older than this are removed by the retention sweep.
    pub retention_days: u32,

    /// Retention sweep interval in seconds.
    pub retention_sweep_secs: u64,

    /// Upper bound for `limit` on listing queries.
    pub max_page_size: u32,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            enforce_signature: true,
            allow_status_corrections: true,
            retention_days: 30,
            retention_sweep_secs: 3_600,
            max_page_size: 100,
        }
    }
}

/// Event bus backend.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublisherConfig {
    /// Structured log line only.
    #[default]
    Log,
    /// Enqueue a job on the shared job queue.
    Queue {
        #[serde(default = "default_completion_job")]
        job_name: String,
    },
    /// POST the completion notice to a webhook.
    Webhook { url: String },
}

fn default_completion_job() -> String {
    "callback_completed".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailurePolicy {
    /// Log and continue ingestion.
    #[default]
    Warn,
    /// Reject the callback with a semantic rejection.
    Reject,
}

/// Object store existence probe.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageProbeConfig {
    /// Only takes effect in production mode.
    pub enabled: bool,

    /// URL with `{bucket}`, `{region}` and `{key}` placeholders.
    pub url_template: String,

    pub failure_policy: ProbeFailurePolicy,
}

impl Default for StorageProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url_template: "https://{bucket}.cos.{region}.myqcloud.com/{key}".to_string(),
            failure_policy: ProbeFailurePolicy::Warn,
        }
    }
}

/// Callback record store.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite {
        url: String,
        #[serde(default = "default_pool_size")]
        max_connections: u32,
    },
}

fn default_pool_size() -> u32 {
    5
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued jobs; `None` is unbounded.
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Validation refuses it in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.spool.max_size, 500);
        assert!(matches!(config.publisher, PublisherConfig::Log));
        assert!(matches!(config.store, StoreConfig::Memory));
    }

    #[test]
    fn test_tagged_sections() {
        let config: GatewayConfig = toml::from_str(
            r#"
            mode = "production"

            [publisher]
            kind = "webhook"
            url = "http://bus.internal/events"

            [store]
            kind = "sqlite"
            url = "sqlite://callbacks.db?mode=rwc"
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, RunMode::Production);
        match config.publisher {
            PublisherConfig::Webhook { url } => assert_eq!(url, "http://bus.internal/events"),
            other => panic!("unexpected publisher {:?}", other),
        }
        match config.store {
            StoreConfig::Sqlite { max_connections, .. } => assert_eq!(max_connections, 5),
            other => panic!("unexpected store {:?}", other),
        }
    }
}
