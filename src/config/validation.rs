//! Configuration validation.
//!
//! Serde handles syntax; this pass checks value ranges and cross-field
//! requirements. It returns every problem found, not just the first.

use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, PublisherConfig, RunMode, StoreConfig};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be > 0"));
    }
    if cb.half_open_max_calls == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_max_calls", "must be > 0"));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.window_ms == 0 {
            errors.push(ValidationError::new("rate_limit.window_ms", "must be > 0"));
        }
        if config.rate_limit.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be > 0"));
        }
    }

    if config.backlog.enabled {
        if config.backlog.check_interval_secs == 0 {
            errors.push(ValidationError::new("backlog.check_interval_secs", "must be > 0"));
        }
        if config.backlog.consecutive_alerts_threshold == 0 {
            errors.push(ValidationError::new(
                "backlog.consecutive_alerts_threshold",
                "must be > 0",
            ));
        }
    }

    if config.spool.max_size == 0 {
        errors.push(ValidationError::new("spool.max_size", "must be > 0"));
    }
    if config.spool.max_attempts == 0 {
        errors.push(ValidationError::new("spool.max_attempts", "must be > 0"));
    }
    if config.spool.flush_interval_secs == 0 {
        errors.push(ValidationError::new("spool.flush_interval_secs", "must be > 0"));
    }

    if config.callbacks.enforce_signature && config.callbacks.secret.is_empty() {
        errors.push(ValidationError::new(
            "callbacks.secret",
            "required when signature enforcement is enabled",
        ));
    }
    if config.callbacks.max_page_size == 0 {
        errors.push(ValidationError::new("callbacks.max_page_size", "must be > 0"));
    }

    if config.timeouts.downstream_ms == 0 {
        errors.push(ValidationError::new("timeouts.downstream_ms", "must be > 0"));
    }

    if let PublisherConfig::Webhook { url } = &config.publisher {
        if let Err(e) = Url::parse(url) {
            errors.push(ValidationError::new("publisher.url", format!("invalid URL: {}", e)));
        }
    }

    if let Some(endpoint) = &config.telemetry.endpoint {
        if let Err(e) = Url::parse(endpoint) {
            errors.push(ValidationError::new(
                "telemetry.endpoint",
                format!("invalid URL: {}", e),
            ));
        }
    }

    if let StoreConfig::Sqlite { url, max_connections } = &config.store {
        if !url.starts_with("sqlite:") {
            errors.push(ValidationError::new("store.url", "must start with `sqlite:`"));
        }
        if *max_connections == 0 {
            errors.push(ValidationError::new("store.max_connections", "must be > 0"));
        }
    }

    if config.storage_probe.enabled
        && !["{bucket}", "{region}", "{key}"]
            .iter()
            .all(|p| config.storage_probe.url_template.contains(p))
    {
        errors.push(ValidationError::new(
            "storage_probe.url_template",
            "must contain {bucket}, {region} and {key}",
        ));
    }

    if config.mode == RunMode::Production
        && config.admin.enabled
        && config.admin.api_key == "CHANGE_ME_IN_PRODUCTION"
    {
        errors.push(ValidationError::new(
            "admin.api_key",
            "placeholder key is not allowed in production",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
