//! Object-store existence probe.
//!
//! Only active in production with `storage_probe.enabled`. Outcomes are
//! reported to the pipeline, which applies the configured failure policy.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::callbacks::types::CosObject;
use crate::config::{ProbeFailurePolicy, RunMode, StorageProbeConfig};
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreakerRegistry};
use crate::resilience::timeouts::TimedOut;
use crate::routing::RouteKey;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("object {0} does not exist")]
    Missing(String),

    #[error("object store answered {0}")]
    Rejected(u16),

    #[error("probe request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("invalid probe url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Timeout(#[from] TimedOut),
}

impl From<BreakerError<ProbeError>> for ProbeError {
    fn from(err: BreakerError<ProbeError>) -> Self {
        match err {
            BreakerError::Open(key) => ProbeError::CircuitOpen(key),
            BreakerError::Inner(inner) => inner,
        }
    }
}

pub struct HttpStorageProbe {
    client: reqwest::Client,
    url_template: String,
    breakers: Arc<CircuitBreakerRegistry>,
    key: RouteKey,
    policy: ProbeFailurePolicy,
}

pub enum StorageProbe {
    Disabled,
    Http(HttpStorageProbe),
}

impl StorageProbe {
    pub fn from_config(
        config: &StorageProbeConfig,
        mode: RunMode,
        breakers: Arc<CircuitBreakerRegistry>,
        timeout: Duration,
    ) -> Result<Self, ProbeError> {
        if !config.enabled || mode != RunMode::Production {
            return Ok(StorageProbe::Disabled);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(StorageProbe::Http(HttpStorageProbe {
            client,
            url_template: config.url_template.clone(),
            breakers,
            key: RouteKey::downstream("storage-probe"),
            policy: config.failure_policy,
        }))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, StorageProbe::Http(_))
    }

    pub fn policy(&self) -> ProbeFailurePolicy {
        match self {
            StorageProbe::Disabled => ProbeFailurePolicy::Warn,
            StorageProbe::Http(probe) => probe.policy,
        }
    }

    /// `Ok` when disabled or when the object answers a HEAD with 2xx.
    pub async fn check(&self, object: &CosObject) -> Result<(), ProbeError> {
        let StorageProbe::Http(probe) = self else {
            return Ok(());
        };
        let url = object_url(&probe.url_template, object)?;
        probe
            .breakers
            .call(&probe.key, async {
                let response = probe.client.head(url.clone()).send().await?;
                let status = response.status();
                if status.is_success() {
                    Ok::<(), ProbeError>(())
                } else if status == reqwest::StatusCode::NOT_FOUND {
                    Err(ProbeError::Missing(object.key.clone()))
                } else {
                    Err(ProbeError::Rejected(status.as_u16()))
                }
            })
            .await?;
        Ok(())
    }
}

pub fn object_url(template: &str, object: &CosObject) -> Result<Url, ProbeError> {
    let raw = template
        .replace("{bucket}", &object.bucket)
        .replace("{region}", &object.region)
        .replace("{key}", object.key.trim_start_matches('/'));
    Url::parse(&raw).map_err(|e| ProbeError::InvalidUrl(format!("{}: {}", raw, e)))
}
