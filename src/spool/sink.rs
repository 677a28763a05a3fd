//! Telemetry sinks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::resilience::timeouts::TimedOut;

/// One request's worth of telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub route: String,
    pub method: String,
    pub status: u16,
    pub latency_ms: u64,
    pub request_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sink rejected batch with status {0}")]
    Rejected(u16),

    #[error(transparent)]
    Timeout(#[from] TimedOut),
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, records: &[TelemetryRecord]) -> Result<(), SinkError>;
}

/// Writes records to the log. Used when no endpoint is configured.
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, records: &[TelemetryRecord]) -> Result<(), SinkError> {
        for record in records {
            tracing::debug!(
                route = %record.route,
                method = %record.method,
                status = record.status,
                latency_ms = record.latency_ms,
                "telemetry"
            );
        }
        Ok(())
    }
}

/// POSTs JSON batches to an HTTP collector.
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTelemetrySink {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, records: &[TelemetryRecord]) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(records)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected(status.as_u16()))
        }
    }
}
