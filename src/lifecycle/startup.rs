//! Startup orchestration.
//!
//! Builds the external collaborators named in configuration. Anything that
//! fails here is fatal; the process never starts half-wired.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::callbacks::{
    CallbackStore, MemoryCallbackStore, ProbeError, PublishError, SqliteCallbackStore, StoreError,
};
use crate::config::{GatewayConfig, StoreConfig};
use crate::queue::{JobQueue, MemoryJobQueue};
use crate::spool::{HttpTelemetrySink, LogSink, TelemetrySink};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("callback store: {0}")]
    Store(#[from] StoreError),

    #[error("publisher: {0}")]
    Publisher(#[from] PublishError),

    #[error("storage probe: {0}")]
    Probe(#[from] ProbeError),

    #[error("telemetry sink: {0}")]
    Sink(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// External systems the gateway talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn CallbackStore>,
    pub queue: Arc<dyn JobQueue>,
    pub sink: Arc<dyn TelemetrySink>,
}

impl Collaborators {
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, StartupError> {
        let store: Arc<dyn CallbackStore> = match &config.store {
            StoreConfig::Memory => Arc::new(MemoryCallbackStore::new()),
            StoreConfig::Sqlite {
                url,
                max_connections,
            } => Arc::new(SqliteCallbackStore::connect(url, *max_connections).await?),
        };

        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(config.queue.capacity));

        let sink: Arc<dyn TelemetrySink> = match &config.telemetry.endpoint {
            Some(endpoint) => {
                let url = Url::parse(endpoint)
                    .map_err(|e| StartupError::Sink(format!("{}: {}", endpoint, e)))?;
                let timeout = Duration::from_millis(config.timeouts.downstream_ms);
                Arc::new(
                    HttpTelemetrySink::new(url, timeout)
                        .map_err(|e| StartupError::Sink(e.to_string()))?,
                )
            }
            None => Arc::new(LogSink),
        };

        tracing::info!(
            store = store.name(),
            sink = sink.name(),
            "Collaborators initialized"
        );
        Ok(Self { store, queue, sink })
    }

    /// Process-local collaborators.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryCallbackStore::new()),
            queue: Arc::new(MemoryJobQueue::default()),
            sink: Arc::new(LogSink),
        }
    }
}
