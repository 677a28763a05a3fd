//! Completion publication backends.
//!
//! The backend is a tagged variant chosen once from configuration. Publication
//! is best-effort: callers log failures and never surface them.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::callbacks::types::CompletionNotice;
use crate::config::PublisherConfig;
use crate::queue::{JobQueue, QueueError};
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreakerRegistry};
use crate::resilience::timeouts::{with_timeout, TimedOut};
use crate::routing::RouteKey;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("queue publish failed: {0}")]
    Queue(#[from] QueueError),

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook rejected notice with status {0}")]
    Rejected(u16),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("invalid publisher configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Timeout(#[from] TimedOut),
}

impl From<BreakerError<PublishError>> for PublishError {
    fn from(err: BreakerError<PublishError>) -> Self {
        match err {
            BreakerError::Open(key) => PublishError::CircuitOpen(key),
            BreakerError::Inner(inner) => inner,
        }
    }
}

/// Structured log line only.
pub struct LogPublisher;

/// Enqueues a job carrying the notice.
pub struct QueuePublisher {
    queue: Arc<dyn JobQueue>,
    job_name: String,
    timeout: Duration,
}

/// POSTs the notice as JSON.
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: Url,
    breakers: Arc<CircuitBreakerRegistry>,
    key: RouteKey,
}

pub enum Publisher {
    Log(LogPublisher),
    Queue(QueuePublisher),
    Webhook(WebhookPublisher),
}

impl Publisher {
    pub fn from_config(
        config: &PublisherConfig,
        queue: Arc<dyn JobQueue>,
        breakers: Arc<CircuitBreakerRegistry>,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        match config {
            PublisherConfig::Log => Ok(Publisher::Log(LogPublisher)),
            PublisherConfig::Queue { job_name } => Ok(Publisher::Queue(QueuePublisher {
                queue,
                job_name: job_name.clone(),
                timeout,
            })),
            PublisherConfig::Webhook { url } => {
                let url = Url::parse(url)
                    .map_err(|e| PublishError::InvalidConfig(format!("{}: {}", url, e)))?;
                let client = reqwest::Client::builder().timeout(timeout).build()?;
                Ok(Publisher::Webhook(WebhookPublisher {
                    client,
                    url,
                    breakers,
                    key: RouteKey::downstream("event-bus"),
                }))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Publisher::Log(_) => "log",
            Publisher::Queue(_) => "queue",
            Publisher::Webhook(_) => "webhook",
        }
    }

    pub async fn publish(&self, notice: &CompletionNotice) -> Result<(), PublishError> {
        match self {
            Publisher::Log(_) => {
                tracing::info!(
                    event_id = %notice.event_id,
                    task_id = %notice.task_id,
                    status = %notice.status,
                    correction = notice.correction,
                    "Task completion published"
                );
                Ok(())
            }
            Publisher::Queue(publisher) => {
                let payload = serde_json::to_value(notice)
                    .map_err(|e| PublishError::InvalidConfig(e.to_string()))?;
                let job = with_timeout(
                    publisher.timeout,
                    publisher.queue.add_job(&publisher.job_name, payload),
                )
                .await?;
                tracing::debug!(job_id = %job.id, event_id = %notice.event_id, "Completion job enqueued");
                Ok(())
            }
            Publisher::Webhook(publisher) => {
                publisher
                    .breakers
                    .call(&publisher.key, async {
                        let response = publisher
                            .client
                            .post(publisher.url.clone())
                            .json(notice)
                            .send()
                            .await?;
                        let status = response.status();
                        if status.is_success() {
                            Ok::<(), PublishError>(())
                        } else {
                            Err(PublishError::Rejected(status.as_u16()))
                        }
                    })
                    .await?;
                Ok(())
            }
        }
    }
}
