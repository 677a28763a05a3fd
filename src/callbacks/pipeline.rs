//! Callback ingestion.
//!
//! # Data Flow
//! ```text
//! raw body + x-scf-signature
//!     → signature check            (401 before anything else)
//!     → JSON parse                 (400)
//!     → replay lookup by eventId   (stored record returned, no side effects)
//!     → structural validation      (400, all violations listed)
//!     → semantic checks            (422)
//!     → storage probe              (warn, or 422 under the reject policy)
//!     → idempotent create          (500 on datastore failure)
//!     → publish                    (best-effort, logged)
//! ```
//!
//! # Design Decisions
//! - A lost creation race is handled like a replay: the winner's record is returned
//! - A RETRYING record may be corrected once to a terminal status by a fully
//!   valid redelivery; the correction is published, any other replay is inert
//! - Every collaborator call carries the downstream deadline

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::callbacks::probe::StorageProbe;
use crate::callbacks::publisher::Publisher;
use crate::callbacks::store::{
    CallbackFilter, CallbackStore, CreateOutcome, Page, PageRequest, StoreError,
};
use crate::callbacks::types::{CallbackEvent, CompletionNotice, StatusUpdate};
use crate::callbacks::validation::{check_semantics, peek_event_id, validate_payload};
use crate::config::ProbeFailurePolicy;
use crate::error::ApiError;
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;
use crate::security::signature::{SignatureVerifier, Verification};

/// How a delivery was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// First delivery; the record was stored.
    Persisted,
    /// The `eventId` was already stored; nothing changed.
    Replayed,
    /// A stored RETRYING record was moved to a terminal status.
    Corrected,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Persisted => "persisted",
            DeliveryState::Replayed => "replayed",
            DeliveryState::Corrected => "corrected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub event: CallbackEvent,
    pub state: DeliveryState,
    /// Whether publication succeeded on this delivery.
    pub published: bool,
}

pub struct CallbackPipeline {
    store: Arc<dyn CallbackStore>,
    publisher: Arc<Publisher>,
    probe: Arc<StorageProbe>,
    verifier: SignatureVerifier,
    allow_status_corrections: bool,
    timeout: Duration,
}

impl CallbackPipeline {
    pub fn new(
        store: Arc<dyn CallbackStore>,
        publisher: Arc<Publisher>,
        probe: Arc<StorageProbe>,
        verifier: SignatureVerifier,
        allow_status_corrections: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            probe,
            verifier,
            allow_status_corrections,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn CallbackStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub async fn ingest(&self, body: &[u8], signature: Option<&str>) -> Result<IngestOutcome, ApiError> {
        let result = self.process(body, signature).await;
        let label = match &result {
            Ok(outcome) => outcome.state.as_str(),
            Err(e) => e.kind(),
        };
        metrics::record_callback(label);
        result
    }

    async fn process(&self, body: &[u8], signature: Option<&str>) -> Result<IngestOutcome, ApiError> {
        let verification = self.verifier.verify(body, signature).map_err(|e| {
            tracing::warn!(error = %e, "Rejected callback with bad signature");
            ApiError::Auth(e.to_string())
        })?;

        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::Validation(format!("malformed JSON body: {}", e)))?;

        if let Some(event_id) = peek_event_id(&value) {
            if let Some(existing) = self.find_existing(event_id).await? {
                return self.replay(existing, &value).await;
            }
        }

        let valid = validate_payload(&value).map_err(|violations| {
            tracing::info!(violations = ?violations, "Rejected invalid callback");
            ApiError::Validation(violations.join("; "))
        })?;

        check_semantics(&valid).map_err(|reason| {
            tracing::info!(event_id = %valid.event_id, reason = %reason, "Rejected callback on semantics");
            ApiError::SemanticRejection(reason)
        })?;

        self.probe_object(&valid.event_id, &valid.cos_object).await?;

        let event = CallbackEvent::from_valid(
            valid,
            signature.map(str::to_string),
            verification == Verification::Verified,
            String::from_utf8_lossy(body).into_owned(),
            Utc::now(),
        );

        let outcome = with_timeout(self.timeout, self.store.create_if_absent(event))
            .await
            .map_err(persistence_error)?;

        match outcome {
            CreateOutcome::Created(event) => {
                tracing::info!(
                    event_id = %event.event_id,
                    task_id = %event.task_id,
                    status = %event.status,
                    validated = event.validated,
                    "Callback persisted"
                );
                let published = self.publish(&CompletionNotice::from_event(&event, false)).await;
                Ok(IngestOutcome {
                    event,
                    state: DeliveryState::Persisted,
                    published,
                })
            }
            CreateOutcome::Existing(existing) => {
                tracing::debug!(event_id = %existing.event_id, "Lost creation race, replaying winner");
                self.replay(existing, &value).await
            }
        }
    }

    /// Single record by `eventId`.
    pub async fn find(&self, event_id: &str) -> Result<CallbackEvent, ApiError> {
        self.find_existing(event_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("no callback with eventId '{}'", event_id)))
    }

    pub async fn list(
        &self,
        filter: &CallbackFilter,
        page: PageRequest,
    ) -> Result<Page<CallbackEvent>, ApiError> {
        with_timeout(self.timeout, self.store.list(filter, page))
            .await
            .map_err(persistence_error)
    }

    async fn find_existing(&self, event_id: &str) -> Result<Option<CallbackEvent>, ApiError> {
        with_timeout(self.timeout, self.store.find_by_event_id(event_id))
            .await
            .map_err(persistence_error)
    }

    async fn replay(&self, existing: CallbackEvent, value: &Value) -> Result<IngestOutcome, ApiError> {
        let replayed = |event| IngestOutcome {
            event,
            state: DeliveryState::Replayed,
            published: false,
        };

        if !self.allow_status_corrections {
            return Ok(replayed(existing));
        }
        let Ok(valid) = validate_payload(value) else {
            return Ok(replayed(existing));
        };
        if !existing.status.can_transition_to(valid.status) || check_semantics(&valid).is_err() {
            return Ok(replayed(existing));
        }

        let update = StatusUpdate::from(&valid);
        match with_timeout(self.timeout, self.store.update_status(&existing.event_id, update)).await {
            Ok(event) => {
                tracing::info!(
                    event_id = %event.event_id,
                    status = %event.status,
                    "Callback status corrected"
                );
                let published = self.publish(&CompletionNotice::from_event(&event, true)).await;
                Ok(IngestOutcome {
                    event,
                    state: DeliveryState::Corrected,
                    published,
                })
            }
            // Another delivery corrected it first.
            Err(StoreError::InvalidTransition { .. }) => {
                let current = self.find_existing(&existing.event_id).await?;
                Ok(replayed(current.unwrap_or(existing)))
            }
            Err(e) => Err(persistence_error(e)),
        }
    }

    async fn probe_object(
        &self,
        event_id: &str,
        object: &crate::callbacks::types::CosObject,
    ) -> Result<(), ApiError> {
        if !self.probe.is_enabled() {
            return Ok(());
        }
        match with_timeout(self.timeout, self.probe.check(object)).await {
            Ok(()) => Ok(()),
            Err(e) => match self.probe.policy() {
                ProbeFailurePolicy::Warn => {
                    tracing::warn!(event_id = %event_id, key = %object.key, error = %e, "Storage probe failed, continuing");
                    Ok(())
                }
                ProbeFailurePolicy::Reject => Err(ApiError::SemanticRejection(format!(
                    "storage object check failed: {}",
                    e
                ))),
            },
        }
    }

    /// Best-effort. Failures are logged and counted, never returned.
    async fn publish(&self, notice: &CompletionNotice) -> bool {
        match with_timeout(self.timeout, self.publisher.publish(notice)).await {
            Ok(()) => true,
            Err(e) => {
                metrics::record_publish_failure(self.publisher.kind());
                tracing::warn!(
                    event_id = %notice.event_id,
                    publisher = self.publisher.kind(),
                    error = %e,
                    "Failed to publish task completion"
                );
                false
            }
        }
    }
}

fn persistence_error(err: StoreError) -> ApiError {
    ApiError::Persistence(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::store::MemoryCallbackStore;
    use crate::callbacks::types::CallbackStatus;
    use crate::config::{CircuitBreakerConfig, PublisherConfig};
    use crate::queue::{JobQueue, MemoryJobQueue};
    use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
    use crate::security::signature::sign;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    struct Harness {
        pipeline: CallbackPipeline,
        store: Arc<MemoryCallbackStore>,
        queue: Arc<MemoryJobQueue>,
    }

    fn harness(enforce: bool, corrections: bool) -> Harness {
        let store = Arc::new(MemoryCallbackStore::new());
        let queue = Arc::new(MemoryJobQueue::default());
        let breakers = Arc::new(CircuitBreakerRegistry::new(&CircuitBreakerConfig::default()));
        let publisher = Publisher::from_config(
            &PublisherConfig::Queue {
                job_name: "callback_completed".into(),
            },
            queue.clone(),
            breakers,
            Duration::from_secs(1),
        )
        .unwrap();
        let pipeline = CallbackPipeline::new(
            store.clone(),
            Arc::new(publisher),
            Arc::new(StorageProbe::Disabled),
            SignatureVerifier::new(SECRET, enforce),
            corrections,
            Duration::from_secs(1),
        );
        Harness {
            pipeline,
            store,
            queue,
        }
    }

    fn body(status: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "eventId": "e1",
            "taskId": "t1",
            "status": status,
            "cosObject": {"key": "k", "bucket": "b", "region": "r"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_inert() {
        let h = harness(true, true);
        let raw = body("SUCCESS");
        let sig = sign(SECRET, &raw);

        let first = h.pipeline.ingest(&raw, Some(&sig)).await.unwrap();
        let second = h.pipeline.ingest(&raw, Some(&sig)).await.unwrap();

        assert_eq!(first.state, DeliveryState::Persisted);
        assert_eq!(second.state, DeliveryState::Replayed);
        assert_eq!(first.event, second.event);
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_signature_checked_first() {
        let h = harness(true, true);
        let err = h.pipeline.ingest(b"not json", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));

        let err = h.pipeline.ingest(&body("SUCCESS"), Some("00ff")).await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_unenforced_signature_marks_record_unvalidated() {
        let h = harness(false, true);
        let outcome = h.pipeline.ingest(&body("FAILED"), None).await.unwrap();
        assert!(!outcome.event.validated);
        assert_eq!(outcome.event.status, CallbackStatus::Failed);
    }

    #[tokio::test]
    async fn test_validation_precedes_writes() {
        let h = harness(false, true);
        let err = h.pipeline.ingest(&body("DONE"), None).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = h.pipeline.ingest(b"{", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(h.store.is_empty());
        assert_eq!(h.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_semantic_rejection() {
        let h = harness(false, true);
        let raw = serde_json::to_vec(&json!({
            "eventId": "e1",
            "taskId": "t1",
            "status": "SUCCESS",
            "outputKeys": [],
            "cosObject": {"key": "k", "bucket": "b", "region": "r"}
        }))
        .unwrap();
        let err = h.pipeline.ingest(&raw, None).await.unwrap_err();
        assert!(matches!(err, ApiError::SemanticRejection(_)));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_retrying_record_is_corrected_once() {
        let h = harness(false, true);
        h.pipeline.ingest(&body("RETRYING"), None).await.unwrap();

        let corrected = h.pipeline.ingest(&body("SUCCESS"), None).await.unwrap();
        assert_eq!(corrected.state, DeliveryState::Corrected);
        assert_eq!(corrected.event.status, CallbackStatus::Success);

        let replay = h.pipeline.ingest(&body("FAILED"), None).await.unwrap();
        assert_eq!(replay.state, DeliveryState::Replayed);
        assert_eq!(replay.event.status, CallbackStatus::Success);

        // Initial publish plus the correction.
        assert_eq!(h.queue.depth().await.unwrap(), 2);
        let jobs = h.queue.peek();
        assert_eq!(jobs[1].payload["correction"], json!(true));
    }

    #[tokio::test]
    async fn test_corrections_can_be_disabled() {
        let h = harness(false, false);
        h.pipeline.ingest(&body("RETRYING"), None).await.unwrap();
        let replay = h.pipeline.ingest(&body("SUCCESS"), None).await.unwrap();
        assert_eq!(replay.state, DeliveryState::Replayed);
        assert_eq!(replay.event.status, CallbackStatus::Retrying);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_ingestion() {
        let store = Arc::new(MemoryCallbackStore::new());
        let queue = Arc::new(MemoryJobQueue::new(Some(0)));
        let breakers = Arc::new(CircuitBreakerRegistry::new(&CircuitBreakerConfig::default()));
        let publisher = Publisher::from_config(
            &PublisherConfig::Queue {
                job_name: "callback_completed".into(),
            },
            queue,
            breakers,
            Duration::from_secs(1),
        )
        .unwrap();
        let pipeline = CallbackPipeline::new(
            store.clone(),
            Arc::new(publisher),
            Arc::new(StorageProbe::Disabled),
            SignatureVerifier::new(SECRET, false),
            true,
            Duration::from_secs(1),
        );

        let outcome = pipeline.ingest(&body("SUCCESS"), None).await.unwrap();
        assert_eq!(outcome.state, DeliveryState::Persisted);
        assert!(!outcome.published);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_find_missing_is_not_found() {
        let h = harness(false, true);
        assert!(matches!(
            h.pipeline.find("nope").await,
            Err(ApiError::NotFound(_))
        ));
    }
}
