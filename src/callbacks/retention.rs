//! Time-based retention of callback records.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::callbacks::store::{CallbackStore, StoreError};
use crate::config::CallbackConfig;
use crate::resilience::timeouts::with_timeout;

pub struct RetentionSweeper {
    store: Arc<dyn CallbackStore>,
    retention: chrono::Duration,
    interval: Duration,
    timeout: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn CallbackStore>, config: &CallbackConfig, timeout: Duration) -> Self {
        Self {
            store,
            retention: chrono::Duration::days(i64::from(config.retention_days)),
            interval: Duration::from_secs(config.retention_sweep_secs.max(1)),
            timeout,
        }
    }

    /// Delete records older than the retention window.
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - self.retention;
        let removed = with_timeout(self.timeout, self.store.delete_older_than(cutoff)).await?;
        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "Retention sweep removed callback records");
        }
        Ok(removed)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            retention_days = self.retention.num_days(),
            "Retention sweeper starting"
        );
        let mut ticker = time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::warn!(error = %e, "Retention sweep failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Retention sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::store::MemoryCallbackStore;
    use crate::callbacks::types::{CallbackEvent, CallbackStatus, CosObject};
    use std::collections::BTreeMap;

    fn event(id: &str, age_days: i64) -> CallbackEvent {
        let received_at = Utc::now() - chrono::Duration::days(age_days);
        CallbackEvent {
            event_id: id.into(),
            task_id: "t".into(),
            status: CallbackStatus::Success,
            output_keys: None,
            cos_object: CosObject {
                key: "k".into(),
                bucket: "b".into(),
                region: "r".into(),
                etag: None,
                size: None,
            },
            metadata: BTreeMap::new(),
            signature: None,
            validated: false,
            raw_payload: String::new(),
            received_at,
            processed_at: received_at,
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = Arc::new(MemoryCallbackStore::new());
        store.create_if_absent(event("old", 45)).await.unwrap();
        store.create_if_absent(event("recent", 2)).await.unwrap();

        let sweeper = RetentionSweeper::new(
            store.clone(),
            &CallbackConfig::default(),
            Duration::from_secs(1),
        );
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }
}
