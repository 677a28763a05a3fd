//! Job queue backlog monitor.
//!
//! # Responsibilities
//! - Periodically sample queue depth
//! - Count consecutive over-threshold samples
//! - Raise one alert per breach episode and flag the system degraded
//!
//! # Design Decisions
//! - A failed sample is "unknown": it neither breaches nor recovers
//! - One recovering sample ends the episode and clears the degraded flag

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::BacklogConfig;
use crate::observability::metrics;
use crate::queue::JobQueue;
use crate::resilience::timeouts::with_timeout;

/// Most recent sample. Only the rolling value is kept.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogSample {
    pub timestamp: DateTime<Utc>,
    /// `None` when the queue could not be sampled.
    pub depth: Option<u64>,
    pub consecutive_breaches: u32,
}

/// What one sample did to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Queue unreachable; counters untouched.
    Unknown,
    /// Under threshold, no episode in progress.
    Healthy,
    /// Over threshold, alert not (or already) raised.
    Breach { consecutive: u32 },
    /// This sample raised the episode's alert.
    Alert { depth: u64 },
    /// Under threshold, ending a degraded episode.
    Recovered,
}

#[derive(Debug, Default)]
struct MonitorState {
    consecutive_breaches: u32,
    alerted: bool,
    last: Option<BacklogSample>,
}

pub struct BacklogMonitor {
    queue: Arc<dyn JobQueue>,
    config: BacklogConfig,
    sample_timeout: Duration,
    state: Mutex<MonitorState>,
    alerts_raised: AtomicU64,
}

impl BacklogMonitor {
    pub fn new(queue: Arc<dyn JobQueue>, config: BacklogConfig, sample_timeout: Duration) -> Self {
        Self {
            queue,
            config,
            sample_timeout,
            state: Mutex::new(MonitorState::default()),
            alerts_raised: AtomicU64::new(0),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Backlog monitor disabled");
            return;
        }

        tracing::info!(
            interval = self.config.check_interval_secs,
            threshold = self.config.high_backlog_threshold,
            "Backlog monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.check_interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Backlog monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Take one sample and update the breach counter.
    pub async fn sample(&self) -> SampleOutcome {
        let depth = match with_timeout(self.sample_timeout, self.queue.depth()).await {
            Ok(depth) => depth,
            Err(e) => {
                let mut state = self.state.lock();
                tracing::warn!(error = %e, breaches = state.consecutive_breaches, "Backlog sample unknown");
                state.last = Some(BacklogSample {
                    timestamp: Utc::now(),
                    depth: None,
                    consecutive_breaches: state.consecutive_breaches,
                });
                return SampleOutcome::Unknown;
            }
        };

        metrics::record_backlog_depth(depth);

        let mut state = self.state.lock();
        let outcome = if depth > self.config.high_backlog_threshold {
            state.consecutive_breaches += 1;
            if state.consecutive_breaches >= self.config.consecutive_alerts_threshold && !state.alerted {
                state.alerted = true;
                self.alerts_raised.fetch_add(1, Ordering::Relaxed);
                metrics::record_backlog_alert();
                tracing::error!(
                    depth,
                    threshold = self.config.high_backlog_threshold,
                    consecutive = state.consecutive_breaches,
                    "Job queue backlog alert"
                );
                SampleOutcome::Alert { depth }
            } else {
                tracing::debug!(depth, consecutive = state.consecutive_breaches, "Backlog over threshold");
                SampleOutcome::Breach {
                    consecutive: state.consecutive_breaches,
                }
            }
        } else {
            let was_degraded = state.alerted;
            state.consecutive_breaches = 0;
            state.alerted = false;
            if was_degraded {
                tracing::info!(depth, "Job queue backlog recovered");
                SampleOutcome::Recovered
            } else {
                SampleOutcome::Healthy
            }
        };

        state.last = Some(BacklogSample {
            timestamp: Utc::now(),
            depth: Some(depth),
            consecutive_breaches: state.consecutive_breaches,
        });
        outcome
    }

    /// True between an alert and the next recovering sample.
    pub fn is_degraded(&self) -> bool {
        self.state.lock().alerted
    }

    pub fn consecutive_breaches(&self) -> u32 {
        self.state.lock().consecutive_breaches
    }

    pub fn last_sample(&self) -> Option<BacklogSample> {
        self.state.lock().last.clone()
    }

    pub fn alerts_raised(&self) -> u64 {
        self.alerts_raised.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    /// Queue whose depth is set by the test.
    struct ScriptedQueue {
        depth: AtomicU64,
        down: AtomicBool,
    }

    impl ScriptedQueue {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                depth: AtomicU64::new(0),
                down: AtomicBool::new(false),
            })
        }

        fn set(&self, depth: u64) {
            self.depth.store(depth, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl JobQueue for ScriptedQueue {
        async fn add_job(&self, _: &str, _: serde_json::Value) -> Result<crate::queue::Job, QueueError> {
            Err(QueueError::Unavailable("scripted".into()))
        }

        async fn depth(&self) -> Result<u64, QueueError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(QueueError::Unavailable("broker down".into()));
            }
            Ok(self.depth.load(Ordering::SeqCst))
        }

        async fn ping(&self) -> Result<(), QueueError> {
            Ok(())
        }
    }

    fn monitor(queue: Arc<ScriptedQueue>) -> BacklogMonitor {
        let config = BacklogConfig {
            high_backlog_threshold: 100,
            consecutive_alerts_threshold: 3,
            ..BacklogConfig::default()
        };
        BacklogMonitor::new(queue, config, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_alert_on_threshold_sample_only() {
        let queue = ScriptedQueue::new();
        let monitor = monitor(queue.clone());
        queue.set(101);

        assert_eq!(monitor.sample().await, SampleOutcome::Breach { consecutive: 1 });
        assert_eq!(monitor.sample().await, SampleOutcome::Breach { consecutive: 2 });
        assert_eq!(monitor.alerts_raised(), 0);
        assert!(!monitor.is_degraded());

        assert_eq!(monitor.sample().await, SampleOutcome::Alert { depth: 101 });
        assert!(monitor.is_degraded());

        // Still one alert for the same episode.
        assert_eq!(monitor.sample().await, SampleOutcome::Breach { consecutive: 4 });
        assert_eq!(monitor.alerts_raised(), 1);
    }

    #[tokio::test]
    async fn test_single_recovery_resets() {
        let queue = ScriptedQueue::new();
        let monitor = monitor(queue.clone());
        queue.set(500);
        for _ in 0..3 {
            monitor.sample().await;
        }
        assert!(monitor.is_degraded());

        queue.set(100);
        assert_eq!(monitor.sample().await, SampleOutcome::Recovered);
        assert_eq!(monitor.consecutive_breaches(), 0);
        assert!(!monitor.is_degraded());

        // A new episode alerts again.
        queue.set(500);
        for _ in 0..3 {
            monitor.sample().await;
        }
        assert_eq!(monitor.alerts_raised(), 2);
    }

    #[tokio::test]
    async fn test_unknown_sample_leaves_counter() {
        let queue = ScriptedQueue::new();
        let monitor = monitor(queue.clone());
        queue.set(500);
        monitor.sample().await;
        monitor.sample().await;

        queue.down.store(true, Ordering::SeqCst);
        assert_eq!(monitor.sample().await, SampleOutcome::Unknown);
        assert_eq!(monitor.consecutive_breaches(), 2);
        assert_eq!(monitor.last_sample().unwrap().depth, None);

        queue.down.store(false, Ordering::SeqCst);
        assert!(matches!(monitor.sample().await, SampleOutcome::Alert { .. }));
    }

    #[tokio::test]
    async fn test_interrupted_breaches_do_not_alert() {
        let queue = ScriptedQueue::new();
        let monitor = monitor(queue.clone());
        for depth in [500, 500, 10, 500, 500] {
            queue.set(depth);
            monitor.sample().await;
        }
        assert_eq!(monitor.alerts_raised(), 0);
        assert_eq!(monitor.consecutive_breaches(), 2);
    }
}
