//! Bounded, durable retry spool for telemetry.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::SpoolConfig;
use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::timeouts::with_timeout;
use crate::spool::sink::{TelemetryRecord, TelemetrySink};

/// A record waiting for redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueEntry {
    pub payload: TelemetryRecord,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    /// Backoff gate; not persisted, so reloaded entries are due immediately.
    #[serde(skip)]
    next_attempt_at: Option<Instant>,
}

impl RetryQueueEntry {
    fn new(payload: TelemetryRecord) -> Self {
        Self {
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
            next_attempt_at: None,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Counters exposed to health and admin.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpoolStats {
    pub size: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub discarded: u64,
    pub delivered: u64,
}

/// Result of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub retried: usize,
    pub discarded: usize,
}

pub struct RetrySpool {
    entries: Mutex<VecDeque<RetryQueueEntry>>,
    capacity: usize,
    max_attempts: u32,
    flush_batch: usize,
    flush_interval: Duration,
    backoff: BackoffPolicy,
    path: Option<PathBuf>,
    /// Rejected at enqueue because the spool was full.
    dropped: AtomicU64,
    /// Given up on after `max_attempts`.
    discarded: AtomicU64,
    delivered: AtomicU64,
    /// Bumped under the entries lock on every change.
    revision: AtomicU64,
    /// Revision last written to `path`.
    persisted_revision: AtomicU64,
}

impl RetrySpool {
    /// Empty spool; nothing is read from disk.
    pub fn new(config: &SpoolConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(config.max_size.min(1024))),
            capacity: config.max_size.max(1),
            max_attempts: config.max_attempts.max(1),
            flush_batch: config.flush_batch.max(1),
            flush_interval: Duration::from_secs(config.flush_interval_secs.max(1)),
            backoff: BackoffPolicy::new(config.base_backoff_ms, config.max_backoff_ms),
            path: config.path.as_ref().map(PathBuf::from),
            dropped: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            revision: AtomicU64::new(0),
            persisted_revision: AtomicU64::new(0),
        }
    }

    /// Spool restored from `config.path`, if the file exists.
    pub fn load(config: &SpoolConfig) -> std::io::Result<Self> {
        let spool = Self::new(config);
        let Some(path) = spool.path.as_deref() else {
            return Ok(spool);
        };
        if !path.exists() {
            return Ok(spool);
        }

        let reader = BufReader::new(File::open(path)?);
        let restored: Vec<RetryQueueEntry> = serde_json::from_reader(reader)?;
        let total = restored.len();
        {
            let mut entries = spool.entries.lock();
            for entry in restored {
                if entries.len() >= spool.capacity {
                    spool.dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::record_spool_dropped();
                    continue;
                }
                entries.push_back(entry);
            }
            metrics::record_spool_size(entries.len());
            tracing::info!(
                restored = entries.len(),
                dropped = total - entries.len(),
                path = %path.display(),
                "Loaded telemetry spool from disk"
            );
        }
        Ok(spool)
    }

    /// Write the spool to its file (via a temp file and rename) on the
    /// blocking pool. Skipped when nothing changed since the last write.
    /// Returns whether a file was written.
    pub async fn persist(&self) -> std::io::Result<bool> {
        let Some(path) = self.path.clone() else {
            return Ok(false);
        };
        let (revision, snapshot) = {
            let entries = self.entries.lock();
            let revision = self.revision.load(Ordering::Acquire);
            if revision == self.persisted_revision.load(Ordering::Acquire) {
                return Ok(false);
            }
            (revision, entries.iter().cloned().collect::<Vec<_>>())
        };

        let count = snapshot.len();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&target, &snapshot))
            .await
            .map_err(std::io::Error::other)??;

        self.persisted_revision.fetch_max(revision, Ordering::AcqRel);
        tracing::debug!(entries = count, path = %path.display(), "Persisted telemetry spool");
        Ok(true)
    }

    fn mark_changed(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Buffer a record. Returns `false` if the spool is full and it was dropped.
    pub fn enqueue(&self, record: TelemetryRecord) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::record_spool_dropped();
            tracing::warn!(capacity = self.capacity, dropped, "Telemetry spool full, dropping record");
            return false;
        }
        entries.push_back(RetryQueueEntry::new(record));
        self.mark_changed();
        metrics::record_spool_size(entries.len());
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// At the bound: new records are being dropped.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn stats(&self) -> SpoolStats {
        SpoolStats {
            size: self.len(),
            capacity: self.capacity,
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }

    /// Attempt redelivery of up to `flush_batch` due entries.
    pub async fn flush_once(&self, sink: &dyn TelemetrySink, timeout: Duration) -> FlushReport {
        let now = Instant::now();
        let due = self.take_due(now);
        if due.is_empty() {
            return FlushReport::default();
        }

        let records: Vec<TelemetryRecord> = due.iter().map(|e| e.payload.clone()).collect();
        let mut report = FlushReport::default();

        match with_timeout(timeout, sink.deliver(&records)).await {
            Ok(()) => {
                report.delivered = due.len();
                self.delivered.fetch_add(due.len() as u64, Ordering::Relaxed);
                metrics::record_spool_delivered(due.len() as u64);
                tracing::debug!(delivered = due.len(), sink = sink.name(), "Flushed telemetry spool");
            }
            Err(e) => {
                tracing::warn!(error = %e, batch = due.len(), sink = sink.name(), "Telemetry redelivery failed");
                let mut entries = self.entries.lock();
                // Reverse so push_front restores the original order.
                for mut entry in due.into_iter().rev() {
                    entry.attempts += 1;
                    if entry.attempts >= self.max_attempts {
                        report.discarded += 1;
                        continue;
                    }
                    if entries.len() >= self.capacity {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        metrics::record_spool_dropped();
                        continue;
                    }
                    entry.next_attempt_at = Some(now + self.backoff.delay_for(entry.attempts));
                    entries.push_front(entry);
                    report.retried += 1;
                }
                self.mark_changed();
                metrics::record_spool_size(entries.len());
            }
        }

        if report.discarded > 0 {
            self.discarded.fetch_add(report.discarded as u64, Ordering::Relaxed);
            metrics::record_spool_discarded(report.discarded as u64);
            tracing::warn!(
                discarded = report.discarded,
                max_attempts = self.max_attempts,
                "Discarded telemetry after max attempts"
            );
        }
        report
    }

    /// Flush loop. Persists after every pass and once more on shutdown.
    pub async fn run(
        self: Arc<Self>,
        sink: Arc<dyn TelemetrySink>,
        delivery_timeout: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(
            interval_secs = self.flush_interval.as_secs(),
            capacity = self.capacity,
            "Telemetry spool flusher starting"
        );
        let mut ticker = time::interval(self.flush_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_once(sink.as_ref(), delivery_timeout).await;
                    if let Err(e) = self.persist().await {
                        tracing::error!(error = %e, "Failed to persist telemetry spool");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Spool flusher received shutdown signal, exiting loop");
                    break;
                }
            }
        }

        if let Err(e) = self.persist().await {
            tracing::error!(error = %e, "Failed to persist telemetry spool on shutdown");
        }
    }

    fn take_due(&self, now: Instant) -> Vec<RetryQueueEntry> {
        let mut entries = self.entries.lock();
        let mut due = Vec::new();
        let mut kept = VecDeque::with_capacity(entries.len());
        while let Some(entry) = entries.pop_front() {
            if due.len() < self.flush_batch && entry.is_due(now) {
                due.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        *entries = kept;
        if !due.is_empty() {
            self.mark_changed();
        }
        due
    }
}

fn write_atomically(path: &Path, entries: &[RetryQueueEntry]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(writer, entries)?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::sink::SinkError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct ToggleSink {
        healthy: AtomicBool,
        received: AtomicU64,
    }

    impl ToggleSink {
        fn new(healthy: bool) -> Self {
            Self {
                healthy: AtomicBool::new(healthy),
                received: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl TelemetrySink for ToggleSink {
        fn name(&self) -> &'static str {
            "toggle"
        }

        async fn deliver(&self, records: &[TelemetryRecord]) -> Result<(), SinkError> {
            if self.healthy.load(Ordering::SeqCst) {
                self.received.fetch_add(records.len() as u64, Ordering::SeqCst);
                Ok(())
            } else {
                Err(SinkError::Rejected(503))
            }
        }
    }

    fn record(n: u16) -> TelemetryRecord {
        TelemetryRecord {
            route: "/callbacks/scf".into(),
            method: "POST".into(),
            status: n,
            latency_ms: 3,
            request_id: None,
            recorded_at: Utc::now(),
        }
    }

    fn config(max_size: usize) -> SpoolConfig {
        SpoolConfig {
            max_size,
            path: None,
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
            ..SpoolConfig::default()
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_bound_is_never_exceeded() {
        let spool = RetrySpool::new(&config(3));
        for n in 0..5 {
            spool.enqueue(record(n));
        }
        let stats = spool.stats();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.dropped, 2);
        assert!(spool.is_full());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_delivers_and_removes() {
        let spool = RetrySpool::new(&config(10));
        let sink = ToggleSink::new(true);
        spool.enqueue(record(1));
        spool.enqueue(record(2));

        let report = spool.flush_once(&sink, TIMEOUT).await;
        assert_eq!(report.delivered, 2);
        assert!(spool.is_empty());
        assert_eq!(sink.received.load(Ordering::SeqCst), 2);
        assert_eq!(spool.stats().delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_entries_back_off_then_discard() {
        let spool = RetrySpool::new(&config(10));
        let sink = ToggleSink::new(false);
        spool.enqueue(record(1));

        let report = spool.flush_once(&sink, TIMEOUT).await;
        assert_eq!(report.retried, 1);
        assert_eq!(spool.len(), 1);

        // Still backing off.
        assert_eq!(spool.flush_once(&sink, TIMEOUT).await, FlushReport::default());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(spool.flush_once(&sink, TIMEOUT).await.retried, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let report = spool.flush_once(&sink, TIMEOUT).await;
        assert_eq!(report.discarded, 1);
        assert!(spool.is_empty());
        assert_eq!(spool.stats().discarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_outage() {
        let spool = RetrySpool::new(&config(10));
        let sink = ToggleSink::new(false);
        spool.enqueue(record(1));
        spool.flush_once(&sink, TIMEOUT).await;

        sink.healthy.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(spool.flush_once(&sink, TIMEOUT).await.delivered, 1);
        assert!(spool.is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spool.json");
        let mut config = config(2);
        config.path = Some(path.to_string_lossy().into_owned());

        let spool = RetrySpool::new(&config);
        spool.enqueue(record(1));
        spool.enqueue(record(2));
        assert!(spool.persist().await.unwrap());

        let reloaded = RetrySpool::load(&config).unwrap();
        assert_eq!(reloaded.len(), 2);

        // A smaller bound at restart drops the overflow.
        config.max_size = 1;
        let shrunk = RetrySpool::load(&config).unwrap();
        assert_eq!(shrunk.len(), 1);
        assert_eq!(shrunk.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_persist_skips_unchanged_spool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.json");
        let mut config = config(4);
        config.path = Some(path.to_string_lossy().into_owned());
        let sink = ToggleSink::new(false);

        let spool = RetrySpool::new(&config);
        assert!(!spool.persist().await.unwrap());
        assert!(!path.exists());

        spool.enqueue(record(1));
        assert!(spool.persist().await.unwrap());
        assert!(!spool.persist().await.unwrap());

        // A failed redelivery changes attempt counts.
        spool.flush_once(&sink, TIMEOUT).await;
        assert!(spool.persist().await.unwrap());

        // A reloaded spool already matches its file.
        let reloaded = RetrySpool::load(&config).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(!reloaded.persist().await.unwrap());
    }

    #[test]
    fn test_load_without_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(2);
        config.path = Some(dir.path().join("missing.json").to_string_lossy().into_owned());
        assert!(RetrySpool::load(&config).unwrap().is_empty());
    }
}
