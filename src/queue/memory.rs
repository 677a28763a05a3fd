//! In-process job queue.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use uuid::Uuid;

use super::{Job, JobQueue, QueueError};

/// FIFO queue held in memory, optionally bounded.
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<Job>>,
    capacity: Option<usize>,
}

impl MemoryJobQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Remove up to `n` jobs from the head of the queue, as a worker would.
    pub fn take(&self, n: usize) -> Vec<Job> {
        let mut jobs = self.jobs.lock();
        let count = n.min(jobs.len());
        jobs.drain(..count).collect()
    }

    /// Jobs currently queued, without removing them.
    pub fn peek(&self) -> Vec<Job> {
        self.jobs.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn add_job(&self, name: &str, payload: serde_json::Value) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.lock();
        if let Some(capacity) = self.capacity {
            if jobs.len() >= capacity {
                return Err(QueueError::Full(capacity));
            }
        }

        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            payload,
            enqueued_at: Utc::now(),
        };
        jobs.push_back(job.clone());
        tracing::debug!(job_id = %job.id, job = %job.name, depth = jobs.len(), "Job enqueued");
        Ok(job)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.jobs.lock().len() as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
