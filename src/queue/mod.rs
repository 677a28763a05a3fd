//! Asynchronous job queue collaborator.
//!
//! # Data Flow
//! ```text
//! Ingress (cancel task, queue publisher)
//!     → JobQueue::add_job (accepted = acknowledged)
//!     → independent workers drain the queue
//!
//! Backlog monitor
//!     → JobQueue::depth (periodic sample)
//! ```
//!
//! # Design Decisions
//! - Ingress never waits for a job to complete, only for it to be accepted
//! - The trait is the seam for the shared broker; memory.rs is the in-process
//!   implementation used for single-node deployments and tests

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::timeouts::TimedOut;

pub use memory::MemoryJobQueue;

/// Job name used for task cancellation requests.
pub const CANCEL_TASK_JOB: &str = "cancel_task";

/// A unit of work handed to the shared queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue full ({0} jobs)")]
    Full(usize),

    #[error(transparent)]
    Timeout(#[from] TimedOut),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job; returns once the queue has accepted it.
    async fn add_job(&self, name: &str, payload: serde_json::Value) -> Result<Job, QueueError>;

    /// Number of jobs waiting to be processed.
    async fn depth(&self) -> Result<u64, QueueError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), QueueError>;
}
