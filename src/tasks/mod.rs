//! Task control endpoints.
//!
//! Cancellation is dispatched as a `cancel_task` job on the shared queue;
//! the request is acknowledged as soon as the queue accepts the job.

pub mod handlers;

pub use handlers::{cancel_task, CancelAccepted};
