//! Timeout enforcement.
//!
//! Every collaborator call (datastore, queue, probe, publish, telemetry sink)
//! goes through [`with_timeout`] so no request suspends without a deadline.
//! Collaborator error types absorb [`TimedOut`] via `From`.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Run `fut` with a deadline, mapping expiry into the caller's error type.
pub async fn with_timeout<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimedOut>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TimedOut(limit).into()),
    }
}
