//! Readiness aggregation.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::callbacks::CallbackStore;
use crate::health::backlog::BacklogMonitor;
use crate::queue::JobQueue;
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::spool::RetrySpool;

/// Outcome of one check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            healthy: true,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessChecks {
    pub database: CheckResult,
    pub queue: CheckResult,
    pub circuit_breaker: CheckResult,
    pub retry_spool: CheckResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub status: &'static str,
    pub checks: ReadinessChecks,
    /// Backlog alert in progress. Informational; does not affect readiness.
    pub backlog_degraded: bool,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

pub struct HealthAggregator {
    store: Arc<dyn CallbackStore>,
    queue: Arc<dyn JobQueue>,
    breakers: Arc<CircuitBreakerRegistry>,
    spool: Arc<RetrySpool>,
    backlog: Arc<BacklogMonitor>,
    check_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(
        store: Arc<dyn CallbackStore>,
        queue: Arc<dyn JobQueue>,
        breakers: Arc<CircuitBreakerRegistry>,
        spool: Arc<RetrySpool>,
        backlog: Arc<BacklogMonitor>,
        check_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            breakers,
            spool,
            backlog,
            check_timeout,
        }
    }

    pub async fn readiness(&self) -> ReadinessReport {
        let (database, queue) = tokio::join!(
            isolated(self.check_timeout, async {
                self.store.ping().await.map_err(|e| e.to_string())
            }),
            isolated(self.check_timeout, async {
                self.queue.ping().await.map_err(|e| e.to_string())
            }),
        );

        let checks = ReadinessChecks {
            database,
            queue,
            circuit_breaker: self.breaker_check(),
            retry_spool: self.spool_check(),
        };

        let ready = checks.database.healthy
            && checks.queue.healthy
            && checks.circuit_breaker.healthy
            && checks.retry_spool.healthy;

        if !ready {
            tracing::warn!(checks = ?checks, "Readiness check failed");
        }

        ReadinessReport {
            status: if ready { "ready" } else { "not ready" },
            checks,
            backlog_degraded: self.backlog.is_degraded(),
        }
    }

    fn breaker_check(&self) -> CheckResult {
        let open = self.breakers.open_critical_routes();
        if open.is_empty() {
            CheckResult::pass()
        } else {
            let routes: Vec<String> = open.iter().map(|k| k.to_string()).collect();
            CheckResult::fail(format!("circuit open: {}", routes.join(", ")))
        }
    }

    fn spool_check(&self) -> CheckResult {
        let stats = self.spool.stats();
        if stats.size < stats.capacity {
            CheckResult::pass()
        } else {
            CheckResult::fail(format!("retry spool at capacity ({}/{})", stats.size, stats.capacity))
        }
    }
}

async fn isolated<F>(limit: Duration, check: F) -> CheckResult
where
    F: Future<Output = Result<(), String>>,
{
    match tokio::time::timeout(limit, check).await {
        Ok(Ok(())) => CheckResult::pass(),
        Ok(Err(message)) => CheckResult::fail(message),
        Err(_) => CheckResult::fail(format!("check timed out after {:?}", limit)),
    }
}
