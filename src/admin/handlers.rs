use axum::extract::State;
use serde::Serialize;

use crate::health::BacklogSample;
use crate::http::response::Envelope;
use crate::http::server::AppState;
use crate::resilience::circuit_breaker::BreakerSnapshot;
use crate::spool::SpoolStats;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub store: &'static str,
    pub publisher: &'static str,
    pub rate_limited_keys: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogStatus {
    pub enabled: bool,
    pub degraded: bool,
    pub consecutive_breaches: u32,
    pub alerts_raised: u64,
    pub threshold: u64,
    pub last_sample: Option<BacklogSample>,
}

pub async fn get_status(State(state): State<AppState>) -> Envelope<SystemStatus> {
    let report = state.health.readiness().await;
    Envelope::ok(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: report.status,
        uptime_secs: state.started_at.elapsed().as_secs(),
        store: state.pipeline.store().name(),
        publisher: state.pipeline.publisher().kind(),
        rate_limited_keys: state.limiter.tracked_keys(),
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Envelope<Vec<BreakerSnapshot>> {
    Envelope::ok(state.breakers.snapshot())
}

pub async fn get_backlog(State(state): State<AppState>) -> Envelope<BacklogStatus> {
    Envelope::ok(BacklogStatus {
        enabled: state.config.backlog.enabled,
        degraded: state.backlog.is_degraded(),
        consecutive_breaches: state.backlog.consecutive_breaches(),
        alerts_raised: state.backlog.alerts_raised(),
        threshold: state.config.backlog.high_backlog_threshold,
        last_sample: state.backlog.last_sample(),
    })
}

pub async fn get_spool(State(state): State<AppState>) -> Envelope<SpoolStats> {
    Envelope::ok(state.spool.stats())
}
