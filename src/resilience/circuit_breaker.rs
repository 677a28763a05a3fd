//! Per-route circuit breakers.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: downstream assumed down, requests fail fast
//! - Half-Open: a bounded number of trial requests probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      consecutive failures >= failure_threshold
//! Open      → Half-Open: first check after reset_timeout since opened_at
//! Half-Open → Closed:    consecutive successes >= success_threshold
//! Half-Open → Open:      any failure (opened_at refreshed)
//! ```
//!
//! # Design Decisions
//! - One registry instance owns every breaker; it is injected, never global
//! - Breakers are created lazily per RouteKey and live for the process
//! - Each operation runs under the DashMap shard lock for its key, so
//!   concurrent callers on one route never interleave partial updates
//! - An open breaker is a signal callers branch on, not an error

use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::routing::RouteKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Mutable state of one breaker.
#[derive(Debug, Clone)]
pub struct BreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at: Option<Instant>,
    half_open_since: Option<Instant>,
    trials_in_flight: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            half_open_since: None,
            trials_in_flight: 0,
        }
    }

    fn reset_counters(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.trials_in_flight = 0;
    }
}

/// Serializable view of a breaker, for admin and health output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub route: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the breaker last opened.
    pub open_for_ms: Option<u64>,
}

/// Result of a call made through [`CircuitBreakerRegistry::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit open for {0}")]
    Open(String),
    #[error(transparent)]
    Inner(E),
}

/// State store for every breaker in the process.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<RouteKey, BreakerState>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    critical_routes: Vec<RouteKey>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            half_open_max_calls: config.half_open_max_calls.max(1),
            critical_routes: config
                .critical_routes
                .iter()
                .map(|r| RouteKey::route(r))
                .collect(),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, key: &RouteKey) {
        let mut entry = self.breakers.entry(key.clone()).or_insert_with(BreakerState::new);
        let breaker = entry.value_mut();

        match breaker.state {
            CircuitState::Closed => {
                breaker.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                breaker.trials_in_flight = breaker.trials_in_flight.saturating_sub(1);
                breaker.consecutive_successes += 1;
                if breaker.consecutive_successes >= self.success_threshold {
                    breaker.state = CircuitState::Closed;
                    breaker.opened_at = None;
                    breaker.half_open_since = None;
                    breaker.reset_counters();
                    tracing::info!(route = %key, "Circuit closed after successful trials");
                    metrics::record_breaker_transition(key, CircuitState::Closed);
                }
            }
            // A call admitted before the breaker opened; it does not count.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, key: &RouteKey) {
        let mut entry = self.breakers.entry(key.clone()).or_insert_with(BreakerState::new);
        let breaker = entry.value_mut();

        match breaker.state {
            CircuitState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.failure_threshold {
                    let failures = breaker.consecutive_failures;
                    self.trip(key, breaker);
                    tracing::warn!(route = %key, failures, "Circuit opened");
                }
            }
            CircuitState::HalfOpen => {
                self.trip(key, breaker);
                tracing::warn!(route = %key, "Trial call failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Whether calls on `key` must short-circuit.
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open here.
    /// While half-open, each `false` admits one trial call; callers beyond
    /// `half_open_max_calls` see `true` until trial outcomes are recorded.
    pub fn is_open(&self, key: &RouteKey) -> bool {
        let Some(mut entry) = self.breakers.get_mut(key) else {
            return false;
        };
        let breaker = entry.value_mut();
        let now = Instant::now();

        self.advance(key, breaker, now);

        match breaker.state {
            CircuitState::Closed => false,
            CircuitState::Open => true,
            CircuitState::HalfOpen => {
                if breaker.trials_in_flight < self.half_open_max_calls {
                    breaker.trials_in_flight += 1;
                    return false;
                }
                // Trials that never reported back must not wedge the breaker.
                let stale = breaker
                    .half_open_since
                    .is_some_and(|since| now.duration_since(since) >= self.reset_timeout);
                if stale {
                    breaker.half_open_since = Some(now);
                    breaker.trials_in_flight = 1;
                    return false;
                }
                true
            }
        }
    }

    /// Current state of `key`, applying the timed open → half-open edge.
    pub fn get_state(&self, key: &RouteKey) -> CircuitState {
        match self.breakers.get_mut(key) {
            Some(mut entry) => {
                let breaker = entry.value_mut();
                self.advance(key, breaker, Instant::now());
                breaker.state
            }
            None => CircuitState::Closed,
        }
    }

    /// Run `fut` behind the breaker for `key`, recording its outcome.
    pub async fn call<T, E, F>(&self, key: &RouteKey, fut: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if self.is_open(key) {
            metrics::record_breaker_short_circuit(key);
            return Err(BreakerError::Open(key.to_string()));
        }

        match fut.await {
            Ok(value) => {
                self.record_success(key);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(key);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Whether `key` is one of the configured critical routes.
    pub fn is_critical(&self, key: &RouteKey) -> bool {
        self.critical_routes.iter().any(|r| r == key)
    }

    /// Critical routes whose breaker is currently open.
    pub fn open_critical_routes(&self) -> Vec<RouteKey> {
        self.critical_routes
            .iter()
            .filter(|key| self.get_state(key) == CircuitState::Open)
            .cloned()
            .collect()
    }

    /// Snapshot of every breaker created so far.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<BreakerSnapshot> = self
            .breakers
            .iter_mut()
            .map(|mut entry| {
                let key = entry.key().clone();
                let breaker = entry.value_mut();
                self.advance(&key, breaker, now);
                BreakerSnapshot {
                    route: key.to_string(),
                    state: breaker.state,
                    consecutive_failures: breaker.consecutive_failures,
                    consecutive_successes: breaker.consecutive_successes,
                    open_for_ms: breaker
                        .opened_at
                        .map(|at| now.duration_since(at).as_millis() as u64),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.route.cmp(&b.route));
        snapshots
    }

    fn trip(&self, key: &RouteKey, breaker: &mut BreakerState) {
        breaker.state = CircuitState::Open;
        breaker.opened_at = Some(Instant::now());
        breaker.half_open_since = None;
        breaker.reset_counters();
        metrics::record_breaker_transition(key, CircuitState::Open);
    }

    fn advance(&self, key: &RouteKey, breaker: &mut BreakerState, now: Instant) {
        if breaker.state != CircuitState::Open {
            return;
        }
        let elapsed = breaker
            .opened_at
            .map(|at| now.duration_since(at))
            .unwrap_or(self.reset_timeout);
        if elapsed >= self.reset_timeout {
            breaker.state = CircuitState::HalfOpen;
            breaker.half_open_since = Some(now);
            breaker.reset_counters();
            tracing::info!(route = %key, "Circuit half-open, admitting trial traffic");
            metrics::record_breaker_transition(key, CircuitState::HalfOpen);
        }
    }
}
