//! Fixed-window rate limiting per route.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::http::response::Envelope;
use crate::http::CLIENT_ID_HEADER;
use crate::observability::metrics;
use crate::routing::RouteKey;

/// Counter for one key's current window.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub window_start: Instant,
    pub count: u32,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the current window ends.
    pub reset_after: Duration,
}

/// Fixed-window counters keyed by route (and optionally client).
///
/// State is process-local: each instance enforces its own limit.
pub struct FixedWindowLimiter {
    windows: DashMap<RouteKey, RateWindow>,
    window: Duration,
    max_requests: u32,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: DashMap::new(),
            // Upper bound keeps the in-window offset representable in u64 nanos.
            window: window.clamp(Duration::from_millis(1), Duration::from_nanos(u64::MAX)),
            max_requests,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(Duration::from_millis(config.window_ms), config.max_requests)
    }

    /// Admit or deny one request for `key`.
    pub fn allow(&self, key: &RouteKey) -> bool {
        self.check(key).allowed
    }

    /// Admission check with window details.
    pub fn check(&self, key: &RouteKey) -> RateDecision {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.clone()).or_insert(RateWindow {
            window_start: now,
            count: 0,
        });
        let window = entry.value_mut();

        let elapsed = now.duration_since(window.window_start);
        if elapsed >= self.window {
            // Snap to the boundary of the window `now` falls in.
            let offset = elapsed.as_nanos() % self.window.as_nanos();
            window.window_start = now - Duration::from_nanos(offset as u64);
            window.count = 0;
        }

        let reset_after = self
            .window
            .saturating_sub(now.duration_since(window.window_start));

        if window.count >= self.max_requests {
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_after,
            };
        }

        window.count += 1;
        RateDecision {
            allowed: true,
            remaining: self.max_requests - window.count,
            reset_after,
        }
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.window_start) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Periodically evict expired windows until shutdown.
    pub async fn run_pruner(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.prune();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.tracked_keys(), "Pruned rate-limit windows");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate-limit pruner received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Middleware state for the limiter.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<FixedWindowLimiter>,
    pub per_client: bool,
}

/// Key a request by its route template and, when enabled, `x-client-id`.
pub fn request_key(request: &Request<Body>, per_client: bool) -> RouteKey {
    let key = match request.extensions().get::<MatchedPath>() {
        Some(matched) => RouteKey::route(matched.as_str()),
        None => RouteKey::route(request.uri().path()),
    };

    if !per_client {
        return key;
    }

    match request
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(client) => key.with_client(client.trim()),
        None => key,
    }
}

/// Middleware function for per-route rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request_key(&request, state.per_client);
    let decision = state.limiter.check(&key);

    if decision.allowed {
        return next.run(request).await;
    }

    tracing::warn!(route = %key, "Rate limit exceeded");
    metrics::record_rate_limited(&key);

    let mut response =
        Envelope::failure(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    let retry_after = decision.reset_after.as_secs_f64().ceil().max(1.0) as u64;
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RouteKey {
        RouteKey::route("/callbacks/scf")
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_max_requests_per_window() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(1), 3);
        let key = key();

        for remaining in (0..3).rev() {
            let decision = limiter.check(&key);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, remaining);
        }
        assert!(!limiter.allow(&key));
        assert!(!limiter.allow(&key));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_once_per_boundary() {
        let limiter = FixedWindowLimiter::new(Duration::from_millis(100), 2);
        let key = key();
        assert!(limiter.allow(&key));

        // Skip several windows; the new window starts on a boundary.
        tokio::time::advance(Duration::from_millis(350)).await;
        let decision = limiter.check(&key);
        assert!(decision.allowed);
        assert_eq!(decision.reset_after, Duration::from_millis(50));
        assert!(limiter.allow(&key));
        assert!(!limiter.allow(&key));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(limiter.allow(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_after_many_idle_windows() {
        let limiter = FixedWindowLimiter::new(Duration::from_millis(1), 1);
        let key = key();
        assert!(limiter.allow(&key));

        // More elapsed windows than fit in a u32.
        let idle = Duration::from_millis(u32::MAX as u64 + 1) + Duration::from_micros(500);
        tokio::time::advance(idle).await;

        let decision = limiter.check(&key);
        assert!(decision.allowed);
        assert_eq!(decision.reset_after, Duration::from_micros(500));
        assert!(!limiter.allow(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(1), 1);
        let a = key().with_client("a");
        let b = key().with_client("b");
        assert!(limiter.allow(&a));
        assert!(!limiter.allow(&a));
        assert!(limiter.allow(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_expired_windows() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(1), 1);
        limiter.allow(&key());
        limiter.allow(&RouteKey::route("/other"));
        assert_eq!(limiter.prune(), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(limiter.prune(), 2);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_request_key_uses_client_header() {
        let request = Request::builder()
            .uri("/callbacks/scf")
            .header(CLIENT_ID_HEADER, "app-7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_key(&request, true).to_string(), "/callbacks/scf#app-7");
        assert_eq!(request_key(&request, false).to_string(), "/callbacks/scf");
    }
}
