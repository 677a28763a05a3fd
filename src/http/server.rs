//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build every subsystem from configuration and collaborators
//! - Create the Axum router with all handlers
//! - Wire up middleware (trace, request id, timeout, body limit,
//!   rate limit, breaker guard, telemetry)
//! - Render framework-level errors (413, 408, 404, 405) in the envelope
//! - Run background loops and serve until shutdown

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::callbacks::handlers::{query_callbacks, receive_callback};
use crate::callbacks::{CallbackPipeline, CallbackStore, Publisher, RetentionSweeper, StorageProbe};
use crate::config::GatewayConfig;
use crate::health::handlers::{liveness, readiness};
use crate::health::{BacklogMonitor, HealthAggregator};
use crate::http::middleware::{breaker_guard_middleware, telemetry_middleware};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, RequestIdExt};
use crate::http::response::envelope_plain_errors;
use crate::lifecycle::{Collaborators, Shutdown, StartupError};
use crate::queue::JobQueue;
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::security::rate_limit::{rate_limit_middleware, FixedWindowLimiter, RateLimitState};
use crate::security::signature::SignatureVerifier;
use crate::spool::{RetrySpool, TelemetryRecorder, TelemetrySink};
use crate::tasks::cancel_task;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub pipeline: Arc<CallbackPipeline>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub backlog: Arc<BacklogMonitor>,
    pub spool: Arc<RetrySpool>,
    pub recorder: TelemetryRecorder,
    pub health: Arc<HealthAggregator>,
    pub queue: Arc<dyn JobQueue>,
    pub downstream_timeout: Duration,
    pub started_at: Instant,
}

/// HTTP server for the ingress gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
    store: Arc<dyn CallbackStore>,
    sink: Arc<dyn TelemetrySink>,
}

impl HttpServer {
    pub fn new(config: GatewayConfig, collaborators: Collaborators) -> Result<Self, StartupError> {
        let Collaborators { store, queue, sink } = collaborators;
        let config = Arc::new(config);
        let downstream_timeout = Duration::from_millis(config.timeouts.downstream_ms);

        let breakers = Arc::new(CircuitBreakerRegistry::new(&config.circuit_breaker));
        let limiter = Arc::new(FixedWindowLimiter::from_config(&config.rate_limit));

        let spool = match RetrySpool::load(&config.spool) {
            Ok(spool) => spool,
            Err(e) => {
                tracing::warn!(error = %e, "Could not restore telemetry spool, starting empty");
                RetrySpool::new(&config.spool)
            }
        };
        let spool = Arc::new(spool);
        let recorder = TelemetryRecorder::new(sink.clone(), spool.clone(), downstream_timeout);

        let publisher = Publisher::from_config(
            &config.publisher,
            queue.clone(),
            breakers.clone(),
            downstream_timeout,
        )?;
        let probe = StorageProbe::from_config(
            &config.storage_probe,
            config.mode,
            breakers.clone(),
            downstream_timeout,
        )?;
        let verifier = SignatureVerifier::new(
            &config.callbacks.secret,
            config.callbacks.enforce_signature,
        );
        if !verifier.enforced() {
            tracing::warn!("Callback signature enforcement is disabled");
        }

        let pipeline = Arc::new(CallbackPipeline::new(
            store.clone(),
            Arc::new(publisher),
            Arc::new(probe),
            verifier,
            config.callbacks.allow_status_corrections,
            downstream_timeout,
        ));

        let backlog = Arc::new(BacklogMonitor::new(
            queue.clone(),
            config.backlog.clone(),
            downstream_timeout,
        ));
        let health = Arc::new(HealthAggregator::new(
            store.clone(),
            queue.clone(),
            breakers.clone(),
            spool.clone(),
            backlog.clone(),
            Duration::from_millis(config.timeouts.health_check_ms),
        ));

        let state = AppState {
            config,
            pipeline,
            breakers,
            limiter,
            backlog,
            spool,
            recorder,
            health,
            queue,
            downstream_timeout,
            started_at: Instant::now(),
        };

        let router = Self::build_router(&state);
        Ok(Self {
            router,
            state,
            store,
            sink,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: &AppState) -> Router {
        let config = &state.config;

        let mut api = Router::new()
            .route("/callbacks/scf", post(receive_callback).get(query_callbacks))
            .route("/tasks/{task_id}/cancel", post(cancel_task))
            .route_layer(middleware::from_fn_with_state(
                state.breakers.clone(),
                breaker_guard_middleware,
            ));
        if config.rate_limit.enabled {
            let limits = RateLimitState {
                limiter: state.limiter.clone(),
                per_client: config.rate_limit.per_client,
            };
            api = api.route_layer(middleware::from_fn_with_state(limits, rate_limit_middleware));
        }

        let mut app = Router::new()
            .route("/health/ready", get(readiness))
            .route("/health/live", get(liveness))
            .merge(api);
        if config.admin.enabled {
            app = app.merge(setup_admin_router(state.clone()));
        }

        app.route_layer(middleware::from_fn_with_state(
            state.recorder.clone(),
            telemetry_middleware,
        ))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(config.listener.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(middleware::map_response(envelope_plain_errors))
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = request.request_id().unwrap_or("-"),
            )
        }))
        .layer(set_request_id_layer())
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Start background loops and serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Arc<Shutdown>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let background = self.spawn_background(&shutdown);

        let signal = shutdown.clone();
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move { signal.wait().await })
            .await?;

        // Covers the server exiting for a reason other than the signal.
        shutdown.trigger();
        for handle in background {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background task panicked");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_background(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let state = &self.state;
        let config = &state.config;
        let mut handles = Vec::new();

        handles.push(tokio::spawn(state.backlog.clone().run(shutdown.subscribe())));

        handles.push(tokio::spawn(state.spool.clone().run(
            self.sink.clone(),
            state.downstream_timeout,
            shutdown.subscribe(),
        )));

        let sweeper = RetentionSweeper::new(
            self.store.clone(),
            &config.callbacks,
            state.downstream_timeout,
        );
        handles.push(tokio::spawn(sweeper.run(shutdown.subscribe())));

        if config.rate_limit.enabled {
            handles.push(tokio::spawn(state.limiter.clone().run_pruner(
                Duration::from_secs(config.rate_limit.prune_interval_secs),
                shutdown.subscribe(),
            )));
        }

        handles
    }
}
