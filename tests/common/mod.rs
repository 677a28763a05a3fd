//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use render_ingress::callbacks::store::{CallbackFilter, CreateOutcome, Page, PageRequest};
use render_ingress::callbacks::types::{CallbackEvent, StatusUpdate};
use render_ingress::callbacks::{CallbackStore, MemoryCallbackStore, StoreError};
use render_ingress::config::GatewayConfig;
use render_ingress::http::AppState;
use render_ingress::queue::{Job, JobQueue, MemoryJobQueue, QueueError};
use render_ingress::security::signature::{sign, SIGNATURE_HEADER};
use render_ingress::spool::LogSink;
use render_ingress::{Collaborators, HttpServer};

pub const SECRET: &str = "integration-secret";

/// Defaults with a secret, no spool file and no background noise.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.callbacks.secret = SECRET.to_string();
    config.spool.path = None;
    config.backlog.enabled = false;
    config
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryCallbackStore>,
    pub queue: Arc<MemoryJobQueue>,
}

/// App over in-memory collaborators that the test can inspect.
pub fn app(config: GatewayConfig) -> TestApp {
    let store = Arc::new(MemoryCallbackStore::new());
    let queue = Arc::new(MemoryJobQueue::default());
    let collaborators = Collaborators {
        store: store.clone(),
        queue: queue.clone(),
        sink: Arc::new(LogSink),
    };
    let server = HttpServer::new(config, collaborators).expect("server builds");
    TestApp {
        router: server.router(),
        state: server.state().clone(),
        store,
        queue,
    }
}

/// App with arbitrary collaborators.
pub fn app_with(config: GatewayConfig, collaborators: Collaborators) -> Router {
    HttpServer::new(config, collaborators)
        .expect("server builds")
        .router()
}

pub fn callback_payload(event_id: &str, status: &str) -> Value {
    json!({
        "eventId": event_id,
        "taskId": "t1",
        "status": status,
        "cosObject": {"key": "k", "bucket": "b", "region": "r"}
    })
}

pub fn signed_callback(payload: &Value) -> Request<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    let signature = sign(SECRET, &body);
    Request::builder()
        .method(Method::POST)
        .uri("/callbacks/scf")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

pub fn unsigned_callback(payload: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/callbacks/scf")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Store that refuses every operation.
pub struct FailingStore;

#[async_trait]
impl CallbackStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn create_if_absent(&self, _: CallbackEvent) -> Result<CreateOutcome, StoreError> {
        Err(StoreError::Unavailable("injected".into()))
    }

    async fn find_by_event_id(&self, _: &str) -> Result<Option<CallbackEvent>, StoreError> {
        Err(StoreError::Unavailable("injected".into()))
    }

    async fn list(
        &self,
        _: &CallbackFilter,
        _: PageRequest,
    ) -> Result<Page<CallbackEvent>, StoreError> {
        Err(StoreError::Unavailable("injected".into()))
    }

    async fn update_status(&self, _: &str, _: StatusUpdate) -> Result<CallbackEvent, StoreError> {
        Err(StoreError::Unavailable("injected".into()))
    }

    async fn delete_older_than(&self, _: DateTime<Utc>) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("injected".into()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("injected".into()))
    }
}

/// Queue that is always unreachable.
pub struct FailingQueue;

#[async_trait]
impl JobQueue for FailingQueue {
    async fn add_job(&self, _: &str, _: Value) -> Result<Job, QueueError> {
        Err(QueueError::Unavailable("injected".into()))
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Err(QueueError::Unavailable("injected".into()))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("injected".into()))
    }
}

/// Start a programmable HTTP collector that answers every request with `f()`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = u16> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let status = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_text
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });

    addr
}
