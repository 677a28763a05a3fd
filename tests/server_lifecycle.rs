//! Full server over TCP: serve, degrade telemetry, shut down cleanly.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use render_ingress::{Collaborators, HttpServer, Shutdown};

mod common;
use common::*;

#[tokio::test]
async fn test_telemetry_outage_is_spooled_and_persisted_on_shutdown() {
    let collector = start_programmable_backend(|| async { 503 }).await;
    let dir = tempfile::tempdir().unwrap();
    let spool_path = dir.path().join("spool.json");

    let mut config = test_config();
    config.telemetry.endpoint = Some(format!("http://{}/ingest", collector));
    config.spool.path = Some(spool_path.to_string_lossy().into_owned());
    config.spool.flush_interval_secs = 3600;

    let collaborators = Collaborators::from_config(&config).await.unwrap();
    let server = HttpServer::new(config, collaborators).unwrap();
    let spool = server.state().spool.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    let client = reqwest::Client::new();
    for _ in 0..3 {
        let response = client
            .get(format!("http://{}/health/live", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    // Requests never wait on telemetry; give the spawned deliveries time to fail.
    for _ in 0..50 {
        if spool.len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(spool.len(), 3);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server exits after shutdown")
        .unwrap()
        .unwrap();

    let persisted: Vec<Value> =
        serde_json::from_slice(&std::fs::read(&spool_path).unwrap()).unwrap();
    assert_eq!(persisted.len(), 3);
    assert_eq!(persisted[0]["payload"]["route"], "/health/live");
}

#[tokio::test]
async fn test_spool_is_restored_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let spool_path = dir.path().join("spool.json");
    std::fs::write(
        &spool_path,
        r#"[{"payload":{"route":"/health/live","method":"GET","status":200,"latencyMs":1,"requestId":"r1","recordedAt":"2026-01-01T00:00:00Z"},"enqueuedAt":"2026-01-01T00:00:00Z","attempts":2}]"#,
    )
    .unwrap();

    let mut config = test_config();
    config.spool.path = Some(spool_path.to_string_lossy().into_owned());
    let server = HttpServer::new(config, Collaborators::in_memory()).unwrap();

    let stats = server.state().spool.stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.capacity, 500);
}

#[tokio::test]
async fn test_corrupt_spool_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let spool_path = dir.path().join("spool.json");
    std::fs::write(&spool_path, b"{not json").unwrap();

    let mut config = test_config();
    config.spool.path = Some(spool_path.to_string_lossy().into_owned());
    let server = HttpServer::new(config, Collaborators::in_memory()).unwrap();

    assert!(server.state().spool.is_empty());
}
