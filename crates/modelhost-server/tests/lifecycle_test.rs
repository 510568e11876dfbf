//! Listener state machine against real sockets.

use modelhost_runtime::{MockChatEngine, MockEmbeddingEngine};
use modelhost_server::{ServerConfig, ServerManager, ServerState};
use std::sync::Arc;
use std::time::Duration;

fn config(dir: &tempfile::TempDir) -> ServerConfig {
    ServerConfig::default()
        .with_port(0)
        .with_model_storage_dir(dir.path().join("models"))
        .with_restart_delay(Duration::from_millis(20))
        .with_shutdown_grace(Duration::from_secs(2))
}

fn manager(config: ServerConfig) -> ServerManager {
    ServerManager::new(
        config,
        Arc::new(MockChatEngine::new().with_unloadable("broken")),
        Arc::new(MockEmbeddingEngine::new()),
    )
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn get(addr: std::net::SocketAddr, path: &str) -> reqwest::Result<String> {
    client()
        .get(format!("http://{addr}{path}"))
        .send()
        .await?
        .text()
        .await
}

#[tokio::test]
async fn start_serves_health_and_creates_model_dir() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(config(&dir));

    manager.start().await;
    assert_eq!(manager.status(), ServerState::Running);
    assert_eq!(manager.status_text(), "Server Running");
    assert!(dir.path().join("models").is_dir());

    let addr = manager.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(get(addr, "/health").await.unwrap(), "OK");

    manager.stop().await;
    assert_eq!(manager.status(), ServerState::Stopped);
    assert_eq!(manager.local_addr(), None);
    assert!(get(addr, "/health").await.is_err());
}

#[tokio::test]
async fn transitions_outside_their_source_state_are_no_ops() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(config(&dir));

    manager.stop().await;
    assert_eq!(manager.status(), ServerState::Stopped);

    manager.start().await;
    let addr = manager.local_addr().unwrap();
    manager.start().await;
    assert_eq!(manager.status(), ServerState::Running);
    assert_eq!(manager.local_addr(), Some(addr));

    manager.stop().await;
}

#[tokio::test]
async fn restart_comes_back_running_with_empty_slots() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(config(&dir));
    manager.start().await;
    let addr = manager.local_addr().unwrap();

    let resp = client()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&serde_json::json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert!(get(addr, "/v1/models").await.unwrap().contains("\"m\""));

    manager.restart().await;
    assert!(manager.is_running());
    let addr = manager.local_addr().unwrap();
    let models: serde_json::Value =
        serde_json::from_str(&get(addr, "/v1/models").await.unwrap()).unwrap();
    assert_eq!(models["data"], serde_json::json!([]));

    manager.stop().await;
}

#[tokio::test]
async fn unusable_model_dir_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"x").unwrap();
    let manager = manager(config(&dir).with_model_storage_dir(file.join("models")));

    manager.start().await;
    match manager.status() {
        ServerState::Error(msg) => assert!(msg.contains("model directory"), "{msg}"),
        other => panic!("expected error state, got {other:?}"),
    }
    assert!(manager.status_text().starts_with("Error: "));
    assert_eq!(manager.local_addr(), None);

    // Error is sticky until cleared.
    manager.start().await;
    assert!(matches!(manager.status(), ServerState::Error(_)));
    manager.clear_error().await;
    assert_eq!(manager.status(), ServerState::Stopped);
}

#[tokio::test]
async fn port_in_use_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();
    let manager = manager(config(&dir).with_port(port));

    manager.start().await;
    match manager.status() {
        ServerState::Error(msg) => assert!(msg.contains("failed to bind"), "{msg}"),
        other => panic!("expected error state, got {other:?}"),
    }
}

#[tokio::test]
async fn preload_happens_before_bind() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(
        config(&dir)
            .with_preload_chat_model("org/chat")
            .with_preload_embedding_model("org/embed"),
    );
    manager.start().await;
    let addr = manager.local_addr().unwrap();

    let body = get(addr, "/v1/models").await.unwrap();
    assert!(body.contains("org/chat"), "{body}");
    assert!(body.contains("org/embed"), "{body}");
    manager.stop().await;
}

#[tokio::test]
async fn failed_preload_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(config(&dir).with_preload_chat_model("broken"));
    manager.start().await;
    match manager.status() {
        ServerState::Error(msg) => assert!(msg.contains("broken"), "{msg}"),
        other => panic!("expected error state, got {other:?}"),
    }
}

#[tokio::test]
async fn abandoned_start_returns_to_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ServerManager::new(
        config(&dir).with_preload_chat_model("org/slow"),
        Arc::new(MockChatEngine::new().with_load_delay(Duration::from_millis(300))),
        Arc::new(MockEmbeddingEngine::new()),
    );

    let attempt = tokio::time::timeout(Duration::from_millis(50), manager.start()).await;
    assert!(attempt.is_err(), "preload should outlast the timeout");
    assert_eq!(manager.status(), ServerState::Stopped);
    assert_eq!(manager.local_addr(), None);

    manager.start().await;
    assert_eq!(manager.status(), ServerState::Running);
    let addr = manager.local_addr().unwrap();
    assert!(get(addr, "/v1/models").await.unwrap().contains("org/slow"));
    manager.stop().await;
}
