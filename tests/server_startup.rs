//! Server Startup Tests
//!
//! Tests for configuration loading and the HTTP surface of a freshly
//! assembled server: health check, call-setup document, and empty metrics.

use axum::{Router, body::Body, http::Request};
use tower::util::ServiceExt;

use parley_gateway::{ServerConfig, config::ConfigError, routes, state::AppState};

/// Helper function to create a minimal test configuration
fn create_minimal_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        completion_api_key: Some("test-key".to_string()),
        ..ServerConfig::default()
    }
}

/// Build the HTTP router the way main.rs does, minus the network layers.
fn build_app(config: ServerConfig) -> Router {
    let app_state = AppState::new(config);
    Router::new()
        .route(
            "/",
            axum::routing::get(parley_gateway::handlers::api::health_check),
        )
        .merge(routes::api::create_api_router())
        .with_state(app_state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse body")
}

#[tokio::test]
async fn test_health_check() {
    let app = build_app(create_minimal_config());

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), 200);
    let body = body_json(response).await;
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn test_call_setup_document() {
    let config = ServerConfig {
        relay_public_url: Some("wss://edge.example.com/relay".to_string()),
        greeting: "Welcome to the test line.".to_string(),
        language: "en-GB".to_string(),
        voice: "en-GB-Journey-F".to_string(),
        ..create_minimal_config()
    };
    let app = build_app(config);

    let request = Request::builder()
        .uri("/call-setup")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), 200);
    let body = body_json(response).await;
    assert_eq!(body["url"], "wss://edge.example.com/relay");
    assert_eq!(body["greeting"], "Welcome to the test line.");
    assert_eq!(body["language"], "en-GB");
    assert_eq!(body["voice"], "en-GB-Journey-F");
}

#[tokio::test]
async fn test_metrics_snapshot_with_no_calls() {
    let app = build_app(create_minimal_config());

    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), 200);
    let body = body_json(response).await;
    assert_eq!(body["active_sessions"], 0);
    assert!(body["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_metrics_for_unknown_call_is_404() {
    let app = build_app(create_minimal_config());

    let request = Request::builder()
        .uri("/metrics/CA-does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), 404);
}

#[test]
fn test_missing_completion_credential_fails_validation() {
    let config = ServerConfig {
        completion_api_key: None,
        ..ServerConfig::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingCompletionCredential)
    ));
}

#[test]
fn test_yaml_config_file_loading() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    write!(
        file,
        r#"
server:
  host: "127.0.0.1"
  port: 4555
completion:
  api_key: "sk-from-yaml"
conversation:
  greeting: "Hi from YAML."
"#
    )
    .expect("write yaml");

    let config = ServerConfig::from_file(file.path()).expect("load config");
    assert_eq!(config.port, 4555);
    assert_eq!(config.completion_api_key.as_deref(), Some("sk-from-yaml"));
    assert_eq!(config.greeting, "Hi from YAML.");
    // Defaults fill everything the file leaves out.
    assert_eq!(config.chunk_flush_threshold, 15);
}
