//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use warden_core::config::AppConfig;
use warden_server::{AppState, CancellationRestarter, create_router};

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub restarter: CancellationRestarter,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with the built-in formats and a temporary
    /// restore root.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test server, adjusting the test configuration first.
    pub fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path().join("restore"));
        adjust(&mut config);
        std::fs::create_dir_all(&config.restore.restore_root)
            .expect("Failed to create restore root");

        let registry = warden_restore::formats::default_registry()
            .expect("Failed to register formats");
        let restarter = CancellationRestarter::new();
        let state = AppState::new(config, registry, Arc::new(restarter.clone()));
        let router = create_router(state.clone());

        Self {
            router,
            state,
            restarter,
            _temp_dir: temp_dir,
        }
    }

    pub fn restore_root(&self) -> PathBuf {
        self.state.config.restore.restore_root.clone()
    }

    /// Send a request and decode the JSON response body, if any.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        send(&self.router, request).await
    }

    /// Send a bodiless request.
    pub async fn request(&self, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Send a JSON request.
    pub async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }
}

/// Run one request against a router and decode its JSON body.
pub async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
