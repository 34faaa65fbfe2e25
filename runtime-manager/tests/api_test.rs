//! Integration tests for the local-runtime HTTP API.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use runtime_common::{EngineKind, SessionInfo};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use runtime_manager::api;
use runtime_manager::config::Config;
use runtime_manager::engine::{EngineRegistry, InferenceEngine, ModelInfo, ModelSettings};
use runtime_manager::error::{Error, Result};
use runtime_manager::state::AppState;
use runtime_manager::tools::{HttpToolTransport, ToolCoordinator};

/// Engine that keeps its loaded set in memory and declares no capabilities.
struct FakeEngine {
    loaded: Mutex<HashSet<String>>,
    loads: AtomicUsize,
    settings: Mutex<Option<ModelSettings>>,
}

impl FakeEngine {
    fn new() -> Self {
        Self {
            loaded: Mutex::new(HashSet::new()),
            loads: AtomicUsize::new(0),
            settings: Mutex::new(None),
        }
    }
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::InProcess
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "tiny".to_string(),
            name: "tiny".to_string(),
            size_bytes: Some(1024),
            quantization: None,
            modified_at: None,
        }])
    }

    async fn loaded_models(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.loaded.lock().unwrap().iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn load_model(&self, model_id: &str, settings: &ModelSettings) -> Result<SessionInfo> {
        if model_id == "broken" {
            return Err(Error::LoadFailed("weights are corrupt".to_string()));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        *self.settings.lock().unwrap() = Some(settings.clone());
        self.loaded.lock().unwrap().insert(model_id.to_string());
        Ok(SessionInfo::new("fake", model_id))
    }

    async fn unload_model(&self, model_id: &str) -> Result<()> {
        self.loaded.lock().unwrap().remove(model_id);
        Ok(())
    }
}

async fn test_app(tools: ToolCoordinator) -> (Router, Arc<FakeEngine>) {
    let engine = Arc::new(FakeEngine::new());
    let registry = Arc::new(EngineRegistry::new());
    registry.register(engine.clone()).await;

    let state = Arc::new(AppState::new(Config::default(), registry, Arc::new(tools)));
    (api::app(state), engine)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = test_app(ToolCoordinator::new()).await;

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "engines": ["fake"]}));
}

#[tokio::test]
async fn test_list_engines() {
    let (app, _) = test_app(ToolCoordinator::new()).await;

    let (status, body) = send(&app, "GET", "/v1/engines", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "fake");
    assert_eq!(body[0]["kind"], "in_process");
    assert_eq!(body[0]["capabilities"], json!([]));
    assert_eq!(body[0]["loaded_models"], json!([]));
}

#[tokio::test]
async fn test_list_models() {
    let (app, _) = test_app(ToolCoordinator::new()).await;

    let (status, body) = send(&app, "GET", "/v1/engines/fake/models", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"][0]["id"], "tiny");
}

#[tokio::test]
async fn test_start_is_idempotent_and_translates_settings() {
    let (app, engine) = test_app(ToolCoordinator::new()).await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/engines/fake/models/tiny/start",
        Some(json!({"context_length": 4096})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], true);
    assert_eq!(body["session"]["model_id"], "tiny");

    let settings = engine.settings.lock().unwrap().clone().unwrap();
    assert_eq!(settings.get("context_size"), Some(&json!(4096)));

    let (status, body) = send(&app, "POST", "/v1/engines/fake/models/tiny/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], false);
    assert_eq!(engine.loads.load(Ordering::SeqCst), 1);

    let (_, body) = send(&app, "GET", "/v1/engines/fake/loaded", None).await;
    assert_eq!(body["models"], json!(["tiny"]));
}

#[tokio::test]
async fn test_start_failure_is_reported() {
    let (app, _) = test_app(ToolCoordinator::new()).await;

    let (status, body) = send(&app, "POST", "/v1/engines/fake/models/broken/start", None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "load_failed");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("weights are corrupt"));
}

#[tokio::test]
async fn test_unknown_engine() {
    let (app, _) = test_app(ToolCoordinator::new()).await;

    let (status, body) = send(&app, "POST", "/v1/engines/vllm/models/tiny/start", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["type"], "engine_unavailable");
}

#[tokio::test]
async fn test_stop_and_stop_all() {
    let (app, _) = test_app(ToolCoordinator::new()).await;

    send(&app, "POST", "/v1/engines/fake/models/a/start", None).await;
    send(&app, "POST", "/v1/engines/fake/models/b/start", None).await;

    let (status, body) = send(&app, "POST", "/v1/engines/fake/models/a/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stopped"], true);

    let (status, body) = send(&app, "POST", "/v1/engines/fake/stop-all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stopped"], json!(["b"]));
    assert_eq!(body["failed"], json!([]));

    let (_, body) = send(&app, "GET", "/v1/engines/fake/loaded", None).await;
    assert_eq!(body["models"], json!([]));
}

#[tokio::test]
async fn test_planning_degrades_without_capabilities() {
    let (app, _) = test_app(ToolCoordinator::new()).await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/engines/fake/plan",
        Some(json!({"model_path": "/models/tiny.gguf", "context_length": 8192})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "Unsupported");
    assert_eq!(body["gpuLayers"], 0);
    assert_eq!(body["maxContextLength"], 2048);

    let (_, body) = send(
        &app,
        "POST",
        "/v1/engines/fake/support",
        Some(json!({"model_path": "/models/tiny.gguf"})),
    )
    .await;
    assert_eq!(body["verdict"], "YELLOW");

    let (_, body) = send(&app, "GET", "/v1/engines/fake/models/tiny/mmproj", None).await;
    assert_eq!(body, json!({"model_id": "tiny", "exists": false}));
}

#[tokio::test]
async fn test_tool_call_without_transport() {
    let (app, _) = test_app(ToolCoordinator::new()).await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/tools/call",
        Some(json!({"tool_name": "read_file", "arguments": {"path": "/tmp/a"}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "Tool API not available");
    assert!(body["cancellation_token"]
        .as_str()
        .unwrap()
        .starts_with("tool_cancel_"));
}

#[tokio::test]
async fn test_tool_call_forwarded_to_tool_server() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tools/call"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "",
            "content": [{"type": "text", "text": "file contents"}]
        })))
        .mount(&mock_server)
        .await;

    let transport = Arc::new(HttpToolTransport::new(&mock_server.uri()));
    let (app, _) = test_app(ToolCoordinator::with_transport(transport)).await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/tools/call",
        Some(json!({
            "tool_name": "read_file",
            "arguments": {"path": "/tmp/a"},
            "cancellation_token": "call-1"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "");
    assert_eq!(body["content"][0]["text"], "file contents");
    assert_eq!(body["cancellation_token"], "call-1");

    let (_, body) = send(&app, "GET", "/v1/tools/calls", None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_in_flight_calls_listed_until_cancelled() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tools/call"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"error": "", "content": []}))
                .set_delay(std::time::Duration::from_secs(30)),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tools/cancel"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let transport = Arc::new(HttpToolTransport::new(&mock_server.uri()));
    let (app, _) = test_app(ToolCoordinator::with_transport(transport)).await;

    let call = {
        let app = app.clone();
        tokio::spawn(async move {
            send(
                &app,
                "POST",
                "/v1/tools/call",
                Some(json!({"tool_name": "web_search", "cancellation_token": "slow-1"})),
            )
            .await
        })
    };

    let mut listed = Value::Null;
    for _ in 0..100 {
        let (status, body) = send(&app, "GET", "/v1/tools/calls", None).await;
        assert_eq!(status, StatusCode::OK);
        listed = body;
        if listed != json!([]) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(listed, json!(["slow-1"]));

    let (_, body) = send(&app, "POST", "/v1/tools/cancel/slow-1", None).await;
    assert_eq!(body["cancelled"], true);

    let (status, body) = call.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancellation_token"], "slow-1");
    assert_eq!(body["error"], "Tool call was cancelled");

    let (_, body) = send(&app, "GET", "/v1/tools/calls", None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_cancel_unknown_token() {
    let (app, _) = test_app(ToolCoordinator::new()).await;

    let (status, body) = send(&app, "POST", "/v1/tools/cancel/nope", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"cancellation_token": "nope", "cancelled": false}));
}
