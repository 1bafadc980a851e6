#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower::util::ServiceExt;

use vizstream::router::{build_router_with_state, AppState, ServerConfig};
use vizstream_agent_client::{
    AgentClient, AgentError, AgentIdentity, EventStream, MockBackend, MockStep, RemoteEvent,
    RemoteFile,
};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-chart";

pub fn text(delta: &str) -> RemoteEvent {
    RemoteEvent::Text(delta.to_string())
}

pub fn file(name: Option<&str>, bytes: &[u8]) -> RemoteEvent {
    RemoteEvent::File(RemoteFile {
        name: name.map(str::to_string),
        media_type: None,
        bytes: Bytes::copy_from_slice(bytes),
    })
}

/// Event stream fed by the returned sender, for stepping a relay by hand.
pub fn channel_events() -> (
    mpsc::UnboundedSender<Result<RemoteEvent, AgentError>>,
    EventStream,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, UnboundedReceiverStream::new(rx).boxed())
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub struct TestApp {
    pub app: Router,
    pub state: Arc<AppState>,
    _artifact_dir: TempDir,
}

impl TestApp {
    pub fn new(script: Vec<MockStep>) -> Self {
        Self::with_backend(MockBackend::new(script), |_| {})
    }

    pub fn with_backend(backend: MockBackend, configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let artifact_dir = tempfile::tempdir().expect("create artifact dir");
        let mut config = ServerConfig::new(artifact_dir.path());
        configure(&mut config);
        let state = Arc::new(AppState::new(
            AgentClient::mock(backend),
            AgentIdentity::new("agent-1", "alias-1"),
            config,
        ));
        let (app, state) = build_router_with_state(state);
        Self {
            app,
            state,
            _artifact_dir: artifact_dir,
        }
    }

    pub fn mock(&self) -> &MockBackend {
        match self.state.client() {
            AgentClient::Mock(mock) => mock.as_ref(),
            AgentClient::Http(_) => panic!("test app uses the mock backend"),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("request handled");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        (status, headers, bytes)
    }

    pub async fn send_json(&self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        let (status, _, bytes) = self.send(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, value)
    }
}
