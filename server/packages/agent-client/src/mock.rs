use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::request::{InvocationRequest, ModelInvocation};
use crate::wire::{EventStream, RemoteEvent, RemoteFile, TraceKind};
use crate::AgentError;

const MOCK_WORD_DELAY_MS: u64 = 30;

/// Minimal 1x1 PNG used by the default script.
const MOCK_CHART_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0xf8,
    0xcf, 0xc0, 0xf0, 0x1f, 0x00, 0x05, 0x00, 0x01, 0xff, 0x89, 0x99, 0x3d, 0x1d, 0x00, 0x00,
    0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

#[derive(Debug, Clone)]
pub enum MockStep {
    Event(RemoteEvent),
    Fail(String),
    Delay(Duration),
}

/// Scripted stand-in for the agent service. Every invocation replays the same
/// script; received requests are recorded for inspection.
#[derive(Debug)]
pub struct MockBackend {
    script: Vec<MockStep>,
    invoke_error: Option<String>,
    model_reply: Option<String>,
    requests: Mutex<Vec<InvocationRequest>>,
    model_requests: Mutex<Vec<ModelInvocation>>,
}

impl MockBackend {
    pub fn new(script: Vec<MockStep>) -> Self {
        Self {
            script,
            invoke_error: None,
            model_reply: None,
            requests: Mutex::new(Vec::new()),
            model_requests: Mutex::new(Vec::new()),
        }
    }

    /// Script used by `vizstream server --mock`: a short streamed answer, one
    /// code interpreter round trip and a single chart.
    pub fn demo() -> Self {
        let mut script = Vec::new();
        for word in ["Reviewing ", "the ", "uploaded ", "data. "] {
            script.push(MockStep::Delay(Duration::from_millis(MOCK_WORD_DELAY_MS)));
            script.push(MockStep::Event(RemoteEvent::Text(word.to_string())));
        }
        script.push(MockStep::Event(RemoteEvent::Trace(TraceKind::InterpreterStarted)));
        script.push(MockStep::Delay(Duration::from_millis(MOCK_WORD_DELAY_MS)));
        script.push(MockStep::Event(RemoteEvent::Trace(TraceKind::InterpreterCompleted)));
        script.push(MockStep::Event(RemoteEvent::File(RemoteFile {
            name: Some("chart_overview.png".to_string()),
            media_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(MOCK_CHART_PNG),
        })));
        script.push(MockStep::Event(RemoteEvent::Text(
            "Generated one overview chart.".to_string(),
        )));
        Self::new(script)
    }

    pub fn with_invoke_error(mut self, message: impl Into<String>) -> Self {
        self.invoke_error = Some(message.into());
        self
    }

    pub fn with_model_reply(mut self, reply: impl Into<String>) -> Self {
        self.model_reply = Some(reply.into());
        self
    }

    pub async fn requests(&self) -> Vec<InvocationRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn model_requests(&self) -> Vec<ModelInvocation> {
        self.model_requests.lock().await.clone()
    }

    pub(crate) async fn invoke(&self, request: InvocationRequest) -> Result<EventStream, AgentError> {
        tracing::debug!(
            session_id = %request.session_id,
            files = request.session_state.files.len(),
            "mock agent: invocation received"
        );
        self.requests.lock().await.push(request);
        if let Some(message) = &self.invoke_error {
            return Err(AgentError::Remote(message.clone()));
        }

        let steps = self.script.clone();
        let events = stream::iter(steps).filter_map(|step| async move {
            match step {
                MockStep::Event(event) => Some(Ok(event)),
                MockStep::Fail(message) => Some(Err(AgentError::Remote(message))),
                MockStep::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    None
                }
            }
        });
        Ok(events.boxed())
    }

    pub(crate) async fn invoke_model(&self, request: ModelInvocation) -> Result<String, AgentError> {
        let reply = self.model_reply.clone().unwrap_or_else(|| {
            format!(
                "Mock analysis of a {} image using {}.",
                request.media_type, request.model_id
            )
        });
        self.model_requests.lock().await.push(request);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::AgentIdentity;

    #[tokio::test]
    async fn replays_script_and_records_requests() {
        let mock = MockBackend::new(vec![
            MockStep::Event(RemoteEvent::Text("a".to_string())),
            MockStep::Delay(Duration::from_millis(1)),
            MockStep::Fail("boom".to_string()),
        ]);
        let request = InvocationRequest::new(AgentIdentity::default(), "s1", "hi", &[]);

        let events = mock
            .invoke(request)
            .await
            .expect("invoke")
            .collect::<Vec<_>>()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(RemoteEvent::Text(text)) if text == "a"));
        assert!(matches!(&events[1], Err(AgentError::Remote(message)) if message == "boom"));
        assert_eq!(mock.requests().await[0].session_id, "s1");
    }

    #[tokio::test]
    async fn invoke_error_is_returned_before_streaming() {
        let mock = MockBackend::new(Vec::new()).with_invoke_error("throttled");
        let request = InvocationRequest::new(AgentIdentity::default(), "s1", "hi", &[]);
        let result = mock.invoke(request).await;
        assert!(matches!(result, Err(AgentError::Remote(message)) if message == "throttled"));
    }
}
