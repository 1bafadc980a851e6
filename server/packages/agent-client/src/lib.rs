//! Client for the managed agent service: request construction, the HTTP
//! gateway backend, a scripted mock backend and decoding of the streamed
//! response into typed events.

use std::sync::Arc;

use thiserror::Error;

pub mod http;
pub mod mock;
pub mod request;
pub mod wire;

pub use http::{HttpBackend, HttpBackendConfig};
pub use mock::{MockBackend, MockStep};
pub use request::{
    AgentIdentity, Attachment, FileDescriptor, InvocationRequest, ModelInvocation, UseCase,
    GUARDRAIL_INTERVAL,
};
pub use wire::{EventStream, RemoteEvent, RemoteFile, TraceKind};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid agent endpoint `{endpoint}`: {message}")]
    InvalidEndpoint { endpoint: String, message: String },
    #[error("failed to reach agent service: {0}")]
    Http(#[from] reqwest::Error),
    #[error("agent service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode agent event: {0}")]
    Decode(String),
    #[error("{0}")]
    Remote(String),
}

#[derive(Debug, Clone)]
pub enum AgentClient {
    Http(Arc<HttpBackend>),
    Mock(Arc<MockBackend>),
}

impl AgentClient {
    pub fn http(config: HttpBackendConfig) -> Result<Self, AgentError> {
        Ok(Self::Http(Arc::new(HttpBackend::new(config)?)))
    }

    pub fn mock(backend: MockBackend) -> Self {
        Self::Mock(Arc::new(backend))
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, Self::Mock(_))
    }

    /// Issues the invocation and returns the response handle once the service
    /// has accepted it. Not retried.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<EventStream, AgentError> {
        match self {
            Self::Http(backend) => backend.invoke(request).await,
            Self::Mock(backend) => backend.invoke(request).await,
        }
    }

    pub async fn invoke_model(&self, request: ModelInvocation) -> Result<String, AgentError> {
        match self {
            Self::Http(backend) => backend.invoke_model(request).await,
            Self::Mock(backend) => backend.invoke_model(request).await,
        }
    }
}
