use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    InvalidEncoding,
    PayloadTooLarge,
    SessionNotFound,
    SessionAlreadyExists,
    SessionStopped,
    ArtifactNotFound,
    RemoteInvocation,
    StreamError,
    Timeout,
}

impl ErrorType {
    /// Slug, title and HTTP status for each error kind.
    fn row(self) -> (&'static str, &'static str, u16) {
        match self {
            Self::InvalidRequest => ("invalid_request", "Invalid Request", 400),
            Self::InvalidEncoding => ("invalid_encoding", "Invalid Encoding", 400),
            Self::PayloadTooLarge => ("payload_too_large", "Payload Too Large", 413),
            Self::SessionNotFound => ("session_not_found", "Session Not Found", 404),
            Self::SessionAlreadyExists => ("session_already_exists", "Session Already Exists", 409),
            Self::SessionStopped => ("session_stopped", "Session Stopped", 409),
            Self::ArtifactNotFound => ("artifact_not_found", "Artifact Not Found", 404),
            Self::RemoteInvocation => ("remote_invocation", "Remote Invocation Failed", 502),
            Self::StreamError => ("stream_error", "Stream Error", 502),
            Self::Timeout => ("timeout", "Timeout", 504),
        }
    }

    /// Same spelling as the serde representation.
    pub fn code(self) -> &'static str {
        self.row().0
    }

    pub fn as_urn(self) -> String {
        format!("urn:vizstream:error:{}", self.code())
    }

    pub fn title(self) -> &'static str {
        self.row().1
    }

    pub fn status_code(self) -> u16 {
        self.row().2
    }
}

/// RFC 7807 problem document returned by every failing HTTP route.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum VizError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("invalid base64 file data: {message}")]
    InvalidEncoding { message: String },
    #[error(
        "file too large: {:.2}MB (max {:.2}MB)",
        display_mib(.size_bytes),
        display_mib(.max_bytes)
    )]
    PayloadTooLarge { size_bytes: usize, max_bytes: usize },
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("session already exists: {session_id}")]
    SessionAlreadyExists { session_id: String },
    #[error("session stopped before completion: {session_id}")]
    SessionStopped { session_id: String },
    #[error("file not found: {name}")]
    ArtifactNotFound { name: String },
    #[error("remote invocation failed: {message}")]
    RemoteInvocation { message: String },
    #[error("stream error: {message}")]
    StreamError { message: String },
    #[error("timeout")]
    Timeout { message: Option<String> },
}

/// Converts a byte count to mebibytes for human-readable size messages.
pub fn mib(bytes: usize) -> f64 {
    bytes as f64 / BYTES_PER_MIB
}

fn display_mib(bytes: &usize) -> f64 {
    mib(*bytes)
}

impl VizError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::InvalidEncoding { .. } => ErrorType::InvalidEncoding,
            Self::PayloadTooLarge { .. } => ErrorType::PayloadTooLarge,
            Self::SessionNotFound { .. } => ErrorType::SessionNotFound,
            Self::SessionAlreadyExists { .. } => ErrorType::SessionAlreadyExists,
            Self::SessionStopped { .. } => ErrorType::SessionStopped,
            Self::ArtifactNotFound { .. } => ErrorType::ArtifactNotFound,
            Self::RemoteInvocation { .. } => ErrorType::RemoteInvocation,
            Self::StreamError { .. } => ErrorType::StreamError,
            Self::Timeout { .. } => ErrorType::Timeout,
        }
    }

    fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionNotFound { session_id }
            | Self::SessionAlreadyExists { session_id }
            | Self::SessionStopped { session_id } => Some(session_id),
            _ => None,
        }
    }

    fn details(&self) -> Option<Value> {
        let mut map = Map::new();
        match self {
            Self::PayloadTooLarge {
                size_bytes,
                max_bytes,
            } => {
                map.insert("sizeBytes".to_string(), Value::from(*size_bytes as u64));
                map.insert("maxBytes".to_string(), Value::from(*max_bytes as u64));
            }
            Self::ArtifactNotFound { name } => {
                map.insert("name".to_string(), Value::String(name.clone()));
            }
            Self::Timeout {
                message: Some(message),
            } => {
                map.insert("message".to_string(), Value::String(message.clone()));
            }
            _ => {}
        }
        if map.is_empty() {
            None
        } else {
            Some(Value::Object(map))
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));
        if let Some(session_id) = self.session_id() {
            problem
                .extensions
                .insert("sessionId".to_string(), Value::String(session_id.to_string()));
        }
        if let Some(details) = self.details() {
            problem.extensions.insert("details".to_string(), details);
        }
        problem
    }
}

impl From<VizError> for ProblemDetails {
    fn from(value: VizError) -> Self {
        value.to_problem_details()
    }
}

impl From<&VizError> for ProblemDetails {
    fn from(value: &VizError) -> Self {
        value.to_problem_details()
    }
}
