//! Turns the agent service's event sequence into outbound frames.
//!
//! One relay task runs per session. In live mode it pushes typed
//! [`OutboundMessage`]s through a bounded channel that backs the SSE body; in
//! buffered mode it drains the whole sequence and hands back one
//! [`BufferedResult`]. Both modes share event handling, file naming and
//! artifact persistence, and both hold a [`SessionGuard`] for their whole
//! lifetime so the registry entry is removed exactly once.

use std::future::Future;
use std::time::Duration;

use axum::response::sse::Event;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use vizstream_agent_client::{AgentError, EventStream, RemoteEvent, TraceKind};
use vizstream_error::VizError;

use crate::artifacts::{safe_file_name, ArtifactError, ArtifactStore};
use crate::formats::{self, ArtifactKind};
use crate::sessions::{SessionGuard, SessionRegistry};

pub const STREAM_CHANNEL_CAPACITY: usize = 32;

const START_MESSAGE: &str = "Starting analysis...";
const INTERPRETER_STARTED_MESSAGE: &str = "Generating charts...";
const INTERPRETER_COMPLETED_MESSAGE: &str = "Code execution completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusPayload {
    pub message: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextPayload {
    pub content: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartPayload {
    pub filename: String,
    pub data: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub size: usize,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletePayload {
    pub session_id: String,
    pub total_files: usize,
    pub total_text_length: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub session_id: String,
}

/// One SSE frame. Serializes to the bare payload object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Status(StatusPayload),
    Text(TextPayload),
    Chart(ChartPayload),
    Complete(CompletePayload),
    Error(ErrorPayload),
}

impl OutboundMessage {
    pub fn status(session_id: &str, message: impl Into<String>) -> Self {
        Self::Status(StatusPayload {
            message: message.into(),
            session_id: session_id.to_string(),
        })
    }

    pub fn text(session_id: &str, content: impl Into<String>) -> Self {
        Self::Text(TextPayload {
            content: content.into(),
            session_id: session_id.to_string(),
        })
    }

    pub fn complete(session_id: &str, summary: &CompletionSummary) -> Self {
        Self::Complete(CompletePayload {
            session_id: session_id.to_string(),
            total_files: summary.total_files,
            total_text_length: summary.total_text_length,
            message: format!(
                "Analysis complete! Generated {} files.",
                summary.total_files
            ),
        })
    }

    pub fn error(session_id: &str, error: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            error: error.into(),
            session_id: session_id.to_string(),
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Text(_) => "text",
            Self::Chart(_) => "chart",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::Status(payload) => &payload.session_id,
            Self::Text(payload) => &payload.session_id,
            Self::Chart(payload) => &payload.session_id,
            Self::Complete(payload) => &payload.session_id,
            Self::Error(payload) => &payload.session_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }

    /// Exact wire text: `event: <kind>\ndata: <json>\n\n`.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "event: {}\ndata: {}\n\n",
            self.event_name(),
            serde_json::to_string(self)?
        ))
    }

    pub fn to_sse_event(&self) -> Result<Event, serde_json::Error> {
        Ok(Event::default()
            .event(self.event_name())
            .data(serde_json::to_string(self)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionSummary {
    pub total_files: usize,
    pub total_text_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(CompletionSummary),
    /// The session was stopped through the registry.
    Aborted,
    /// The receiving side of the frame channel went away.
    ClientGone,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Remote(#[from] AgentError),
    #[error("no event from the agent service for {}s", .0.as_secs())]
    IdleTimeout(Duration),
    #[error("failed to store generated file {name}: {source}")]
    Artifact {
        name: String,
        #[source]
        source: ArtifactError,
    },
    #[error("relay task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<RelayError> for VizError {
    fn from(value: RelayError) -> Self {
        match value {
            RelayError::Remote(err) => VizError::RemoteInvocation {
                message: err.to_string(),
            },
            RelayError::IdleTimeout(_) => VizError::Timeout {
                message: Some(value.to_string()),
            },
            other => VizError::StreamError {
                message: other.to_string(),
            },
        }
    }
}

/// A generated file that was written to the artifact store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub name: String,
    pub media_type: String,
    pub kind: ArtifactKind,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedResult {
    pub text: String,
    pub files: Vec<StoredArtifact>,
}

impl BufferedResult {
    /// Same unit as `total_text_length` in the `complete` frame: chars.
    pub fn text_length(&self) -> usize {
        text_length(&self.text)
    }
}

fn text_length(text: &str) -> usize {
    text.chars().count()
}

enum Step {
    Text(String),
    File {
        artifact: StoredArtifact,
        bytes: Bytes,
    },
    Status(&'static str),
    Skip,
}

impl Step {
    fn into_message(self, session_id: &str) -> Option<OutboundMessage> {
        match self {
            Step::Text(delta) => Some(OutboundMessage::text(session_id, delta)),
            Step::File { artifact, bytes } => Some(OutboundMessage::Chart(ChartPayload {
                filename: artifact.name,
                data: STANDARD.encode(&bytes),
                media_type: artifact.media_type,
                size: artifact.size,
                session_id: session_id.to_string(),
            })),
            Step::Status(message) => Some(OutboundMessage::status(session_id, message)),
            Step::Skip => None,
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    text: String,
    files: Vec<StoredArtifact>,
    file_counter: usize,
}

impl Accumulator {
    fn summary(&self) -> CompletionSummary {
        CompletionSummary {
            total_files: self.file_counter,
            total_text_length: text_length(&self.text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Relay {
    registry: SessionRegistry,
    artifacts: ArtifactStore,
    idle_timeout: Option<Duration>,
}

impl Relay {
    pub fn new(registry: SessionRegistry, artifacts: ArtifactStore) -> Self {
        Self {
            registry,
            artifacts,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Spawns the live relay for an already registered session and returns
    /// the frame stream. `invocation` is awaited inside the task so that an
    /// invocation failure is reported as an in-band `error` frame.
    pub fn stream<F>(&self, guard: SessionGuard, invocation: F) -> ReceiverStream<OutboundMessage>
    where
        F: Future<Output = Result<EventStream, AgentError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let relay = self.clone();
        tokio::spawn(async move {
            relay.run_live(guard, invocation, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn run_live<F>(self, guard: SessionGuard, invocation: F, tx: mpsc::Sender<OutboundMessage>)
    where
        F: Future<Output = Result<EventStream, AgentError>>,
    {
        let session_id = guard.session_id().to_string();
        tracing::info!(session_id = %session_id, "stream started");

        match self.drive_live(&guard, invocation, &tx).await {
            Ok(StreamOutcome::Completed(summary)) => {
                tracing::info!(
                    session_id = %session_id,
                    files = summary.total_files,
                    text_length = summary.total_text_length,
                    "stream completed"
                );
                let _ = tx.send(OutboundMessage::complete(&session_id, &summary)).await;
            }
            Ok(StreamOutcome::Aborted) => {
                tracing::info!(session_id = %session_id, "stream stopped by request");
            }
            Ok(StreamOutcome::ClientGone) => {
                tracing::info!(session_id = %session_id, "client disconnected");
            }
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "stream failed");
                let _ = tx.send(OutboundMessage::error(&session_id, err.to_string())).await;
            }
        }

        // Unregister before the channel closes so a caller that saw the end of
        // the stream also sees the registry entry gone.
        drop(guard);
    }

    async fn drive_live<F>(
        &self,
        guard: &SessionGuard,
        invocation: F,
        tx: &mpsc::Sender<OutboundMessage>,
    ) -> Result<StreamOutcome, RelayError>
    where
        F: Future<Output = Result<EventStream, AgentError>>,
    {
        let session_id = guard.session_id();
        if tx
            .send(OutboundMessage::status(session_id, START_MESSAGE))
            .await
            .is_err()
        {
            return Ok(StreamOutcome::ClientGone);
        }

        let mut events = tokio::select! {
            events = invocation => events?,
            _ = tx.closed() => return Ok(StreamOutcome::ClientGone),
        };

        let mut acc = Accumulator::default();
        loop {
            let next = tokio::select! {
                next = self.next_event(&mut events) => next?,
                _ = tx.closed() => return Ok(StreamOutcome::ClientGone),
            };
            let Some(next) = next else {
                break;
            };
            if !guard.is_live() {
                return Ok(StreamOutcome::Aborted);
            }
            let step = self.handle_event(&mut acc, next?).await?;
            if let Some(message) = step.into_message(session_id) {
                if tx.send(message).await.is_err() {
                    return Ok(StreamOutcome::ClientGone);
                }
            }
        }
        Ok(StreamOutcome::Completed(acc.summary()))
    }

    /// Drains the whole sequence on a spawned task and waits for it. A stop
    /// request surfaces as [`VizError::SessionStopped`].
    pub async fn collect<F>(&self, guard: SessionGuard, invocation: F) -> Result<BufferedResult, VizError>
    where
        F: Future<Output = Result<EventStream, AgentError>> + Send + 'static,
    {
        let relay = self.clone();
        let session_id = guard.session_id().to_string();
        let handle = tokio::spawn(async move {
            let result = relay.drive_buffered(&guard, invocation).await;
            drop(guard);
            result
        });

        match handle.await.map_err(RelayError::from)? {
            Ok(Some(result)) => {
                tracing::info!(
                    session_id = %session_id,
                    files = result.files.len(),
                    text_length = result.text_length(),
                    "buffered invocation completed"
                );
                Ok(result)
            }
            Ok(None) => {
                tracing::info!(session_id = %session_id, "buffered invocation stopped by request");
                Err(VizError::SessionStopped { session_id })
            }
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "buffered invocation failed");
                Err(err.into())
            }
        }
    }

    async fn drive_buffered<F>(
        &self,
        guard: &SessionGuard,
        invocation: F,
    ) -> Result<Option<BufferedResult>, RelayError>
    where
        F: Future<Output = Result<EventStream, AgentError>>,
    {
        let mut events = invocation.await?;
        let mut acc = Accumulator::default();
        while let Some(next) = self.next_event(&mut events).await? {
            if !guard.is_live() {
                return Ok(None);
            }
            self.handle_event(&mut acc, next?).await?;
        }
        Ok(Some(BufferedResult {
            text: acc.text,
            files: acc.files,
        }))
    }

    async fn next_event(
        &self,
        events: &mut EventStream,
    ) -> Result<Option<Result<RemoteEvent, AgentError>>, RelayError> {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, events.next())
                .await
                .map_err(|_| RelayError::IdleTimeout(limit)),
            None => Ok(events.next().await),
        }
    }

    async fn handle_event(&self, acc: &mut Accumulator, event: RemoteEvent) -> Result<Step, RelayError> {
        match event {
            RemoteEvent::Text(delta) => {
                acc.text.push_str(&delta);
                Ok(Step::Text(delta))
            }
            RemoteEvent::File(file) => {
                acc.file_counter += 1;
                let name = file
                    .name
                    .as_deref()
                    .and_then(safe_file_name)
                    .unwrap_or_else(|| format!("chart_{}.png", acc.file_counter));
                self.persist(&name, file.bytes.clone()).await?;
                let artifact = StoredArtifact {
                    media_type: formats::generated_mime(&name).to_string(),
                    kind: formats::artifact_kind(&name),
                    size: file.bytes.len(),
                    name,
                };
                acc.files.push(artifact.clone());
                Ok(Step::File {
                    artifact,
                    bytes: file.bytes,
                })
            }
            RemoteEvent::Trace(TraceKind::InterpreterStarted) => {
                Ok(Step::Status(INTERPRETER_STARTED_MESSAGE))
            }
            RemoteEvent::Trace(TraceKind::InterpreterCompleted) => {
                Ok(Step::Status(INTERPRETER_COMPLETED_MESSAGE))
            }
            RemoteEvent::Trace(TraceKind::Other) | RemoteEvent::Other => Ok(Step::Skip),
        }
    }

    async fn persist(&self, name: &str, bytes: Bytes) -> Result<(), RelayError> {
        let store = self.artifacts.clone();
        let target = name.to_string();
        tokio::task::spawn_blocking(move || store.put(&target, &bytes))
            .await?
            .map_err(|source| RelayError::Artifact {
                name: name.to_string(),
                source,
            })?;
        Ok(())
    }
}
