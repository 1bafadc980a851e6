//! Decoding of the agent service's newline-delimited event stream.
//!
//! Every line is one JSON object carrying a `chunk` (text bytes and/or
//! generated files) and/or a `trace` (orchestration metadata). Lines are
//! flattened into [`RemoteEvent`]s in the order the payloads appear.

use std::collections::VecDeque;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::AgentError;

const CODE_INTERPRETER_INVOCATION: &str = "ACTION_GROUP_CODE_INTERPRETER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Text(String),
    File(RemoteFile),
    Trace(TraceKind),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: Option<String>,
    pub media_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    InterpreterStarted,
    InterpreterCompleted,
    Other,
}

pub type EventStream = BoxStream<'static, Result<RemoteEvent, AgentError>>;

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    chunk: Option<WireChunk>,
    #[serde(default)]
    trace: Option<WireTracePart>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    bytes: Option<String>,
    #[serde(default)]
    files: Vec<WireFile>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    media_type: Option<String>,
    #[serde(default)]
    bytes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTracePart {
    #[serde(default)]
    trace: Option<WireTrace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTrace {
    #[serde(default)]
    orchestration_trace: Option<OrchestrationTrace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrchestrationTrace {
    #[serde(default)]
    invocation_input: Option<InvocationInput>,
    #[serde(default)]
    observation: Option<Observation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvocationInput {
    #[serde(default)]
    invocation_type: Option<String>,
    #[serde(default)]
    code_interpreter_invocation_input: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Observation {
    #[serde(default)]
    code_interpreter_invocation_output: Option<Value>,
}

impl WireTrace {
    fn kinds(&self) -> Vec<TraceKind> {
        let mut kinds = Vec::new();
        if let Some(orchestration) = &self.orchestration_trace {
            if let Some(input) = &orchestration.invocation_input {
                let declared = input.invocation_type.as_deref() == Some(CODE_INTERPRETER_INVOCATION);
                if declared || input.code_interpreter_invocation_input.is_some() {
                    kinds.push(TraceKind::InterpreterStarted);
                }
            }
            if let Some(observation) = &orchestration.observation {
                if observation.code_interpreter_invocation_output.is_some() {
                    kinds.push(TraceKind::InterpreterCompleted);
                }
            }
        }
        if kinds.is_empty() {
            kinds.push(TraceKind::Other);
        }
        kinds
    }
}

/// Decodes one line of the event stream. Blank lines yield no events.
pub fn decode_line(line: &str) -> Result<Vec<RemoteEvent>, AgentError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let wire: WireEvent = serde_json::from_str(line)
        .map_err(|err| AgentError::Decode(format!("invalid event json: {err}")))?;

    let mut events = Vec::new();
    if let Some(chunk) = wire.chunk {
        if let Some(encoded) = chunk.bytes {
            let raw = decode_base64(&encoded, "text chunk")?;
            let text = String::from_utf8(raw)
                .map_err(|err| AgentError::Decode(format!("text chunk is not utf-8: {err}")))?;
            events.push(RemoteEvent::Text(text));
        }
        for file in chunk.files {
            let Some(encoded) = file.bytes else {
                continue;
            };
            let raw = decode_base64(&encoded, "file payload")?;
            events.push(RemoteEvent::File(RemoteFile {
                name: file.name,
                media_type: file.media_type,
                bytes: Bytes::from(raw),
            }));
        }
    }

    if let Some(part) = wire.trace {
        match part.trace {
            Some(trace) => events.extend(trace.kinds().into_iter().map(RemoteEvent::Trace)),
            None => events.push(RemoteEvent::Trace(TraceKind::Other)),
        }
    }

    if events.is_empty() {
        events.push(RemoteEvent::Other);
    }
    Ok(events)
}

fn decode_base64(encoded: &str, what: &str) -> Result<Vec<u8>, AgentError> {
    STANDARD
        .decode(encoded)
        .map_err(|err| AgentError::Decode(format!("invalid base64 in {what}: {err}")))
}

struct LineDecoder {
    body: BoxStream<'static, Result<Bytes, AgentError>>,
    buffer: Vec<u8>,
    pending: VecDeque<RemoteEvent>,
    finished: bool,
}

impl LineDecoder {
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let idx = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line = self.buffer.drain(..=idx).collect::<Vec<_>>();
        line.pop();
        Some(line)
    }

    fn decode(&mut self, line: Vec<u8>) -> Result<(), AgentError> {
        let line = String::from_utf8(line)
            .map_err(|err| AgentError::Decode(format!("event line is not utf-8: {err}")))?;
        self.pending.extend(decode_line(&line)?);
        Ok(())
    }
}

/// Turns a raw response body into the typed event sequence. The first error
/// ends the sequence.
pub fn decode_ndjson(body: BoxStream<'static, Result<Bytes, AgentError>>) -> EventStream {
    let decoder = LineDecoder {
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(event) = decoder.pending.pop_front() {
                return Some((Ok(event), decoder));
            }
            if decoder.finished {
                return None;
            }

            if let Some(line) = decoder.take_line() {
                if let Err(err) = decoder.decode(line) {
                    decoder.finished = true;
                    return Some((Err(err), decoder));
                }
                continue;
            }

            match decoder.body.next().await {
                Some(Ok(bytes)) => decoder.buffer.extend_from_slice(&bytes),
                Some(Err(err)) => {
                    decoder.finished = true;
                    return Some((Err(err), decoder));
                }
                None => {
                    decoder.finished = true;
                    let rest = std::mem::take(&mut decoder.buffer);
                    if let Err(err) = decoder.decode(rest) {
                        return Some((Err(err), decoder));
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn b64(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    #[test]
    fn chunk_with_text_and_files_keeps_order() {
        let line = json!({
            "chunk": {
                "bytes": b64(b"Hello "),
                "files": [
                    {"name": "chart1.png", "type": "image/png", "bytes": b64(b"\x89PNG")},
                    {"name": "skipped.png"},
                    {"bytes": b64(b"raw")}
                ]
            }
        })
        .to_string();

        let events = decode_line(&line).expect("decode");
        assert_eq!(
            events,
            vec![
                RemoteEvent::Text("Hello ".to_string()),
                RemoteEvent::File(RemoteFile {
                    name: Some("chart1.png".to_string()),
                    media_type: Some("image/png".to_string()),
                    bytes: Bytes::from_static(b"\x89PNG"),
                }),
                RemoteEvent::File(RemoteFile {
                    name: None,
                    media_type: None,
                    bytes: Bytes::from_static(b"raw"),
                }),
            ]
        );
    }

    #[test]
    fn trace_kinds_come_from_typed_fields() {
        let started = json!({
            "trace": {"trace": {"orchestrationTrace": {"invocationInput": {
                "invocationType": "ACTION_GROUP_CODE_INTERPRETER",
                "codeInterpreterInvocationInput": {"code": "plot()"}
            }}}}
        });
        let completed = json!({
            "trace": {"trace": {"orchestrationTrace": {"observation": {
                "codeInterpreterInvocationOutput": {"executionOutput": "ok"}
            }}}}
        });
        let rationale = json!({
            "trace": {"trace": {"orchestrationTrace": {"rationale": {
                "text": "mentions codeInterpreterInvocationInput in prose"
            }}}}
        });

        assert_eq!(
            decode_line(&started.to_string()).expect("started"),
            vec![RemoteEvent::Trace(TraceKind::InterpreterStarted)]
        );
        assert_eq!(
            decode_line(&completed.to_string()).expect("completed"),
            vec![RemoteEvent::Trace(TraceKind::InterpreterCompleted)]
        );
        assert_eq!(
            decode_line(&rationale.to_string()).expect("rationale"),
            vec![RemoteEvent::Trace(TraceKind::Other)]
        );
    }

    #[test]
    fn unknown_objects_and_blank_lines() {
        assert_eq!(decode_line("   ").expect("blank"), Vec::new());
        assert_eq!(
            decode_line(r#"{"returnControl": {}}"#).expect("other"),
            vec![RemoteEvent::Other]
        );
    }

    #[test]
    fn invalid_payloads_are_decode_errors() {
        assert!(matches!(decode_line("{not json"), Err(AgentError::Decode(_))));
        assert!(matches!(
            decode_line(r#"{"chunk": {"bytes": "!!!"}}"#),
            Err(AgentError::Decode(_))
        ));
        let not_utf8 = json!({"chunk": {"bytes": b64(&[0xff, 0xfe])}}).to_string();
        assert!(matches!(decode_line(&not_utf8), Err(AgentError::Decode(_))));
    }

    #[tokio::test]
    async fn ndjson_lines_split_across_chunks() {
        let first = json!({"chunk": {"bytes": b64(b"Hel")}}).to_string();
        let second = json!({"chunk": {"bytes": b64(b"lo")}}).to_string();
        let body = format!("{first}\n{second}");
        let (head, tail) = body.split_at(first.len() + 4);
        let parts = vec![
            Ok(Bytes::from(head.to_string())),
            Ok(Bytes::from(tail.to_string())),
        ];

        let events = decode_ndjson(stream::iter(parts).boxed())
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .expect("decode stream");
        assert_eq!(
            events,
            vec![
                RemoteEvent::Text("Hel".to_string()),
                RemoteEvent::Text("lo".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn body_error_ends_sequence_after_earlier_events() {
        let line = format!("{}\n", json!({"chunk": {"bytes": b64(b"one")}}));
        let parts = vec![
            Ok(Bytes::from(line)),
            Err(AgentError::Remote("connection reset".to_string())),
            Ok(Bytes::from_static(b"ignored\n")),
        ];

        let events = decode_ndjson(stream::iter(parts).boxed())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(RemoteEvent::Text(text)) if text == "one"));
        assert!(matches!(&events[1], Err(AgentError::Remote(message)) if message == "connection reset"));
    }
}
