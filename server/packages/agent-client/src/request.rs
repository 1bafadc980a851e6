use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize, Serializer};

/// Interval, in generated units, at which the service applies guardrail checks
/// while streaming the final response.
pub const GUARDRAIL_INTERVAL: u32 = 20;

const BYTE_CONTENT_SOURCE: &str = "BYTE_CONTENT";

/// How the remote service should treat an attached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UseCase {
    #[serde(rename = "CHAT")]
    Chat,
    #[serde(rename = "CODE_INTERPRETER")]
    CodeExecution,
}

impl UseCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::CodeExecution => "CODE_INTERPRETER",
        }
    }
}

impl std::fmt::Display for UseCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub agent_alias_id: String,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>, agent_alias_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_alias_id: agent_alias_id.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.agent_id.is_empty() && !self.agent_alias_id.is_empty()
    }
}

/// A file offered to the agent for one invocation.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub bytes: Bytes,
    pub media_type: String,
    pub use_cases: Vec<UseCase>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            media_type: media_type.into(),
            use_cases: Vec::new(),
        }
    }

    pub fn with_use_cases(mut self, use_cases: Vec<UseCase>) -> Self {
        self.use_cases = use_cases;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    #[serde(skip)]
    pub identity: AgentIdentity,
    #[serde(skip)]
    pub session_id: String,
    pub input_text: String,
    pub session_state: SessionState,
    pub streaming_configurations: StreamingConfig,
}

impl InvocationRequest {
    /// Builds one file descriptor per (attachment, use case) pair. Attachments
    /// without a use case are offered conversationally.
    pub fn new(
        identity: AgentIdentity,
        session_id: impl Into<String>,
        input_text: impl Into<String>,
        attachments: &[Attachment],
    ) -> Self {
        let mut files = Vec::new();
        for attachment in attachments {
            let use_cases: &[UseCase] = if attachment.use_cases.is_empty() {
                &[UseCase::Chat]
            } else {
                &attachment.use_cases
            };
            for use_case in use_cases {
                files.push(FileDescriptor {
                    name: attachment.name.clone(),
                    source: FileSource {
                        source_type: BYTE_CONTENT_SOURCE,
                        byte_content: ByteContent {
                            data: attachment.bytes.clone(),
                            media_type: attachment.media_type.clone(),
                        },
                    },
                    use_case: *use_case,
                });
            }
        }

        Self {
            identity,
            session_id: session_id.into(),
            input_text: input_text.into(),
            session_state: SessionState { files },
            streaming_configurations: StreamingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    pub source: FileSource,
    pub use_case: UseCase,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSource {
    pub source_type: &'static str,
    pub byte_content: ByteContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteContent {
    #[serde(serialize_with = "serialize_base64")]
    pub data: Bytes,
    pub media_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingConfig {
    pub stream_final_response: bool,
    pub apply_guardrail_interval: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            stream_final_response: true,
            apply_guardrail_interval: GUARDRAIL_INTERVAL,
        }
    }
}

/// A single-shot vision model call: one image block followed by one text block.
#[derive(Debug, Clone)]
pub struct ModelInvocation {
    pub model_id: String,
    pub image_base64: String,
    pub media_type: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

fn serialize_base64<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&STANDARD.encode(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_descriptor_per_use_case_sharing_bytes() {
        let attachment = Attachment::new("sales.xlsx", Bytes::from_static(b"xlsx"), "application/vnd.ms-excel")
            .with_use_cases(vec![UseCase::Chat, UseCase::CodeExecution]);
        let request = InvocationRequest::new(
            AgentIdentity::new("agent", "alias"),
            "session_1",
            "summarize and visualize",
            &[attachment],
        );

        let files = &request.session_state.files;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].use_case, UseCase::Chat);
        assert_eq!(files[1].use_case, UseCase::CodeExecution);
        assert_eq!(files[0].source.byte_content.data, files[1].source.byte_content.data);
    }

    #[test]
    fn serializes_camel_case_body_without_identity() {
        let attachment = Attachment::new("data.csv", Bytes::from_static(b"a,b"), "text/csv")
            .with_use_cases(vec![UseCase::CodeExecution]);
        let request = InvocationRequest::new(
            AgentIdentity::new("agent", "alias"),
            "session_1",
            "chart it",
            &[attachment],
        );

        let value = serde_json::to_value(&request).expect("serialize request");
        assert!(value.get("identity").is_none());
        assert!(value.get("sessionId").is_none());
        assert_eq!(value["inputText"], "chart it");
        assert_eq!(value["streamingConfigurations"]["streamFinalResponse"], true);
        assert_eq!(value["streamingConfigurations"]["applyGuardrailInterval"], 20);

        let file = &value["sessionState"]["files"][0];
        assert_eq!(file["useCase"], "CODE_INTERPRETER");
        assert_eq!(file["source"]["sourceType"], "BYTE_CONTENT");
        assert_eq!(file["source"]["byteContent"]["data"], "YSxi");
        assert_eq!(file["source"]["byteContent"]["mediaType"], "text/csv");
    }

    #[test]
    fn attachment_without_use_case_defaults_to_chat() {
        let attachment = Attachment::new("notes.txt", Bytes::from_static(b"hi"), "text/plain");
        let request = InvocationRequest::new(AgentIdentity::default(), "s", "read", &[attachment]);
        assert_eq!(request.session_state.files.len(), 1);
        assert_eq!(request.session_state.files[0].use_case, UseCase::Chat);
    }
}
