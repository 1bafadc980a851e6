use base64::{engine::general_purpose::STANDARD, Engine as _};
use vizstream_agent_client::{AgentClient, ModelInvocation};
use vizstream_error::VizError;

pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
const TEMPERATURE: f32 = 0.1;
const SNIFF_CHARS: usize = 100;

pub const DEFAULT_IMAGE_PROMPT: &str = "Analyze this image in detail. Describe:
- All visible objects, people, and their activities
- Setting and environment
- Colors, lighting, and composition
- Any text or signs visible
- Overall mood or atmosphere
- Spatial relationships between elements
Be thorough and objective in your description.";

/// Named model presets accepted wherever a model id is.
pub const MODEL_PRESETS: &[(&str, &str)] = &[
    ("fast", "anthropic.claude-3-5-haiku-20241022-v1:0"),
    ("balanced", "anthropic.claude-3-5-sonnet-20241022-v2:0"),
    ("powerful", "anthropic.claude-3-opus-20240229-v1:0"),
];

pub fn resolve_model(name_or_id: &str) -> &str {
    MODEL_PRESETS
        .iter()
        .find(|(preset, _)| preset.eq_ignore_ascii_case(name_or_id))
        .map(|(_, model_id)| *model_id)
        .unwrap_or(name_or_id)
}

/// Drops a `data:image/...;base64,` prefix if present.
pub fn strip_data_url(payload: &str) -> &str {
    let payload = payload.trim();
    if payload.starts_with("data:image") {
        if let Some((_, data)) = payload.split_once(',') {
            return data;
        }
    }
    payload
}

/// Sniffs the image format from the leading bytes; anything unrecognised or
/// undecodable is reported as `jpeg`.
pub fn detect_format(payload: &str) -> &'static str {
    let prefix = payload.get(..payload.len().min(SNIFF_CHARS)).unwrap_or_default();
    let Ok(head) = STANDARD.decode(prefix) else {
        return "jpeg";
    };
    if head.starts_with(b"\xff\xd8\xff") {
        "jpeg"
    } else if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        "png"
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        "gif"
    } else if head[..head.len().min(20)]
        .windows(4)
        .any(|window| window == b"WEBP")
    {
        "webp"
    } else {
        "jpeg"
    }
}

#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    pub analysis: String,
    pub model_id: String,
    pub image_format: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct ImageRequest<'a> {
    pub image_base64: &'a str,
    pub prompt: Option<&'a str>,
    pub model_id: Option<&'a str>,
    pub max_tokens: Option<u32>,
}

pub async fn analyze(
    client: &AgentClient,
    default_model: &str,
    request: ImageRequest<'_>,
) -> Result<ImageAnalysis, VizError> {
    let data = strip_data_url(request.image_base64);
    if data.is_empty() {
        return Err(VizError::InvalidRequest {
            message: "image_base64 is empty".to_string(),
        });
    }
    let image_format = detect_format(data);
    let model_id = resolve_model(request.model_id.unwrap_or(default_model)).to_string();

    let analysis = client
        .invoke_model(ModelInvocation {
            model_id: model_id.clone(),
            image_base64: data.to_string(),
            media_type: format!("image/{image_format}"),
            prompt: request.prompt.unwrap_or(DEFAULT_IMAGE_PROMPT).to_string(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: TEMPERATURE,
        })
        .await
        .map_err(|err| VizError::RemoteInvocation {
            message: err.to_string(),
        })?;

    Ok(ImageAnalysis {
        analysis,
        model_id,
        image_format,
    })
}

/// Input sent to the agent when a question is asked about an analysed image.
pub fn compose_agent_input(analysis: &str, user_message: &str) -> String {
    format!(
        "I have analyzed an image and here's what I found:\n\n\
         IMAGE ANALYSIS:\n{analysis}\n\n\
         USER QUESTION: {user_message}\n\n\
         Please respond to the user's question about this image using the analysis above as factual reference."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vizstream_agent_client::MockBackend;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

    #[test]
    fn detects_formats_from_magic_bytes() {
        assert_eq!(detect_format(&STANDARD.encode(PNG_HEADER)), "png");
        assert_eq!(detect_format(&STANDARD.encode(b"\xff\xd8\xff\xe0rest")), "jpeg");
        assert_eq!(detect_format(&STANDARD.encode(b"GIF89a....")), "gif");
        assert_eq!(detect_format(&STANDARD.encode(b"RIFF\x10\x00\x00\x00WEBPVP8 ")), "webp");
        assert_eq!(detect_format(&STANDARD.encode(b"plain text")), "jpeg");
        assert_eq!(detect_format("%%%not base64"), "jpeg");
    }

    #[test]
    fn strips_data_url_prefix() {
        assert_eq!(strip_data_url("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url("AAAA"), "AAAA");
    }

    #[test]
    fn presets_resolve_by_name() {
        assert_eq!(resolve_model("fast"), "anthropic.claude-3-5-haiku-20241022-v1:0");
        assert_eq!(resolve_model("custom-model"), "custom-model");
    }

    #[tokio::test]
    async fn analyze_sends_one_image_and_prompt() {
        let client = AgentClient::mock(MockBackend::new(Vec::new()).with_model_reply("a chart"));
        let payload = format!("data:image/png;base64,{}", STANDARD.encode(PNG_HEADER));
        let result = analyze(
            &client,
            DEFAULT_MODEL_ID,
            ImageRequest {
                image_base64: &payload,
                model_id: Some("powerful"),
                ..Default::default()
            },
        )
        .await
        .expect("analyze");

        assert_eq!(result.analysis, "a chart");
        assert_eq!(result.image_format, "png");
        assert_eq!(result.model_id, "anthropic.claude-3-opus-20240229-v1:0");

        let AgentClient::Mock(mock) = &client else {
            panic!("expected mock client");
        };
        let sent = mock.model_requests().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].media_type, "image/png");
        assert_eq!(sent[0].prompt, DEFAULT_IMAGE_PROMPT);
        assert_eq!(sent[0].max_tokens, DEFAULT_MAX_TOKENS);
        assert!(!sent[0].image_base64.starts_with("data:"));
    }

    #[tokio::test]
    async fn empty_image_is_rejected() {
        let client = AgentClient::mock(MockBackend::new(Vec::new()));
        let err = analyze(&client, DEFAULT_MODEL_ID, ImageRequest::default())
            .await
            .expect_err("empty");
        assert!(matches!(err, VizError::InvalidRequest { .. }));
    }
}
