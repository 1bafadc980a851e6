use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::request::{InvocationRequest, ModelInvocation};
use crate::wire::{decode_ndjson, EventStream};
use crate::AgentError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MODEL_TIMEOUT: Duration = Duration::from_secs(120);
const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub endpoint: String,
    pub token: Option<String>,
}

/// Talks to an agent gateway over HTTP. Invocations are posted as JSON and
/// answered with newline-delimited JSON events.
#[derive(Debug)]
pub struct HttpBackend {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelResponse {
    #[serde(default)]
    content: Vec<ModelContent>,
}

#[derive(Debug, Deserialize)]
struct ModelContent {
    #[serde(default)]
    text: Option<String>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, AgentError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|err| AgentError::InvalidEndpoint {
            endpoint: config.endpoint.clone(),
            message: err.to_string(),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(AgentError::InvalidEndpoint {
                endpoint: config.endpoint,
                message: "endpoint must be an absolute http(s) url".to_string(),
            });
        }
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint,
            token: config.token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, AgentError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| AgentError::InvalidEndpoint {
                endpoint: self.endpoint.to_string(),
                message: "endpoint cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub(crate) async fn invoke(&self, request: InvocationRequest) -> Result<EventStream, AgentError> {
        let identity = &request.identity;
        let url = self.url(&[
            "agents",
            &identity.agent_id,
            "agentAliases",
            &identity.agent_alias_id,
            "sessions",
            &request.session_id,
            "text",
        ])?;

        tracing::info!(
            session_id = %request.session_id,
            files = request.session_state.files.len(),
            url = %url,
            "invoking agent"
        );

        let response = self
            .authorize(self.client.post(url))
            .header(reqwest::header::ACCEPT, "application/x-ndjson")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(AgentError::from))
            .boxed();
        Ok(decode_ndjson(body))
    }

    pub(crate) async fn invoke_model(&self, request: ModelInvocation) -> Result<String, AgentError> {
        let url = self.url(&["model", &request.model_id, "invoke"])?;
        let body = json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": request.media_type,
                            "data": request.image_base64,
                        }
                    },
                    {
                        "type": "text",
                        "text": request.prompt,
                    }
                ]
            }]
        });

        let response = self
            .authorize(self.client.post(url))
            .timeout(MODEL_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        let parsed: ModelResponse = response.json().await?;
        let text = parsed
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| AgentError::Decode("model response has no text content".to_string()))?;
        tracing::info!(model_id = %request.model_id, "image analysis completed");
        Ok(text.trim().to_string())
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}
