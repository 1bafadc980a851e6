use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use futures::{Stream, StreamExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{Modify, OpenApi, ToSchema};
use uuid::Uuid;
use vizstream_agent_client::{
    AgentClient, AgentError, AgentIdentity, Attachment, EventStream, InvocationRequest, UseCase,
};
use vizstream_error::{mib, ErrorType, ProblemDetails, VizError};

use crate::artifacts::ArtifactStore;
use crate::classify::UseCaseSelection;
use crate::formats::{self, ArtifactKind};
use crate::image::{self, ImageRequest};
use crate::normalize::{self, DEFAULT_MAX_FILE_BYTES};
use crate::prompt::{build_prompt, AnalysisType};
use crate::relay::Relay;
use crate::sessions::SessionRegistry;

mod types;

pub use types::*;

const SERVICE_NAME: &str = "Data Visualization Streaming API";
const SUPPORTED_USE_CASES: [UseCase; 2] = [UseCase::Chat, UseCase::CodeExecution];
/// Allowance for JSON framing and base64 expansion on top of the file ceiling.
const BODY_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub artifact_dir: PathBuf,
    pub max_file_bytes: usize,
    pub model_id: String,
    pub idle_timeout: Option<Duration>,
}

impl ServerConfig {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            model_id: image::DEFAULT_MODEL_ID.to_string(),
            idle_timeout: None,
        }
    }

    fn body_limit(&self) -> usize {
        self.max_file_bytes
            .saturating_mul(4)
            .saturating_div(3)
            .saturating_add(BODY_OVERHEAD_BYTES)
    }
}

#[derive(Debug)]
pub struct AppState {
    client: AgentClient,
    identity: AgentIdentity,
    relay: Relay,
    config: ServerConfig,
}

impl AppState {
    pub fn new(client: AgentClient, identity: AgentIdentity, config: ServerConfig) -> Self {
        let relay = Relay::new(
            SessionRegistry::new(),
            ArtifactStore::new(config.artifact_dir.clone()),
        )
        .with_idle_timeout(config.idle_timeout);
        Self {
            client,
            identity,
            relay,
            config,
        }
    }

    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.relay.registry()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        self.relay.artifacts()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn agent_configured(&self) -> bool {
        self.client.is_mock() || self.identity.is_configured()
    }

    fn invocation(
        &self,
        request: InvocationRequest,
    ) -> impl Future<Output = Result<EventStream, AgentError>> + Send + 'static {
        let client = self.client.clone();
        async move { client.invoke(request).await }
    }
}

pub fn build_router(state: AppState) -> Router {
    build_router_with_state(Arc::new(state)).0
}

pub fn build_router_with_state(shared: Arc<AppState>) -> (Router, Arc<AppState>) {
    let mut router = Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/supported-formats", get(get_supported_formats))
        .route("/analyze-file-stream", post(analyze_file_stream))
        .route("/visualize", post(visualize))
        .route("/visualize/upload", post(visualize_upload))
        .route("/stop-stream/:session_id", post(stop_stream))
        .route("/files/:name", get(get_file).delete(delete_file))
        .route("/analyze-image", post(analyze_image))
        .route("/chat-with-image", post(chat_with_image))
        .layer(DefaultBodyLimit::max(shared.config.body_limit()))
        .with_state(shared.clone());

    let http_logging = match std::env::var("VIZSTREAM_LOG_HTTP") {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    };
    if http_logging {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|req: &Request<_>| {
                tracing::info_span!(
                    "http.request",
                    method = %req.method(),
                    uri = %req.uri()
                )
            })
            .on_request(|_req: &Request<_>, span: &Span| {
                tracing::info!(parent: span, "request");
            })
            .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                tracing::info!(
                    parent: span,
                    status = %res.status(),
                    latency_ms = latency.as_millis()
                );
            });
        router = router.layer(trace_layer);
    }

    (router, shared)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_root,
        get_health,
        get_supported_formats,
        analyze_file_stream,
        visualize,
        visualize_upload,
        stop_stream,
        get_file,
        delete_file,
        analyze_image,
        chat_with_image
    ),
    components(
        schemas(
            RootResponse,
            HealthResponse,
            FormatLimits,
            SupportedFormatsResponse,
            AnalyzeStreamRequest,
            VisualizeRequest,
            GeneratedFile,
            AnalysisSummary,
            VisualizationResponse,
            MessageResponse,
            AnalyzeImageRequest,
            AnalyzeImageResponse,
            ChatWithImageRequest,
            ChatWithImageResponse,
            AnalysisType,
            UseCaseSelection,
            ArtifactKind,
            ProblemDetails,
            ErrorType
        )
    ),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "analysis", description = "File analysis and visualization"),
        (name = "files", description = "Generated artifacts"),
        (name = "images", description = "Image analysis")
    ),
    modifiers(&ServerAddon)
)]
pub struct ApiDoc;

struct ServerAddon;

impl Modify for ServerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![utoipa::openapi::Server::new("http://localhost:8000")]);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Viz(#[from] VizError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemDetails = match &self {
            ApiError::Viz(err) => err.to_problem_details(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

/// `session_<8 hex>`.
pub fn new_session_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("session_{}", &id[..8])
}

fn session_id_or_new(session_id: Option<&str>) -> String {
    match session_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => new_session_id(),
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn invalid_request(message: impl Into<String>) -> ApiError {
    VizError::InvalidRequest {
        message: message.into(),
    }
    .into()
}

fn blocking_failed(err: tokio::task::JoinError) -> ApiError {
    VizError::StreamError {
        message: err.to_string(),
    }
    .into()
}

/// Unwraps a JSON body. A body cut off by the length limit is reported as an
/// oversized file, any other rejection as an invalid request.
fn json_body<T>(
    config: &ServerConfig,
    headers: &HeaderMap,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            Err(oversized_body(config, headers, true))
        }
        Err(rejection) => Err(invalid_request(rejection.body_text())),
    }
}

fn multipart_failed(config: &ServerConfig, headers: &HeaderMap, err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        oversized_body(config, headers, false)
    } else {
        invalid_request(err.body_text())
    }
}

/// The body was never fully read, so the file size is estimated from
/// `Content-Length` (or the limit itself when the header is absent).
fn oversized_body(config: &ServerConfig, headers: &HeaderMap, base64_encoded: bool) -> ApiError {
    let body_bytes = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or_else(|| config.body_limit());
    let size_bytes = if base64_encoded {
        body_bytes / 4 * 3
    } else {
        body_bytes
    };
    VizError::PayloadTooLarge {
        size_bytes: size_bytes.max(config.max_file_bytes.saturating_add(1)),
        max_bytes: config.max_file_bytes,
    }
    .into()
}

/// Relative download URL for a stored artifact.
pub fn download_path(name: &str) -> String {
    format!("/files/{}", urlencoding::encode(name))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(name)
    )
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, body = RootResponse)),
    tag = "meta"
)]
async fn get_root() -> Json<RootResponse> {
    Json(RootResponse {
        message: SERVICE_NAME.to_string(),
        status: "healthy".to_string(),
        timestamp: now_rfc3339(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, body = HealthResponse)),
    tag = "meta"
)]
async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        active_streams: state.registry().len(),
        agent_configured: state.agent_configured(),
        timestamp: now_rfc3339(),
    })
}

#[utoipa::path(
    get,
    path = "/supported-formats",
    responses((status = 200, body = SupportedFormatsResponse)),
    tag = "meta"
)]
async fn get_supported_formats(State(state): State<Arc<AppState>>) -> Json<SupportedFormatsResponse> {
    let table = |entries: &[(&str, &str)]| {
        entries
            .iter()
            .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
            .collect::<BTreeMap<_, _>>()
    };
    Json(SupportedFormatsResponse {
        data_files: table(formats::DATA_FILES),
        document_files: table(formats::DOCUMENT_FILES),
        limits: FormatLimits {
            max_file_size_mb: mib(state.config.max_file_bytes),
            supported_use_cases: SUPPORTED_USE_CASES
                .iter()
                .map(|use_case| use_case.as_str().to_string())
                .collect(),
        },
    })
}

#[utoipa::path(
    post,
    path = "/analyze-file-stream",
    request_body = AnalyzeStreamRequest,
    responses(
        (status = 200, description = "SSE frames: status, text, chart, complete, error"),
        (status = 400, body = ProblemDetails),
        (status = 409, body = ProblemDetails),
        (status = 413, body = ProblemDetails)
    ),
    tag = "analysis"
)]
async fn analyze_file_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeStreamRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, serde_json::Error>>>, ApiError> {
    let request = json_body(&state.config, &headers, payload)?;
    let attachment = normalize::normalize(
        &request.file_data,
        request.file_type.as_deref(),
        &request.file_name,
        state.config.max_file_bytes,
    )
    .map_err(VizError::from)?;
    let use_cases =
        request
            .use_case
            .resolve(&attachment.name, &attachment.media_type, &request.prompt);
    let input_text = match request.analysis_type {
        Some(analysis_type) => build_prompt(
            &request.prompt,
            analysis_type,
            &request.chart_types,
            &request.file_name,
        ),
        None => request.prompt.clone(),
    };

    let session_id = session_id_or_new(request.session_id.as_deref());
    let guard = state.registry().register(&session_id)?;
    tracing::info!(
        session_id = %session_id,
        file_name = %attachment.name,
        size_bytes = attachment.bytes.len(),
        use_cases = ?use_cases,
        "streaming analysis requested"
    );

    let invocation = InvocationRequest::new(
        state.identity.clone(),
        &session_id,
        input_text,
        &[attachment.with_use_cases(use_cases)],
    );
    let frames = state.relay.stream(guard, state.invocation(invocation));
    Ok(Sse::new(frames.map(|message| message.to_sse_event())))
}

struct VisualizationInput {
    attachment: Attachment,
    prompt: String,
    session_id: Option<String>,
    analysis_type: AnalysisType,
    use_case: UseCaseSelection,
    chart_types: Vec<String>,
}

async fn run_visualization(
    state: &AppState,
    input: VisualizationInput,
) -> Result<VisualizationResponse, ApiError> {
    let started = Instant::now();
    let VisualizationInput {
        attachment,
        prompt,
        session_id,
        analysis_type,
        use_case,
        chart_types,
    } = input;

    let use_cases = use_case.resolve(&attachment.name, &attachment.media_type, &prompt);
    if !formats::is_supported(&attachment.name) {
        tracing::warn!(file_name = %attachment.name, "potentially unsupported file type");
    }
    let input_text = build_prompt(&prompt, analysis_type, &chart_types, &attachment.name);
    let prompt_length = input_text.chars().count();
    let file_name = attachment.name.clone();
    let mime_type = attachment.media_type.clone();
    let size_bytes = attachment.bytes.len();

    let session_id = session_id_or_new(session_id.as_deref());
    let guard = state.registry().register(&session_id)?;
    tracing::info!(
        session_id = %session_id,
        file_name = %file_name,
        use_cases = ?use_cases,
        "visualization requested"
    );

    let invocation = InvocationRequest::new(
        state.identity.clone(),
        &session_id,
        input_text,
        &[attachment.with_use_cases(use_cases.clone())],
    );
    let result = state
        .relay
        .collect(guard, state.invocation(invocation))
        .await?;

    let generated_files: Vec<GeneratedFile> = result
        .files
        .iter()
        .map(|file| GeneratedFile {
            name: file.name.clone(),
            download_url: download_path(&file.name),
            file_type: file.kind,
            size_bytes: file.size,
        })
        .collect();
    let charts_generated = result
        .files
        .iter()
        .filter(|file| file.kind == ArtifactKind::Image)
        .count();
    let execution_time = started.elapsed().as_secs_f64();
    tracing::info!(
        session_id = %session_id,
        files = generated_files.len(),
        execution_time_s = execution_time,
        "visualization completed"
    );

    Ok(VisualizationResponse {
        session_id,
        response_text: result.text,
        generated_files,
        analysis_summary: AnalysisSummary {
            file_name,
            file_size_mb: (mib(size_bytes) * 100.0).round() / 100.0,
            mime_type,
            use_cases,
            charts_generated,
            analysis_type,
            prompt_length,
        },
        execution_time,
        success: true,
    })
}

#[utoipa::path(
    post,
    path = "/visualize",
    request_body = VisualizeRequest,
    responses(
        (status = 200, body = VisualizationResponse),
        (status = 400, body = ProblemDetails),
        (status = 409, body = ProblemDetails),
        (status = 413, body = ProblemDetails),
        (status = 502, body = ProblemDetails)
    ),
    tag = "analysis"
)]
async fn visualize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<VisualizeRequest>, JsonRejection>,
) -> Result<Json<VisualizationResponse>, ApiError> {
    let request = json_body(&state.config, &headers, payload)?;
    let attachment = normalize::normalize(
        &request.file_content,
        request.file_type.as_deref(),
        &request.file_name,
        state.config.max_file_bytes,
    )
    .map_err(VizError::from)?;
    let response = run_visualization(
        &state,
        VisualizationInput {
            attachment,
            prompt: request.prompt,
            session_id: request.session_id,
            analysis_type: request.analysis_type,
            use_case: request.use_case,
            chart_types: request.chart_types,
        },
    )
    .await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/visualize/upload",
    request_body(
        content = String,
        content_type = "multipart/form-data",
        description = "Fields: file, prompt, analysis_type, session_id"
    ),
    responses(
        (status = 200, body = VisualizationResponse),
        (status = 400, body = ProblemDetails),
        (status = 413, body = ProblemDetails)
    ),
    tag = "analysis"
)]
async fn visualize_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VisualizationResponse>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| invalid_request(rejection.body_text()))?;
    let failed = |err: MultipartError| multipart_failed(&state.config, &headers, err);
    let mut file = None;
    let mut prompt = None;
    let mut analysis_type = AnalysisType::default();
    let mut session_id = None;

    while let Some(field) = multipart.next_field().await.map_err(failed)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(failed)?;
                file = Some((file_name, content_type, bytes));
            }
            Some("prompt") => {
                prompt = Some(field.text().await.map_err(failed)?);
            }
            Some("analysis_type") => {
                let value = field.text().await.map_err(failed)?;
                if !value.trim().is_empty() {
                    analysis_type = AnalysisType::parse(&value)
                        .ok_or_else(|| invalid_request(format!("unknown analysis_type: {value}")))?;
                }
            }
            Some("session_id") => {
                session_id = Some(field.text().await.map_err(failed)?);
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| invalid_request("missing multipart field: file"))?;
    let prompt = prompt.ok_or_else(|| invalid_request("missing multipart field: prompt"))?;
    normalize::check_size(bytes.len(), state.config.max_file_bytes).map_err(VizError::from)?;
    let media_type = normalize::resolve_mime(&file_name, content_type.as_deref());

    let response = run_visualization(
        &state,
        VisualizationInput {
            attachment: Attachment::new(file_name, bytes, media_type),
            prompt,
            session_id,
            analysis_type,
            use_case: UseCaseSelection::Auto,
            chart_types: Vec::new(),
        },
    )
    .await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/stop-stream/{session_id}",
    params(("session_id" = String, Path, description = "Session to stop")),
    responses(
        (status = 200, body = MessageResponse),
        (status = 404, body = ProblemDetails)
    ),
    tag = "analysis"
)]
async fn stop_stream(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.registry().mark_stopped(&session_id) {
        return Err(VizError::SessionNotFound { session_id }.into());
    }
    tracing::info!(session_id = %session_id, "stop requested");
    Ok(Json(MessageResponse {
        message: format!("Stream {session_id} stopped"),
        session_id: Some(session_id),
    }))
}

#[utoipa::path(
    get,
    path = "/files/{name}",
    params(("name" = String, Path, description = "Artifact name")),
    responses(
        (status = 200, description = "Raw file bytes"),
        (status = 404, body = ProblemDetails)
    ),
    tag = "files"
)]
async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let store = state.artifacts().clone();
    let lookup = name.clone();
    let bytes = tokio::task::spawn_blocking(move || store.get(&lookup))
        .await
        .map_err(blocking_failed)?
        .map_err(VizError::from)?;
    let disposition = content_disposition(&name);
    Ok((
        [
            (header::CONTENT_TYPE, formats::OCTET_STREAM.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[utoipa::path(
    delete,
    path = "/files/{name}",
    params(("name" = String, Path, description = "Artifact name")),
    responses(
        (status = 200, body = MessageResponse),
        (status = 404, body = ProblemDetails)
    ),
    tag = "files"
)]
async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let store = state.artifacts().clone();
    let target = name.clone();
    let deleted = tokio::task::spawn_blocking(move || store.delete(&target))
        .await
        .map_err(blocking_failed)?
        .map_err(VizError::from)?;
    if !deleted {
        return Err(VizError::ArtifactNotFound { name }.into());
    }
    tracing::info!(name = %name, "artifact deleted");
    Ok(Json(MessageResponse {
        message: format!("File {name} deleted successfully"),
        session_id: None,
    }))
}

#[utoipa::path(
    post,
    path = "/analyze-image",
    request_body = AnalyzeImageRequest,
    responses(
        (status = 200, body = AnalyzeImageResponse),
        (status = 400, body = ProblemDetails),
        (status = 413, body = ProblemDetails),
        (status = 502, body = ProblemDetails)
    ),
    tag = "images"
)]
async fn analyze_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeImageRequest>, JsonRejection>,
) -> Result<Json<AnalyzeImageResponse>, ApiError> {
    let request = json_body(&state.config, &headers, payload)?;
    let result = image::analyze(
        &state.client,
        &state.config.model_id,
        ImageRequest {
            image_base64: &request.image_base64,
            prompt: request.prompt.as_deref(),
            model_id: request.model_id.as_deref(),
            max_tokens: request.max_tokens,
        },
    )
    .await?;
    Ok(Json(AnalyzeImageResponse {
        analysis: result.analysis,
        model_id: result.model_id,
        image_format: result.image_format.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/chat-with-image",
    request_body = ChatWithImageRequest,
    responses(
        (status = 200, body = ChatWithImageResponse),
        (status = 400, body = ProblemDetails),
        (status = 409, body = ProblemDetails),
        (status = 413, body = ProblemDetails),
        (status = 502, body = ProblemDetails)
    ),
    tag = "images"
)]
async fn chat_with_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ChatWithImageRequest>, JsonRejection>,
) -> Result<Json<ChatWithImageResponse>, ApiError> {
    let request = json_body(&state.config, &headers, payload)?;
    let analysis = image::analyze(
        &state.client,
        &state.config.model_id,
        ImageRequest {
            image_base64: &request.image_base64,
            ..Default::default()
        },
    )
    .await?;

    let session_id = session_id_or_new(request.session_id.as_deref());
    let guard = state.registry().register(&session_id)?;
    let input_text = image::compose_agent_input(&analysis.analysis, &request.user_message);
    let invocation = InvocationRequest::new(state.identity.clone(), &session_id, input_text, &[]);
    let result = state
        .relay
        .collect(guard, state.invocation(invocation))
        .await?;

    Ok(Json(ChatWithImageResponse {
        image_analysis: analysis.analysis,
        agent_response: result.text.trim().to_string(),
        session_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_have_fixed_shape() {
        let id = new_session_id();
        assert_eq!(id.len(), "session_".len() + 8);
        assert!(id.starts_with("session_"));
        assert!(id["session_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn blank_session_ids_are_replaced() {
        assert_eq!(session_id_or_new(Some(" keep ")), "keep");
        assert!(session_id_or_new(Some("  ")).starts_with("session_"));
        assert!(session_id_or_new(None).starts_with("session_"));
    }

    #[test]
    fn body_limit_covers_base64_expansion() {
        let config = ServerConfig::new("/tmp/unused");
        assert!(config.body_limit() > config.max_file_bytes * 4 / 3);
    }

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/",
            "/health",
            "/supported-formats",
            "/analyze-file-stream",
            "/visualize",
            "/visualize/upload",
            "/stop-stream/{session_id}",
            "/files/{name}",
            "/analyze-image",
            "/chat-with-image",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn artifact_names_are_escaped_for_headers_and_paths() {
        assert_eq!(download_path("chart 1#a?.png"), "/files/chart%201%23a%3F.png");
        assert_eq!(
            content_disposition("r\u{e9}sum\u{e9} \"v2\".csv"),
            "attachment; filename=\"r_sum_ _v2_.csv\"; filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.csv"
        );
        assert!(header::HeaderValue::from_str(&content_disposition("\u{1f4c8}.png")).is_ok());
    }

    #[test]
    fn oversized_body_reports_ceiling() {
        let config = ServerConfig::new("/tmp/artifacts");
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from_static("16777216"));
        let ApiError::Viz(err) = oversized_body(&config, &headers, true);
        assert!(matches!(
            err,
            VizError::PayloadTooLarge { size_bytes: 12582912, max_bytes } if max_bytes == DEFAULT_MAX_FILE_BYTES
        ));

        let ApiError::Viz(err) = oversized_body(&config, &HeaderMap::new(), false);
        assert!(matches!(
            err,
            VizError::PayloadTooLarge { size_bytes, .. } if size_bytes == config.body_limit()
        ));
    }
}
