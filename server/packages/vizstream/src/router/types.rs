use super::*;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct RootResponse {
    pub message: String,
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub active_streams: usize,
    pub agent_configured: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct FormatLimits {
    pub max_file_size_mb: f64,
    pub supported_use_cases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct SupportedFormatsResponse {
    pub data_files: BTreeMap<String, String>,
    pub document_files: BTreeMap<String, String>,
    pub limits: FormatLimits,
}

/// Body of `/analyze-file-stream`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AnalyzeStreamRequest {
    pub prompt: String,
    pub file_name: String,
    #[serde(alias = "file_content")]
    pub file_data: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// When absent the prompt is forwarded verbatim.
    #[serde(default)]
    pub analysis_type: Option<AnalysisType>,
    #[serde(default)]
    pub use_case: UseCaseSelection,
    #[serde(default)]
    pub chart_types: Vec<String>,
}

/// Body of `/visualize`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VisualizeRequest {
    pub prompt: String,
    pub file_name: String,
    #[serde(alias = "file_data")]
    pub file_content: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub analysis_type: AnalysisType,
    #[serde(default)]
    pub use_case: UseCaseSelection,
    #[serde(default)]
    pub chart_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GeneratedFile {
    pub name: String,
    pub download_url: String,
    pub file_type: ArtifactKind,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalysisSummary {
    pub file_name: String,
    pub file_size_mb: f64,
    pub mime_type: String,
    #[schema(value_type = Vec<String>)]
    pub use_cases: Vec<UseCase>,
    pub charts_generated: usize,
    pub analysis_type: AnalysisType,
    pub prompt_length: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VisualizationResponse {
    pub session_id: String,
    pub response_text: String,
    pub generated_files: Vec<GeneratedFile>,
    pub analysis_summary: AnalysisSummary,
    /// Seconds.
    pub execution_time: f64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct MessageResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AnalyzeImageRequest {
    pub image_base64: String,
    #[serde(default)]
    pub prompt: Option<String>,
    /// Model id or preset name (`fast`, `balanced`, `powerful`).
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct AnalyzeImageResponse {
    pub analysis: String,
    pub model_id: String,
    pub image_format: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChatWithImageRequest {
    pub image_base64: String,
    pub user_message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ChatWithImageResponse {
    pub image_analysis: String,
    pub agent_response: String,
    pub session_id: String,
}
