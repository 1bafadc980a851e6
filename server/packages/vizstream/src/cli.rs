use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use reqwest::blocking::Client as HttpClient;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use axum::http::{HeaderName, HeaderValue};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;
use vizstream_agent_client::{AgentClient, AgentIdentity, HttpBackendConfig, MockBackend};

use crate::image::DEFAULT_MODEL_ID;
use crate::router::{build_router_with_state, download_path, ApiDoc, AppState, ServerConfig};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_FILE_MB: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "vizstream", bin_name = "vizstream", version)]
#[command(about = "Streams file analysis and chart generation from a managed agent service")]
#[command(arg_required_else_help = true)]
pub struct VizstreamCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server.
    Server(ServerArgs),
    /// Call a running server's HTTP API.
    Api(ApiArgs),
    /// Print the OpenAPI document.
    Openapi,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', env = "VIZSTREAM_HOST", default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', env = "VIZSTREAM_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Base URL of the agent gateway.
    #[arg(long, env = "VIZSTREAM_AGENT_ENDPOINT")]
    agent_endpoint: Option<String>,

    #[arg(long, env = "VIZSTREAM_AGENT_ID")]
    agent_id: Option<String>,

    #[arg(long, env = "VIZSTREAM_AGENT_ALIAS_ID")]
    agent_alias_id: Option<String>,

    /// Bearer token sent to the agent gateway.
    #[arg(long, env = "VIZSTREAM_AGENT_TOKEN", hide_env_values = true)]
    agent_token: Option<String>,

    /// Default vision model id or preset (`fast`, `balanced`, `powerful`).
    #[arg(long, env = "VIZSTREAM_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    model_id: String,

    #[arg(long, env = "VIZSTREAM_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    #[arg(long, env = "VIZSTREAM_MAX_FILE_MB", default_value_t = DEFAULT_MAX_FILE_MB)]
    max_file_mb: usize,

    /// Fail a stream when the agent sends nothing for this many seconds.
    #[arg(long, env = "VIZSTREAM_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,

    /// Serve scripted demo events instead of calling the gateway.
    #[arg(long)]
    mock: bool,

    #[arg(long = "cors-allow-origin", short = 'O')]
    cors_allow_origin: Vec<String>,

    #[arg(long = "cors-allow-method", short = 'M')]
    cors_allow_method: Vec<String>,

    #[arg(long = "cors-allow-header", short = 'A')]
    cors_allow_header: Vec<String>,

    #[arg(long = "cors-allow-credentials", short = 'C')]
    cors_allow_credentials: bool,
}

#[derive(Args, Debug)]
pub struct ApiArgs {
    #[command(subcommand)]
    command: ApiCommand,
}

#[derive(Subcommand, Debug)]
pub enum ApiCommand {
    /// Show server health and the number of live streams.
    Health(ClientArgs),
    /// List supported upload formats.
    Formats(ClientArgs),
    /// Stop a live stream.
    Stop(SessionArgs),
    /// Download a generated file.
    Download(FileArgs),
    /// Delete a generated file.
    Delete(FileArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    #[arg(long, short = 'e')]
    endpoint: Option<String>,
}

#[derive(Args, Debug)]
pub struct SessionArgs {
    session_id: String,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct FileArgs {
    name: String,
    /// Write to this path instead of stdout.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid cors origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("invalid cors method: {0}")]
    InvalidCorsMethod(String),
    #[error("invalid cors header: {0}")]
    InvalidCorsHeader(String),
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),
    #[error("agent client error: {0}")]
    Agent(#[from] vizstream_agent_client::AgentError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("unexpected http status: {0}")]
    HttpStatus(reqwest::StatusCode),
}

pub fn run_vizstream() -> Result<(), CliError> {
    let cli = VizstreamCli::parse();
    if let Err(err) = init_logging() {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    run_command(&cli.command)
}

pub fn init_logging() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}

pub fn run_command(command: &Command) -> Result<(), CliError> {
    match command {
        Command::Server(args) => run_server(args),
        Command::Api(subcommand) => run_api(&subcommand.command),
        Command::Openapi => write_line(std::io::stdout().lock(), &ApiDoc::openapi().to_pretty_json()?),
    }
}

fn run_server(server: &ServerArgs) -> Result<(), CliError> {
    let (client, identity) = build_agent_client(server)?;
    let config = server_config(server);
    tracing::info!(
        artifact_dir = %config.artifact_dir.display(),
        max_file_bytes = config.max_file_bytes,
        mock = client.is_mock(),
        "server configured"
    );

    let state = Arc::new(AppState::new(client, identity, config));
    let (mut router, _state) = build_router_with_state(state);

    let cors = build_cors_layer(server)?;
    router = router.layer(cors);

    let addr = format!("{}:{}", server.host, server.port);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "server listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested");
            })
            .await
            .map_err(|err| CliError::Server(err.to_string()))
    })
}

fn build_agent_client(server: &ServerArgs) -> Result<(AgentClient, AgentIdentity), CliError> {
    let identity = AgentIdentity::new(
        server.agent_id.clone().unwrap_or_default(),
        server.agent_alias_id.clone().unwrap_or_default(),
    );
    if server.mock {
        return Ok((AgentClient::mock(MockBackend::demo()), identity));
    }

    let endpoint = server
        .agent_endpoint
        .clone()
        .ok_or(CliError::MissingConfig("--agent-endpoint (or use --mock)"))?;
    if !identity.is_configured() {
        tracing::warn!("agent id or alias id not set; invocations will be rejected by the gateway");
    }
    let client = AgentClient::http(HttpBackendConfig {
        endpoint,
        token: server.agent_token.clone(),
    })?;
    Ok((client, identity))
}

fn server_config(server: &ServerArgs) -> ServerConfig {
    let artifact_dir = server
        .artifact_dir
        .clone()
        .unwrap_or_else(default_artifact_dir);
    let mut config = ServerConfig::new(artifact_dir);
    config.max_file_bytes = server.max_file_mb.saturating_mul(1024 * 1024);
    config.model_id = server.model_id.clone();
    config.idle_timeout = server.idle_timeout_secs.map(Duration::from_secs);
    config
}

fn default_artifact_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("vizstream").join("artifacts"))
        .unwrap_or_else(|| PathBuf::from(".").join(".vizstream").join("artifacts"))
}

fn run_api(command: &ApiCommand) -> Result<(), CliError> {
    match command {
        ApiCommand::Health(args) => {
            let ctx = ClientContext::new(args)?;
            print_json_response(ctx.get("/health")?)
        }
        ApiCommand::Formats(args) => {
            let ctx = ClientContext::new(args)?;
            print_json_response(ctx.get("/supported-formats")?)
        }
        ApiCommand::Stop(args) => {
            let ctx = ClientContext::new(&args.client)?;
            print_json_response(ctx.post_empty(&format!(
                "/stop-stream/{}",
                urlencoding::encode(&args.session_id)
            ))?)
        }
        ApiCommand::Download(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let response = ctx.get(&download_path(&args.name))?;
            let status = response.status();
            if !status.is_success() {
                print_error_body(&response.text()?)?;
                return Err(CliError::HttpStatus(status));
            }
            let bytes = response.bytes()?;
            match &args.output {
                Some(path) => std::fs::write(path, &bytes)?,
                None => {
                    let mut out = std::io::stdout();
                    out.write_all(&bytes)?;
                    out.flush()?;
                }
            }
            Ok(())
        }
        ApiCommand::Delete(args) => {
            let ctx = ClientContext::new(&args.client)?;
            print_json_response(ctx.request(Method::DELETE, &download_path(&args.name)).send()?)
        }
    }
}

/// Browsers are refused unless at least one origin is configured; methods and
/// headers default to any.
fn build_cors_layer(server: &ServerArgs) -> Result<CorsLayer, CliError> {
    let origins: Vec<HeaderValue> =
        parse_cors_values(&server.cors_allow_origin, CliError::InvalidCorsOrigin)?;
    let methods: Vec<axum::http::Method> =
        parse_cors_values(&server.cors_allow_method, CliError::InvalidCorsMethod)?;
    let headers: Vec<HeaderName> =
        parse_cors_values(&server.cors_allow_header, CliError::InvalidCorsHeader)?;

    let allow_origin = if origins.is_empty() {
        AllowOrigin::predicate(|_, _| false)
    } else {
        AllowOrigin::list(origins)
    };
    let allow_methods = if methods.is_empty() {
        AllowMethods::any()
    } else {
        AllowMethods::list(methods)
    };
    let allow_headers = if headers.is_empty() {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(headers)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(allow_methods)
        .allow_headers(allow_headers)
        .allow_credentials(server.cors_allow_credentials))
}

fn parse_cors_values<T: FromStr>(
    values: &[String],
    invalid: fn(String) -> CliError,
) -> Result<Vec<T>, CliError> {
    values
        .iter()
        .map(|value| value.parse().map_err(|_| invalid(value.clone())))
        .collect()
}

struct ClientContext {
    endpoint: String,
    client: HttpClient,
}

impl ClientContext {
    fn new(args: &ClientArgs) -> Result<Self, CliError> {
        let endpoint = args
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", DEFAULT_HOST, DEFAULT_PORT));
        let client = HttpClient::builder().build()?;
        Ok(Self { endpoint, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::blocking::RequestBuilder {
        self.client.request(method, self.url(path))
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response, CliError> {
        Ok(self.request(Method::GET, path).send()?)
    }

    fn post_empty(&self, path: &str) -> Result<reqwest::blocking::Response, CliError> {
        Ok(self.request(Method::POST, path).send()?)
    }
}

fn print_json_response(response: reqwest::blocking::Response) -> Result<(), CliError> {
    let status = response.status();
    let text = response.text()?;
    if !status.is_success() {
        print_error_body(&text)?;
        return Err(CliError::HttpStatus(status));
    }
    let parsed: Value = serde_json::from_str(&text)?;
    write_line(std::io::stdout().lock(), &serde_json::to_string_pretty(&parsed)?)
}

/// Problem documents are pretty-printed; anything else is echoed as is.
fn print_error_body(text: &str) -> Result<(), CliError> {
    let rendered = match serde_json::from_str::<Value>(text) {
        Ok(problem) => serde_json::to_string_pretty(&problem)?,
        Err(_) => text.to_string(),
    };
    write_line(std::io::stderr().lock(), &rendered)
}

fn write_line(mut out: impl Write, text: &str) -> Result<(), CliError> {
    writeln!(out, "{text}")?;
    out.flush()?;
    Ok(())
}
