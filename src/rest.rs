/*!
datascope REST API Server

Upload a SQLite database, then browse, query and profile it over HTTP.

## Usage

```bash
datascope-rest --host 127.0.0.1 --port 8000 --upload-dir ./uploads
```

## Endpoints

- `POST /api/upload-db` - Upload a database file (multipart field `file`)
- `GET /api/schema` - Tables and columns of a session's database
- `GET /api/schema-diagram` - Mermaid ER diagram of the schema
- `GET /api/table-data` - One page of a table
- `POST /api/run-query` - Run an arbitrary SQL statement
- `POST /api/explain-query` - Query plan for a statement
- `GET /api/table-insights` - Per-column statistics of a table
- `POST /api/generate-sql` - Draft SQL from a natural-language request
- `DELETE /api/session/:session_id` - Close a session and delete its file
- `GET /api/ping`, `GET /api/health`, `GET /api/version`
*/

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use datascope::api::{Datascope, UploadResult};
use datascope::assist::{self, AssistConfig, SqlGenerator};
use datascope::execute::{QueryOutcome, TableData, MAX_PAGE_SIZE};
use datascope::insights::TableInsights;
use datascope::reader::PlanStep;
use datascope::schema::Schema;
use datascope::session::SessionManager;
use datascope::{DatascopeError, VERSION};

/// CLI arguments for the REST API server
#[derive(Parser)]
#[command(name = "datascope-rest")]
#[command(about = "datascope REST API Server")]
#[command(version = VERSION)]
struct Cli {
    /// Host address to bind to
    #[arg(long, env = "DATASCOPE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind to
    #[arg(long, env = "DATASCOPE_PORT", default_value = "8000")]
    port: u16,

    /// CORS allowed origins (comma-separated)
    #[arg(long, env = "DATASCOPE_CORS_ORIGIN", default_value = "*")]
    cors_origin: String,

    /// Directory uploaded databases are stored in
    #[arg(long, env = "DATASCOPE_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: String,

    /// Minutes of inactivity before a session expires (0 = never)
    #[arg(long, env = "DATASCOPE_SESSION_TIMEOUT_MINUTES", default_value = "60")]
    session_timeout_minutes: u64,

    /// Maximum live sessions; the least recently used is evicted (0 = unlimited)
    #[arg(long, env = "DATASCOPE_MAX_SESSIONS", default_value = "256")]
    max_sessions: usize,

    /// Maximum upload size in megabytes
    #[arg(long, env = "DATASCOPE_MAX_UPLOAD_MB", default_value = "100")]
    max_upload_mb: usize,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "DATASCOPE_LLM_BASE_URL", default_value = assist::DEFAULT_BASE_URL)]
    llm_base_url: String,

    /// Model used for SQL generation
    #[arg(long, env = "DATASCOPE_LLM_MODEL", default_value = assist::DEFAULT_MODEL)]
    llm_model: String,

    /// Timeout for SQL generation requests, in seconds
    #[arg(long, env = "DATASCOPE_LLM_TIMEOUT_SECS", default_value_t = assist::DEFAULT_TIMEOUT_SECS)]
    llm_timeout_secs: u64,

    /// API key for SQL generation; /api/generate-sql answers 503 without it
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    app: Arc<Datascope>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query string carrying only a session id
#[derive(Debug, Deserialize)]
struct SessionParams {
    session_id: String,
}

/// Query string for /api/table-insights
#[derive(Debug, Deserialize)]
struct TableParams {
    session_id: String,
    table_name: String,
}

/// Query string for /api/table-data
#[derive(Debug, Deserialize)]
struct TableDataParams {
    session_id: String,
    table_name: String,
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_page_size")]
    page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    20
}

/// Request body for /api/run-query and /api/explain-query
#[derive(Debug, Deserialize)]
struct QueryRequest {
    session_id: String,
    query: String,
}

/// Request body for /api/generate-sql
#[derive(Debug, Deserialize)]
struct GenerateSqlRequest {
    prompt: String,
    #[serde(default)]
    schema_str: String,
}

#[derive(Debug, Serialize)]
struct GenerateSqlResponse {
    sql_query: String,
}

#[derive(Debug, Serialize)]
struct DiagramResponse {
    diagram_string: String,
}

#[derive(Debug, Serialize)]
struct ExplainResponse {
    plan: Vec<PlanStep>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
struct PingResponse {
    message: String,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    sessions: usize,
}

/// Version response
#[derive(Debug, Serialize)]
struct VersionResponse {
    version: String,
    features: Vec<String>,
}

/// Error API response
#[derive(Debug, Serialize)]
struct ApiError {
    detail: String,
    #[serde(rename = "type")]
    error_type: String,
}

// ============================================================================
// Error Handling
// ============================================================================

/// Custom error type for API responses
struct ApiErrorResponse {
    status: StatusCode,
    error: ApiError,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, error_type: &str, detail: impl Into<String>) -> Self {
        ApiErrorResponse {
            status,
            error: ApiError {
                detail: detail.into(),
                error_type: error_type.to_string(),
            },
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", detail)
    }

    fn internal(detail: impl std::fmt::Display) -> Self {
        error!("{}", detail);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalError",
            "Internal server error",
        )
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let json = Json(self.error);
        (self.status, json).into_response()
    }
}

impl From<DatascopeError> for ApiErrorResponse {
    fn from(err: DatascopeError) -> Self {
        let (status, error_type) = match &err {
            DatascopeError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SessionNotFound"),
            DatascopeError::TableNotFound(_) => (StatusCode::NOT_FOUND, "TableNotFound"),
            DatascopeError::SchemaParseError(_) => (StatusCode::BAD_REQUEST, "SchemaParseError"),
            DatascopeError::QueryError(_) => (StatusCode::BAD_REQUEST, "QueryError"),
            DatascopeError::InvalidUpload(_) => (StatusCode::BAD_REQUEST, "InvalidUpload"),
            DatascopeError::AssistUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "AssistUnavailable")
            }
            DatascopeError::AssistError(_) => (StatusCode::BAD_GATEWAY, "AssistError"),
            DatascopeError::InternalError(_) => return ApiErrorResponse::internal(&err),
        };

        ApiErrorResponse::new(status, error_type, err.to_string())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Run a library call on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiErrorResponse>
where
    T: Send + 'static,
    F: FnOnce(&Datascope) -> datascope::Result<T> + Send + 'static,
{
    let app = Arc::clone(&state.app);
    tokio::task::spawn_blocking(move || f(&app))
        .await
        .map_err(|e| ApiErrorResponse::internal(format!("worker task failed: {}", e)))?
        .map_err(ApiErrorResponse::from)
}

fn validate_page(page: u64, page_size: u64) -> Result<(), ApiErrorResponse> {
    if page < 1 {
        return Err(ApiErrorResponse::bad_request("page must be at least 1"));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ApiErrorResponse::bad_request(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    Ok(())
}

fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/ping", get(ping_handler))
        .route("/api/health", get(health_handler))
        .route("/api/version", get(version_handler))
        .route("/api/upload-db", post(upload_handler))
        .route("/api/schema", get(schema_handler))
        .route("/api/schema-diagram", get(schema_diagram_handler))
        .route("/api/table-data", get(table_data_handler))
        .route("/api/run-query", post(run_query_handler))
        .route("/api/explain-query", post(explain_query_handler))
        .route("/api/table-insights", get(table_insights_handler))
        .route("/api/generate-sql", post(generate_sql_handler))
        .route("/api/session/:session_id", delete(close_session_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(state)
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    if cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    } else {
        let origins: Vec<_> = cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResult>, ApiErrorResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiErrorResponse::new(e.status(), "InvalidUpload", e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiErrorResponse::new(e.status(), "InvalidUpload", e.body_text()))?;

        info!("Received upload '{}' ({} bytes)", file_name, bytes.len());
        let result = blocking(&state, move |app| app.upload(&bytes, &file_name)).await?;
        return Ok(Json(result));
    }

    Err(ApiErrorResponse::from(DatascopeError::InvalidUpload(
        "missing multipart field 'file'".to_string(),
    )))
}

async fn schema_handler(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
) -> Result<Json<Schema>, ApiErrorResponse> {
    let schema = blocking(&state, move |app| app.schema(&params.session_id)).await?;
    Ok(Json(schema))
}

async fn schema_diagram_handler(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
) -> Result<Json<DiagramResponse>, ApiErrorResponse> {
    let diagram_string = blocking(&state, move |app| app.schema_diagram(&params.session_id)).await?;
    Ok(Json(DiagramResponse { diagram_string }))
}

async fn table_data_handler(
    State(state): State<AppState>,
    Query(params): Query<TableDataParams>,
) -> Result<Json<TableData>, ApiErrorResponse> {
    validate_page(params.page, params.page_size)?;
    let data = blocking(&state, move |app| {
        app.table_data(
            &params.session_id,
            &params.table_name,
            params.page,
            params.page_size,
        )
    })
    .await?;
    Ok(Json(data))
}

async fn run_query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, ApiErrorResponse> {
    let outcome = blocking(&state, move |app| {
        app.run_query(&request.session_id, &request.query)
    })
    .await?;
    Ok(Json(outcome))
}

async fn explain_query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<ExplainResponse>, ApiErrorResponse> {
    let plan = blocking(&state, move |app| {
        app.explain_query(&request.session_id, &request.query)
    })
    .await?;
    Ok(Json(ExplainResponse { plan }))
}

async fn table_insights_handler(
    State(state): State<AppState>,
    Query(params): Query<TableParams>,
) -> Result<Json<TableInsights>, ApiErrorResponse> {
    let insights = blocking(&state, move |app| {
        app.table_insights(&params.session_id, &params.table_name)
    })
    .await?;
    Ok(Json(insights))
}

async fn generate_sql_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateSqlRequest>,
) -> Result<Json<GenerateSqlResponse>, ApiErrorResponse> {
    let sql_query = blocking(&state, move |app| {
        app.generate_sql(&request.prompt, &request.schema_str)
    })
    .await?;
    Ok(Json(GenerateSqlResponse { sql_query }))
}

async fn close_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiErrorResponse> {
    blocking(&state, move |app| app.close_session(&session_id)).await?;
    Ok(Json(StatusResponse {
        status: "deleted".to_string(),
    }))
}

async fn ping_handler() -> Json<PingResponse> {
    Json(PingResponse {
        message: "Hello from datascope!".to_string(),
    })
}

/// GET /api/health - Health check
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
        sessions: state.app.session_count(),
    })
}

/// GET /api/version - Version information
async fn version_handler(State(state): State<AppState>) -> Json<VersionResponse> {
    let mut features = vec!["sqlite".to_string()];
    if state.app.has_generator() {
        features.push("assist".to_string());
    }

    Json(VersionResponse {
        version: VERSION.to_string(),
        features,
    })
}

/// GET / - Root endpoint
async fn root_handler() -> &'static str {
    "datascope REST API Server - See /api/health for status"
}

// ============================================================================
// Main
// ============================================================================

#[cfg(feature = "assist")]
fn sql_generator(config: &AssistConfig) -> Option<Arc<dyn SqlGenerator>> {
    match assist::OpenAiCompatibleGenerator::from_config(config) {
        Some(generator) => {
            info!(
                "SQL generation enabled ({} at {})",
                config.model, config.base_url
            );
            Some(Arc::new(generator))
        }
        None => {
            warn!("OPENAI_API_KEY not set; /api/generate-sql is disabled");
            None
        }
    }
}

#[cfg(not(feature = "assist"))]
fn sql_generator(_: &AssistConfig) -> Option<Arc<dyn SqlGenerator>> {
    warn!("Built without the assist feature; /api/generate-sql is disabled");
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datascope_rest=info,datascope=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    let store = Arc::new(SessionManager::from_minutes(
        cli.session_timeout_minutes,
        cli.max_sessions,
    ));
    let app = Datascope::new(&cli.upload_dir, store)?;

    let assist_config = AssistConfig {
        base_url: cli.llm_base_url.clone(),
        model: cli.llm_model.clone(),
        api_key: cli.openai_api_key.clone(),
        timeout: Duration::from_secs(cli.llm_timeout_secs),
    };
    let app = match sql_generator(&assist_config) {
        Some(generator) => app.with_generator(generator),
        None => app,
    };

    let state = AppState { app: Arc::new(app) };
    let max_upload_bytes = cli.max_upload_mb.saturating_mul(1024 * 1024);

    let app = build_router(state, max_upload_bytes)
        .layer(cors_layer(&cli.cors_origin))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;

    info!("Starting datascope REST API server on {}", addr);
    info!(
        "Sessions expire after {} minutes, at most {} live",
        cli.session_timeout_minutes, cli.max_sessions
    );

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
