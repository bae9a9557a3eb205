//! HTTP API for submitting repositories and reading generated documentation.
//!
//! Every project route is scoped to the caller identified by the
//! `x-user-id` header. Authentication itself happens upstream.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/projects` | Submit a git URL (`{"source_url", "source_kind"?, "name"?}`) |
//! | `POST` | `/projects/upload` | Submit a zip archive (multipart field `archive`, optional `name`) |
//! | `GET`  | `/projects` | The caller's projects, newest first |
//! | `GET`  | `/projects/{id}` | One project with status and artifacts |
//!
//! Both submit routes answer `202 Accepted` with the `pending` project as
//! soon as the record exists; the pipeline keeps running in the background.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "project not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::acquire::is_remote_git_url;
use crate::config::Config;
use crate::error::PipelineError;
use crate::get::{get_project_detail, list_owner_projects};
use crate::models::{Project, ProjectDetail, ProjectSummary, SourceKind, Submission};
use crate::pipeline::Orchestrator;
use crate::store::sqlite::SqliteStore;
use crate::sweep::{spawn_periodic, Sweeper};

/// Header carrying the authenticated caller's id.
pub const OWNER_HEADER: &str = "x-user-id";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    /// Staging directory for uploaded archives.
    uploads_dir: Arc<PathBuf>,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            orchestrator,
            uploads_dir: Arc::new(uploads_dir.into()),
            max_upload_bytes: 200 * 1024 * 1024,
        }
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }
}

/// Build the application router. CORS permits any origin.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/health", get(handle_health))
        .route("/projects", post(handle_submit).get(handle_list))
        .route("/projects/upload", post(handle_upload).layer(upload_limit))
        .route("/projects/{id}", get(handle_get))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Opens the database, fails any run a previous process left unfinished,
/// starts the periodic retention sweeper (unless disabled), then serves
/// until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let orchestrator = Orchestrator::from_config(config, store);

    let interrupted = orchestrator.fail_interrupted().await?;
    if interrupted > 0 {
        tracing::warn!(count = interrupted, "marked interrupted runs as failed");
    }

    let uploads_dir = config.storage.uploads_dir();
    tokio::fs::create_dir_all(&uploads_dir).await?;
    tokio::fs::create_dir_all(&config.storage.repos_root).await?;

    let sweeper = if config.storage.sweep_interval_secs > 0 {
        let sweeper = Sweeper::new(&config.storage.repos_root, config.storage.retention());
        Some(spawn_periodic(
            sweeper,
            Duration::from_secs(config.storage.sweep_interval_secs),
        ))
    } else {
        None
    };

    let state = AppState::new(orchestrator, uploads_dir)
        .with_max_upload_bytes(config.server.max_upload_mb.saturating_mul(1024 * 1024));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("repodoc server listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(task) = sweeper {
        task.abort();
    }
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::AlreadyRunning(_) => conflict(err.to_string()),
            other => {
                tracing::error!("request failed: {}", other);
                internal(other.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("request failed: {:#}", err);
        internal(format!("{:#}", err))
    }
}

fn owner_from(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| bad_request(format!("missing {} header", OWNER_HEADER)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /projects ============

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    source_url: String,
    #[serde(default)]
    source_kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

async fn handle_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let owner = owner_from(&headers)?;
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;

    let url = req.source_url.trim();
    if url.is_empty() {
        return Err(bad_request("source_url must not be empty"));
    }
    if !is_remote_git_url(url) {
        return Err(bad_request(
            "source_url must be a remote git URL (https, ssh, git or user@host:path)",
        ));
    }
    if let Some(kind) = req.source_kind.as_deref() {
        match kind.parse::<SourceKind>() {
            Ok(SourceKind::Git) => {}
            Ok(SourceKind::Archive) => {
                return Err(bad_request("archives must be uploaded to /projects/upload"))
            }
            Err(e) => return Err(bad_request(e.to_string())),
        }
    }

    let mut submission = Submission::git(url);
    submission.name = clean_name(req.name);

    let project = state.orchestrator.submit(&owner, submission).await?;
    Ok((StatusCode::ACCEPTED, Json(project)))
}

// ============ POST /projects/upload ============

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let owner = owner_from(&headers)?;

    let mut staged: Option<(PathBuf, String)> = None;
    let mut name: Option<String> = None;

    let result: Result<(), AppError> = async {
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(e.body_text()))?
        {
            let field_name = field.name().map(str::to_string);
            match field_name.as_deref() {
                Some("archive") => {
                    if staged.is_some() {
                        return Err(bad_request("only one archive per request"));
                    }
                    let file_name = field
                        .file_name()
                        .and_then(|f| FsPath::new(f).file_name())
                        .map(|f| f.to_string_lossy().to_string())
                        .filter(|f| !f.is_empty())
                        .unwrap_or_else(|| "upload.zip".to_string());

                    tokio::fs::create_dir_all(state.uploads_dir.as_ref())
                        .await
                        .map_err(|e| internal(format!("cannot create upload dir: {}", e)))?;
                    let path = state.uploads_dir.join(format!("{}.zip", Uuid::new_v4()));
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .map_err(|e| internal(format!("cannot stage upload: {}", e)))?;
                    staged = Some((path, file_name));

                    let mut written = 0usize;
                    while let Some(chunk) = field
                        .chunk()
                        .await
                        .map_err(|e| bad_request(e.body_text()))?
                    {
                        written += chunk.len();
                        file.write_all(&chunk)
                            .await
                            .map_err(|e| internal(format!("cannot stage upload: {}", e)))?;
                    }
                    file.flush()
                        .await
                        .map_err(|e| internal(format!("cannot stage upload: {}", e)))?;
                    if written == 0 {
                        return Err(bad_request("archive is empty"));
                    }
                }
                Some("name") => {
                    let text = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                    name = clean_name(Some(text));
                }
                _ => {}
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        if let Some((path, _)) = &staged {
            let _ = tokio::fs::remove_file(path).await;
        }
        return Err(e);
    }

    let (path, file_name) = staged.ok_or_else(|| bad_request("missing multipart field 'archive'"))?;
    let mut submission = Submission::archive(&path, file_name);
    submission.name = name;

    match state.orchestrator.submit(&owner, submission).await {
        Ok(project) => Ok((StatusCode::ACCEPTED, Json(project))),
        Err(e) => {
            let _ = tokio::fs::remove_file(&path).await;
            Err(e.into())
        }
    }
}

fn clean_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

// ============ GET /projects ============

#[derive(Serialize)]
struct ProjectListResponse {
    projects: Vec<ProjectSummary>,
}

async fn handle_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProjectListResponse>, AppError> {
    let owner = owner_from(&headers)?;
    let projects = list_owner_projects(state.orchestrator.store().as_ref(), &owner).await?;
    Ok(Json(ProjectListResponse { projects }))
}

// ============ GET /projects/{id} ============

async fn handle_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ProjectDetail>, AppError> {
    let owner = owner_from(&headers)?;
    let detail = get_project_detail(state.orchestrator.store().as_ref(), &id, Some(&owner))
        .await?
        .ok_or_else(|| not_found(format!("project not found: {}", id)))?;
    Ok(Json(detail))
}
