//! JSON HTTP API over the [`Orchestrator`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/documents` | List documents in upload order |
//! | `POST` | `/documents?name=<file name>` | Upload raw file bytes (201) |
//! | `GET`  | `/documents/{id}` | One document with its status |
//! | `DELETE` | `/documents/{id}` | Remove a document and its chunks |
//! | `POST` | `/documents/{id}/reindex` | Run ingestion again (202) |
//! | `POST` | `/sessions` | Start a study session (201) |
//! | `GET`  | `/sessions/{id}/messages` | Messages of a session |
//! | `POST` | `/sessions/{id}/questions` | Ask `{ "text": "..." }` |
//! | `GET`  | `/stats` | Study progress and recommended actions |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unsupported_type", "message": "unsupported file type: .exe" } }
//! ```
//!
//! Error codes: `bad_request` (400), `empty_question` (400), `not_found` (404),
//! `turn_in_progress` (409), `size_exceeded` (413), `unsupported_type` (415),
//! `extraction_failed` (500), `indexing_failed` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can call the API directly.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use study_companion_core::models::{ChatMessage, Document, DocumentId};

use crate::error::StudyError;
use crate::orchestrator::{ChatTurnResult, Orchestrator};
use crate::session::SessionView;
use crate::stats::StudyStats;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Build the API router. Exposed separately from [`run_server`] so tests can
/// drive it in-process.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents", get(handle_list_documents).post(handle_upload))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_remove_document),
        )
        .route("/documents/{id}/reindex", post(handle_reindex))
        .route("/sessions", post(handle_create_session))
        .route("/sessions/{id}/messages", get(handle_messages))
        .route("/sessions/{id}/questions", post(handle_question))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Start the HTTP server on `[server].bind` and serve until the process is
/// terminated.
pub async fn run_server(orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let bind_addr = orchestrator.config().server.bind.clone();
    let app = router(orchestrator);

    info!(bind = %bind_addr, "study companion listening");
    println!("Study companion listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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

impl From<StudyError> for AppError {
    fn from(err: StudyError) -> Self {
        let status = match &err {
            StudyError::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            StudyError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            StudyError::NotFound(_) => StatusCode::NOT_FOUND,
            StudyError::TurnInProgress => StatusCode::CONFLICT,
            StudyError::EmptyQuestion => StatusCode::BAD_REQUEST,
            StudyError::ExtractionFailed { .. } | StudyError::IndexingFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn parse_document_id(raw: &str) -> Result<DocumentId, AppError> {
    raw.parse()
        .map_err(|_| StudyError::NotFound(format!("document {}", raw)).into())
}

fn parse_session_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| StudyError::NotFound(format!("session {}", raw)).into())
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

// ============ Documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<Document>,
}

async fn handle_list_documents(State(state): State<AppState>) -> Json<DocumentListResponse> {
    Json(DocumentListResponse {
        documents: state.orchestrator.list_documents(),
    })
}

#[derive(Deserialize)]
struct UploadParams {
    name: Option<String>,
}

/// `POST /documents?name=notes.pdf` with the raw file as the body.
///
/// A declared `Content-Length` over the limit is rejected before the body
/// is read; otherwise at most one byte past the limit is buffered.
async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let name = params
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| bad_request("query parameter `name` is required"))?;

    let limit = state.orchestrator.config().upload.max_upload_bytes;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(size) = declared.filter(|size| *size > limit) {
        return Err(StudyError::SizeExceeded { size, limit }.into());
    }

    let read_limit = usize::try_from(limit.saturating_add(1)).unwrap_or(usize::MAX);
    let bytes = axum::body::to_bytes(body, read_limit)
        .await
        .map_err(|_| StudyError::SizeExceeded {
            size: declared.unwrap_or(limit.saturating_add(1)),
            limit,
        })?;

    let size = declared.unwrap_or(bytes.len() as u64);
    let document = state
        .orchestrator
        .submit_document(bytes.to_vec(), &name, size)?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let id = parse_document_id(&id)?;
    Ok(Json(state.orchestrator.get_document(id)?))
}

async fn handle_remove_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let id = parse_document_id(&id)?;
    Ok(Json(state.orchestrator.remove_document(id).await?))
}

async fn handle_reindex(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let id = parse_document_id(&id)?;
    let document = state.orchestrator.reindex_document(id)?;
    Ok((StatusCode::ACCEPTED, Json(document)))
}

// ============ Sessions ============

async fn handle_create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    (StatusCode::CREATED, Json(state.orchestrator.create_session()))
}

#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<ChatMessage>,
}

async fn handle_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, AppError> {
    let id = parse_session_id(&id)?;
    Ok(Json(MessagesResponse {
        messages: state.orchestrator.messages(id)?,
    }))
}

#[derive(Deserialize)]
struct QuestionRequest {
    text: String,
}

async fn handle_question(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<ChatTurnResult>, AppError> {
    let id = parse_session_id(&id)?;
    let Json(request) = request.map_err(|e| bad_request(e.body_text()))?;
    Ok(Json(state.orchestrator.submit_question(id, &request.text).await?))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Json<StudyStats> {
    Json(state.orchestrator.stats().await)
}
