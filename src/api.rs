//! HTTP surface for the policy service.
//!
//! - `POST /api/upload` – Multipart upload of a single PDF, DOCX, or TXT file (field `file`).
//!   The document is chunked, embedded, and written as the new index, replacing the old one.
//! - `POST /api/ask` – `{"question": "...", "context": {...}|null}`; answers from the current
//!   index and echoes `context` back unchanged.
//! - `GET /api/status` – Whether an index exists and which document it was built from.
//! - `GET /metrics` – Upload and answer counters.
//!
//! Errors are returned as `{"detail": "..."}` with 400 for caller mistakes (unsupported file,
//! missing upload, blank question, asking before any upload) and 500 for everything else.

use crate::index::{IndexError, IndexManifest};
use crate::metrics::MetricsSnapshot;
use crate::processing::{AskError, IngestError, PolicyApi, UploadedDocument};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

const UPLOAD_FIELD: &str = "file";

/// Build the HTTP router exposing the upload and ask endpoints.
pub fn create_router<S>(service: Arc<S>, max_upload_bytes: usize) -> Router
where
    S: PolicyApi + 'static,
{
    Router::new()
        .route(
            "/api/upload",
            post(upload_document::<S>).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/ask", post(ask_question::<S>))
        .route("/api/status", get(index_status::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Success response for `POST /api/upload`.
#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    /// Identifier of the index version created by this upload.
    index_id: String,
    chunks_indexed: usize,
}

/// Accept a single document and rebuild the index from it.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError>
where
    S: PolicyApi,
{
    let upload = read_upload(multipart).await?;
    tracing::info!(file = %upload.filename, bytes = upload.bytes.len(), "Upload received");
    let outcome = service.ingest_document(upload).await?;
    Ok(Json(UploadResponse {
        message: "Policy document processed successfully",
        index_id: outcome.index_id,
        chunks_indexed: outcome.chunk_count,
    }))
}

/// Pick the `file` field, falling back to the first field that carries a file name.
async fn read_upload(mut multipart: Multipart) -> Result<UploadedDocument, ApiError> {
    let mut fallback = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let is_named_field = field.name() == Some(UPLOAD_FIELD);
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if !is_named_field && fallback.is_some() {
            continue;
        }
        let bytes = field.bytes().await.map_err(multipart_error)?;
        let upload = UploadedDocument {
            filename,
            bytes: bytes.to_vec(),
        };
        if is_named_field {
            return Ok(upload);
        }
        fallback = Some(upload);
    }
    fallback.ok_or_else(|| ApiError::bad_request("No file provided"))
}

fn multipart_error(error: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::new(error.status(), error.body_text())
}

/// Request body for `POST /api/ask`.
#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    context: Option<Map<String, Value>>,
}

fn json_error(rejection: JsonRejection) -> ApiError {
    ApiError::new(rejection.status(), rejection.body_text())
}

/// Response body for `POST /api/ask`.
#[derive(Serialize)]
struct AskResponse {
    answer: String,
    sources: Vec<String>,
    context: Option<Map<String, Value>>,
}

/// Answer a question from the current index.
async fn ask_question<S>(
    State(service): State<Arc<S>>,
    request: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ApiError>
where
    S: PolicyApi,
{
    let Json(AskRequest { question, context }) = request.map_err(json_error)?;
    let answer = service.answer_question(&question).await?;
    Ok(Json(AskResponse {
        answer: answer.answer,
        sources: answer.sources,
        context,
    }))
}

/// Response body for `GET /api/status`.
#[derive(Serialize)]
struct StatusResponse {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<IndexManifest>,
}

async fn index_status<S>(State(service): State<Arc<S>>) -> Result<Json<StatusResponse>, ApiError>
where
    S: PolicyApi,
{
    let status = service.index_status().await?;
    Ok(Json(StatusResponse {
        ready: status.manifest.is_some(),
        index: status.manifest,
    }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: PolicyApi,
{
    Json(service.metrics_snapshot())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, detail = %self.detail, "Request failed");
        } else {
            tracing::warn!(status = %self.status, detail = %self.detail, "Request rejected");
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(inner: IngestError) -> Self {
        if inner.is_client_error() {
            Self::bad_request(inner.to_string())
        } else {
            Self::internal(inner.to_string())
        }
    }
}

impl From<AskError> for ApiError {
    fn from(inner: AskError) -> Self {
        if inner.is_client_error() {
            Self::bad_request(inner.to_string())
        } else {
            Self::internal(inner.to_string())
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(inner: IndexError) -> Self {
        Self::internal(inner.to_string())
    }
}
