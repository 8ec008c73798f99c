use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::archiver::{ArchiveContent, ConvertOutcome};
use crate::db::{count_records_by_status, ArchiveRecord};
use crate::error::ArchiveError;
use crate::store::StoreError;

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/stats", get(stats))
        .route("/api/archives", get(list_archives))
        .route("/api/archives/convert", post(convert))
        .route("/api/archives/:id", get(archive_detail).delete(delete_archive))
        .route("/api/archives/:id/content", get(archive_content))
        .route("/api/archives/:id/retry", post(retry_archive))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// JSON error response for an [`ArchiveError`].
struct ApiError(ArchiveError);

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        Self(err)
    }
}

fn status_for(err: &ArchiveError) -> StatusCode {
    match err {
        ArchiveError::Validation(_) => StatusCode::BAD_REQUEST,
        ArchiveError::NotFound(_) => StatusCode::NOT_FOUND,
        ArchiveError::NotComplete { .. } | ArchiveError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        ArchiveError::Fetch { .. } => StatusCode::BAD_GATEWAY,
        ArchiveError::Cancelled(_) => StatusCode::GATEWAY_TIMEOUT,
        ArchiveError::Storage { .. } | ArchiveError::Integrity { .. } | ArchiveError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct ConvertRequest {
    url: String,
}

async fn convert(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> ApiResult<ConvertOutcome> {
    Ok(Json(state.archiver.convert(&request.url).await?))
}

/// Active record counts keyed by status.
async fn stats(State(state): State<AppState>) -> ApiResult<BTreeMap<String, i64>> {
    let counts = count_records_by_status(state.db.pool())
        .await
        .map_err(|e| ArchiveError::Store(StoreError::Backend(e)))?;
    Ok(Json(counts.into_iter().collect()))
}

async fn list_archives(State(state): State<AppState>) -> ApiResult<Vec<ArchiveRecord>> {
    let records = state
        .db
        .list_active_records()
        .await
        .map_err(ArchiveError::from)?;
    Ok(Json(records))
}

async fn archive_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ArchiveRecord> {
    Ok(Json(state.archiver.record(id).await?))
}

async fn archive_content(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ArchiveContent> {
    Ok(Json(state.archiver.content(id).await?))
}

async fn retry_archive(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ConvertOutcome> {
    Ok(Json(state.archiver.retry(id).await?))
}

async fn delete_archive(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .db
        .delete_record(id)
        .await
        .map_err(ArchiveError::from)?;
    tracing::info!(record_id = id, "Archive deleted");
    Ok(StatusCode::NO_CONTENT)
}
