//! Administrative handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{PruneRequest, PruneResponse};
use crate::app_state::AppState;
use crate::domain::retention_cutoff;
use crate::error::{ChangeLogError, ErrorResponse};

/// `POST /admin/prune`: Delete old entries now.
///
/// # Errors
///
/// Returns [`ChangeLogError::InvalidRequest`] unless `older_than_days` is
/// within `1..=36500`, and store errors otherwise.
#[utoipa::path(
    post,
    path = "/api/v1/admin/prune",
    tag = "Admin",
    summary = "Prune old entries",
    description = "Deletes entries older than the given number of days and clears the list cache.",
    request_body = PruneRequest,
    responses(
        (status = 200, description = "Prune finished", body = PruneResponse),
        (status = 400, description = "Invalid retention", body = ErrorResponse),
        (status = 503, description = "Store temporarily unavailable", body = ErrorResponse),
    )
)]
pub async fn prune(
    State(state): State<AppState>,
    Json(req): Json<PruneRequest>,
) -> Result<impl IntoResponse, ChangeLogError> {
    let cutoff = retention_cutoff(Utc::now(), req.older_than_days)?;
    let removed = state.service.prune_older_than(cutoff).await?;
    Ok((StatusCode::OK, Json(PruneResponse { removed, cutoff })))
}

/// Admin routes mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/admin/prune", post(prune))
}
