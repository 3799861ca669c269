//! Reader handlers: last-seen tracking and unseen counts.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};

use crate::api::dto::{MarkSeenResponse, UnseenParams, UnseenResponse};
use crate::app_state::AppState;
use crate::domain::SubjectId;
use crate::error::{ChangeLogError, ErrorResponse};

/// `PUT /readers/{reader}/seen`: Mark the change log as seen now.
///
/// # Errors
///
/// Returns [`ChangeLogError`] on an invalid reader or store failure.
#[utoipa::path(
    put,
    path = "/api/v1/readers/{reader}/seen",
    tag = "Readers",
    summary = "Mark change log as seen",
    params(("reader" = String, Path, description = "Reader identifier")),
    responses(
        (status = 200, description = "Last-seen time stored", body = MarkSeenResponse),
        (status = 400, description = "Invalid reader", body = ErrorResponse),
        (status = 503, description = "Store temporarily unavailable", body = ErrorResponse),
    )
)]
pub async fn mark_seen(
    State(state): State<AppState>,
    Path(reader): Path<String>,
) -> Result<impl IntoResponse, ChangeLogError> {
    let reader = SubjectId::new(reader)?;
    let seen_at = state.service.mark_seen(&reader).await?;
    Ok((
        StatusCode::OK,
        Json(MarkSeenResponse {
            reader: reader.into(),
            seen_at,
        }),
    ))
}

/// `GET /readers/{reader}/unseen`: Count entries the reader has not seen.
///
/// # Errors
///
/// Returns [`ChangeLogError`] on invalid input or store failure.
#[utoipa::path(
    get,
    path = "/api/v1/readers/{reader}/unseen",
    tag = "Readers",
    summary = "Count unseen entries",
    description = "Counts entries created after the reader last marked the log as seen. A reader who never did sees every entry.",
    params(
        ("reader" = String, Path, description = "Reader identifier"),
        UnseenParams,
    ),
    responses(
        (status = 200, description = "Unseen count", body = UnseenResponse),
        (status = 400, description = "Invalid reader or category", body = ErrorResponse),
        (status = 503, description = "Store temporarily unavailable", body = ErrorResponse),
    )
)]
pub async fn unseen_count(
    State(state): State<AppState>,
    Path(reader): Path<String>,
    Query(params): Query<UnseenParams>,
) -> Result<impl IntoResponse, ChangeLogError> {
    let reader = SubjectId::new(reader)?;
    let unseen = state
        .service
        .unseen_count(&reader, params.category.as_deref())
        .await?;
    Ok((
        StatusCode::OK,
        Json(UnseenResponse {
            reader: reader.into(),
            category: params.category.map(|c| c.trim().to_ascii_lowercase()),
            unseen,
        }),
    ))
}

/// Reader routes mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/readers/{reader}/seen", put(mark_seen))
        .route("/readers/{reader}/unseen", get(unseen_count))
}
