//! Change-entry handlers: record and list.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{
    ChangeEntryDto, ChangeListResponse, ListChangesParams, PaginationMeta, RecordChangeRequest,
    page_window,
};
use crate::app_state::AppState;
use crate::domain::{QueryFilter, SubjectId};
use crate::error::{ChangeLogError, ErrorResponse};

/// `POST /changes`: Record a change entry.
///
/// # Errors
///
/// Returns [`ChangeLogError`] on invalid input or store failure.
#[utoipa::path(
    post,
    path = "/api/v1/changes",
    tag = "Changes",
    summary = "Record a change",
    description = "Validates and durably stores a change entry, then announces it to subscribers.",
    request_body = RecordChangeRequest,
    responses(
        (status = 201, description = "Entry recorded", body = ChangeEntryDto),
        (status = 400, description = "Invalid subject, category or payload", body = ErrorResponse),
        (status = 503, description = "Store temporarily unavailable", body = ErrorResponse),
    )
)]
pub async fn record_change(
    State(state): State<AppState>,
    Json(req): Json<RecordChangeRequest>,
) -> Result<impl IntoResponse, ChangeLogError> {
    let subject = SubjectId::new(req.subject)?;
    let entry = state
        .service
        .record(subject, &req.category, req.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ChangeEntryDto::from(entry))))
}

/// `GET /changes`: List change entries, newest first.
///
/// # Errors
///
/// Returns [`ChangeLogError`] on invalid filters or store failure.
#[utoipa::path(
    get,
    path = "/api/v1/changes",
    tag = "Changes",
    summary = "List changes",
    description = "Returns a page of entries matching the optional subject, category and time filters, newest first.",
    params(ListChangesParams),
    responses(
        (status = 200, description = "Page of entries", body = ChangeListResponse),
        (status = 400, description = "Invalid filter", body = ErrorResponse),
        (status = 503, description = "Store temporarily unavailable", body = ErrorResponse),
    )
)]
pub async fn list_changes(
    State(state): State<AppState>,
    Query(params): Query<ListChangesParams>,
) -> Result<impl IntoResponse, ChangeLogError> {
    let (page, per_page, offset) = page_window(params.page, params.per_page);

    let mut filter = QueryFilter::new().page(offset, per_page);
    if let Some(subject) = params.subject {
        filter = filter.subject(SubjectId::new(subject)?);
    }
    if let Some(category) = params.category {
        filter = filter.category(category);
    }
    if let Some(since) = params.since {
        filter = filter.since(since);
    }
    if let Some(until) = params.until {
        filter = filter.until(until);
    }

    let entries = state.service.list(filter).await?;
    let pagination = PaginationMeta::new(page, per_page, entries.len());
    let data = entries.into_iter().map(ChangeEntryDto::from).collect();

    Ok((StatusCode::OK, Json(ChangeListResponse { data, pagination })))
}

/// Change routes mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/changes", post(record_change).get(list_changes))
}
