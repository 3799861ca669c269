//! Shared application state injected into all Axum handlers.

use crate::service::ChangeLogService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Change-log service for all business logic.
    pub service: ChangeLogService,
}
