//! System endpoints: health check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Connection pool occupancy.
#[derive(Debug, Serialize, ToSchema)]
struct PoolHealth {
    connections: u32,
    idle_connections: u32,
    max_size: u32,
}

/// Entry cache counters.
#[derive(Debug, Serialize, ToSchema)]
struct CacheHealth {
    entries: usize,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    pool: PoolHealth,
    cache: CacheHealth,
}

/// `GET /health`: Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health, version, connection pool occupancy and cache counters.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is shutting down", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.service.pool_state();
    let cache = state.service.cache_stats().await;
    let (status_code, status) = if pool.closed {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "healthy")
    };
    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pool: PoolHealth {
                connections: pool.connections,
                idle_connections: pool.idle_connections,
                max_size: pool.max_size,
            },
            cache: CacheHealth {
                entries: cache.entries,
                capacity: cache.capacity,
                hits: cache.hits,
                misses: cache.misses,
                evictions: cache.evictions,
                expirations: cache.expirations,
            },
        }),
    )
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
