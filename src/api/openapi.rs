//! OpenAPI document for the REST surface.

use utoipa::OpenApi;

use super::handlers;

/// OpenAPI description of every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "changelog-book",
        description = "Durable change-log recording and querying with a pooled store and TTL cache."
    ),
    paths(
        handlers::changes::record_change,
        handlers::changes::list_changes,
        handlers::readers::mark_seen,
        handlers::readers::unseen_count,
        handlers::admin::prune,
        handlers::system::health_handler,
    ),
    tags(
        (name = "Changes", description = "Record and list change entries"),
        (name = "Readers", description = "Per-reader last-seen tracking"),
        (name = "Admin", description = "Retention management"),
        (name = "System", description = "Health and introspection"),
    )
)]
pub struct ApiDoc;
