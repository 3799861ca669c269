//! Change-entry DTOs for record, list and reader endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::{PaginationMeta, default_page, default_per_page};
use crate::domain::ChangeEntry;

/// Request body for `POST /changes`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordChangeRequest {
    /// Entity the change is about.
    pub subject: String,
    /// Category tag, e.g. `added`, `fix`, `removed`.
    pub category: String,
    /// Free text or structured JSON describing the change.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

/// A persisted change entry.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChangeEntryDto {
    /// Store-assigned identifier.
    pub id: i64,
    /// Entity the change is about.
    pub subject: String,
    /// Lower-case category tag.
    pub category: String,
    /// Entry payload.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Creation time (UTC, millisecond precision).
    pub created_at: DateTime<Utc>,
}

impl From<ChangeEntry> for ChangeEntryDto {
    fn from(entry: ChangeEntry) -> Self {
        Self {
            id: entry.id,
            subject: entry.subject.into(),
            category: entry.category,
            payload: entry.payload,
            created_at: entry.created_at,
        }
    }
}

/// Query parameters for `GET /changes`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListChangesParams {
    /// Only entries about this subject.
    pub subject: Option<String>,
    /// Only entries in this category.
    pub category: Option<String>,
    /// Inclusive lower bound on creation time (RFC 3339).
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation time (RFC 3339).
    pub until: Option<DateTime<Utc>>,
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Response body for `GET /changes`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChangeListResponse {
    /// Entries, newest first.
    pub data: Vec<ChangeEntryDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Response body for `PUT /readers/{reader}/seen`.
#[derive(Debug, Serialize, ToSchema)]
pub struct MarkSeenResponse {
    /// Reader identifier.
    pub reader: String,
    /// Stored last-seen time.
    pub seen_at: DateTime<Utc>,
}

/// Query parameters for `GET /readers/{reader}/unseen`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UnseenParams {
    /// Only count entries in this category.
    pub category: Option<String>,
}

/// Response body for `GET /readers/{reader}/unseen`.
#[derive(Debug, Serialize, ToSchema)]
pub struct UnseenResponse {
    /// Reader identifier.
    pub reader: String,
    /// Category the count is restricted to, if any.
    pub category: Option<String>,
    /// Entries created since the reader last looked.
    pub unseen: u64,
}

/// Request body for `POST /admin/prune`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PruneRequest {
    /// Delete entries older than this many days. Must be at least 1.
    pub older_than_days: u32,
}

/// Response body for `POST /admin/prune`.
#[derive(Debug, Serialize, ToSchema)]
pub struct PruneResponse {
    /// Entries deleted.
    pub removed: u64,
    /// Entries created before this instant were deleted.
    pub cutoff: DateTime<Utc>,
}
