//! Shared DTO types used across multiple endpoints.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::query_filter::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginationMeta {
    /// Current page number (1-indexed).
    pub page: u32,
    /// Items per page after clamping.
    pub per_page: u32,
    /// Items on this page.
    pub returned: u32,
    /// Next page number, present when this page was full.
    pub next_page: Option<u32>,
}

impl PaginationMeta {
    /// Metadata for a page of `returned` items.
    #[must_use]
    pub fn new(page: u32, per_page: u32, returned: usize) -> Self {
        let returned = u32::try_from(returned).unwrap_or(u32::MAX);
        Self {
            page,
            per_page,
            returned,
            next_page: (returned >= per_page).then(|| page.saturating_add(1)),
        }
    }
}

pub(crate) fn default_page() -> u32 {
    1
}

pub(crate) fn default_per_page() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Clamps 1-indexed `page` / `per_page` and converts them to an offset and
/// limit.
#[must_use]
pub fn page_window(page: u32, per_page: u32) -> (u32, u32, u32) {
    let page = page.max(1);
    let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(per_page);
    (page, per_page, offset)
}
