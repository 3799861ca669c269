//! Read filters for the change log.
//!
//! A [`QueryFilter`] doubles as the cache key for list results, so it is
//! normalized (page size clamped, category lower-cased) before it is used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change_entry::normalize_category;
use super::{ChangeEntry, SubjectId};
use crate::error::ChangeLogError;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a single list call may return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filter and pagination for [`crate::service::ChangeLogService::list`].
///
/// The time range is half-open: `since <= created_at < until`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Only entries about this subject.
    pub subject: Option<SubjectId>,
    /// Only entries with this category.
    pub category: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    /// Number of matching entries to skip.
    pub offset: u32,
    /// Maximum number of entries to return.
    pub limit: u32,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            subject: None,
            category: None,
            since: None,
            until: None,
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl QueryFilter {
    /// Unrestricted filter returning the newest [`DEFAULT_PAGE_SIZE`] entries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the filter to one subject.
    #[must_use]
    pub fn subject(mut self, subject: SubjectId) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Restricts the filter to one category.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the inclusive lower time bound.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Sets the exclusive upper time bound.
    #[must_use]
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Sets offset and page size.
    #[must_use]
    pub fn page(mut self, offset: u32, limit: u32) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Returns the canonical form of this filter.
    ///
    /// Clamps `limit` to `1..=MAX_PAGE_SIZE` and normalizes the category.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeLogError::InvalidRequest`] if the category is invalid
    /// or the time range is empty (`since >= until`).
    pub fn normalized(mut self) -> Result<Self, ChangeLogError> {
        self.limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        self.category = self
            .category
            .as_deref()
            .map(normalize_category)
            .transpose()?;
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since >= until
        {
            return Err(ChangeLogError::InvalidRequest(format!(
                "empty time range: since {since} is not before until {until}"
            )));
        }
        Ok(self)
    }

    /// Returns `true` if `entry` passes the subject, category and time
    /// predicates. Pagination is not considered.
    #[must_use]
    pub fn matches(&self, entry: &ChangeEntry) -> bool {
        self.subject.as_ref().is_none_or(|s| *s == entry.subject)
            && self.category.as_ref().is_none_or(|c| *c == entry.category)
            && self.since.is_none_or(|since| entry.created_at >= since)
            && self.until.is_none_or(|until| entry.created_at < until)
    }

    /// Returns `true` if a write about `subject` can change this filter's
    /// result: either the filter names that subject or it is unrestricted.
    #[must_use]
    pub fn covers_subject(&self, subject: &SubjectId) -> bool {
        self.subject.as_ref().is_none_or(|s| s == subject)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subject(name: &str) -> SubjectId {
        let Ok(s) = SubjectId::new(name) else {
            panic!("valid subject");
        };
        s
    }

    fn entry(name: &str, category: &str, created_at: DateTime<Utc>) -> ChangeEntry {
        ChangeEntry {
            id: 1,
            subject: subject(name),
            category: category.to_string(),
            payload: serde_json::Value::Null,
            created_at,
        }
    }

    #[test]
    fn normalized_clamps_page_size() {
        let Ok(zero) = QueryFilter::new().page(0, 0).normalized() else {
            panic!("valid filter");
        };
        assert_eq!(zero.limit, 1);

        let Ok(huge) = QueryFilter::new().page(0, 5_000).normalized() else {
            panic!("valid filter");
        };
        assert_eq!(huge.limit, MAX_PAGE_SIZE);
    }

    #[test]
    fn normalized_lower_cases_category() {
        let Ok(filter) = QueryFilter::new().category("FIX").normalized() else {
            panic!("valid filter");
        };
        assert_eq!(filter.category.as_deref(), Some("fix"));
    }

    #[test]
    fn normalized_rejects_empty_range() {
        let now = Utc::now();
        let result = QueryFilter::new().since(now).until(now).normalized();
        assert!(result.is_err());
    }

    #[test]
    fn normalized_filters_compare_equal() {
        let a = QueryFilter::new().category("Fix").page(0, 500).normalized();
        let b = QueryFilter::new().category("fix").page(0, 100).normalized();
        assert_eq!(a.ok(), b.ok());
    }

    #[test]
    fn matches_applies_all_predicates() {
        let now = Utc::now();
        let filter = QueryFilter::new()
            .subject(subject("steve"))
            .category("fix")
            .since(now - Duration::minutes(5))
            .until(now);

        assert!(filter.matches(&entry("steve", "fix", now - Duration::minutes(1))));
        assert!(!filter.matches(&entry("alex", "fix", now - Duration::minutes(1))));
        assert!(!filter.matches(&entry("steve", "added", now - Duration::minutes(1))));
        assert!(!filter.matches(&entry("steve", "fix", now)));
        assert!(!filter.matches(&entry("steve", "fix", now - Duration::minutes(10))));
    }

    #[test]
    fn covers_subject_includes_unrestricted_filters() {
        let steve = subject("steve");
        assert!(QueryFilter::new().covers_subject(&steve));
        assert!(QueryFilter::new().subject(steve.clone()).covers_subject(&steve));
        assert!(!QueryFilter::new().subject(subject("alex")).covers_subject(&steve));
    }
}
