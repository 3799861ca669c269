//! Change entries: the immutable records of the change log.

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::SubjectId;
use crate::error::ChangeLogError;

/// Maximum length of a category tag, in characters.
pub const MAX_CATEGORY_LEN: usize = 32;

/// Maximum serialized size of an entry payload, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024;

/// Longest retention window, in days, accepted for pruning.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// One persisted change-log record.
///
/// Entries are never mutated after the store assigns their `id`; the only
/// way an entry disappears is the retention prune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Store-assigned identifier, increasing in append order.
    pub id: i64,
    /// Entity the change is about.
    pub subject: SubjectId,
    /// Lower-case category/action tag (e.g. `"added"`, `"fix"`).
    pub category: String,
    /// Free-text or structured payload.
    pub payload: serde_json::Value,
    /// Creation time, UTC with millisecond precision.
    pub created_at: DateTime<Utc>,
}

/// A validated entry that has not been written yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewChangeEntry {
    /// Entity the change is about.
    pub subject: SubjectId,
    /// Normalized category tag.
    pub category: String,
    /// Entry payload.
    pub payload: serde_json::Value,
    /// Creation time, truncated to milliseconds.
    pub created_at: DateTime<Utc>,
}

impl NewChangeEntry {
    /// Validates the inputs and stamps the entry with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeLogError::InvalidRequest`] if the category or payload
    /// is rejected by [`normalize_category`] or [`validate_payload`].
    pub fn new(
        subject: SubjectId,
        category: &str,
        payload: serde_json::Value,
    ) -> Result<Self, ChangeLogError> {
        Self::at(subject, category, payload, Utc::now())
    }

    /// Like [`NewChangeEntry::new`] with an explicit creation time.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeLogError::InvalidRequest`] on invalid category or
    /// payload.
    pub fn at(
        subject: SubjectId,
        category: &str,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ChangeLogError> {
        let category = normalize_category(category)?;
        validate_payload(&payload)?;
        Ok(Self {
            subject,
            category,
            payload,
            created_at: created_at.trunc_subsecs(3),
        })
    }

    /// Attaches the store-assigned identifier.
    #[must_use]
    pub fn into_entry(self, id: i64) -> ChangeEntry {
        ChangeEntry {
            id,
            subject: self.subject,
            category: self.category,
            payload: self.payload,
            created_at: self.created_at,
        }
    }
}

/// Lower-cases and validates a category tag.
///
/// # Errors
///
/// Returns [`ChangeLogError::InvalidRequest`] if the tag is empty, longer
/// than [`MAX_CATEGORY_LEN`], or contains characters outside `[a-z0-9_-]`.
pub fn normalize_category(raw: &str) -> Result<String, ChangeLogError> {
    let category = raw.trim().to_ascii_lowercase();
    if category.is_empty() {
        return Err(ChangeLogError::InvalidRequest(
            "category must not be empty".to_string(),
        ));
    }
    if category.len() > MAX_CATEGORY_LEN {
        return Err(ChangeLogError::InvalidRequest(format!(
            "category must be at most {MAX_CATEGORY_LEN} characters"
        )));
    }
    if !category
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(ChangeLogError::InvalidRequest(format!(
            "category `{category}` may only contain a-z, 0-9, '_' and '-'"
        )));
    }
    Ok(category)
}

/// Rejects payloads whose JSON encoding exceeds [`MAX_PAYLOAD_BYTES`].
///
/// # Errors
///
/// Returns [`ChangeLogError::InvalidRequest`] for oversized payloads.
pub fn validate_payload(payload: &serde_json::Value) -> Result<(), ChangeLogError> {
    let size = serde_json::to_vec(payload)
        .map_err(|e| ChangeLogError::InvalidRequest(format!("payload is not encodable: {e}")))?
        .len();
    if size > MAX_PAYLOAD_BYTES {
        return Err(ChangeLogError::InvalidRequest(format!(
            "payload is {size} bytes, limit is {MAX_PAYLOAD_BYTES}"
        )));
    }
    Ok(())
}

/// The instant `days` days before `now`; entries created before it are
/// due for pruning.
///
/// # Errors
///
/// Returns [`ChangeLogError::InvalidRequest`] if `days` is zero or above
/// [`MAX_RETENTION_DAYS`].
pub fn retention_cutoff(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, ChangeLogError> {
    if days == 0 || days > MAX_RETENTION_DAYS {
        return Err(ChangeLogError::InvalidRequest(format!(
            "retention must be between 1 and {MAX_RETENTION_DAYS} days, got {days}"
        )));
    }
    TimeDelta::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            ChangeLogError::InvalidRequest(format!("retention of {days} days is out of range"))
        })
}
