//! Row shapes of the change-log tables.

use chrono::{DateTime, Utc};

use super::BackendError;
use crate::domain::{ChangeEntry, SubjectId};

/// A row of `change_entries` as selected by the PostgreSQL backend:
/// `(id, subject_id, category, payload, created_at)`.
pub type EntryRow = (i64, String, String, serde_json::Value, DateTime<Utc>);

/// Converts a selected row back into a [`ChangeEntry`].
///
/// # Errors
///
/// Returns [`BackendError::Corrupt`] if the stored subject is no longer a
/// valid [`SubjectId`].
pub fn entry_from_row(row: EntryRow) -> Result<ChangeEntry, BackendError> {
    let (id, subject_id, category, payload, created_at) = row;
    let subject = SubjectId::new(subject_id)
        .map_err(|e| BackendError::Corrupt(format!("entry {id}: {e}")))?;
    Ok(ChangeEntry {
        id,
        subject,
        category,
        payload,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_row_converts() {
        let now = Utc::now();
        let row = (7, "steve".to_string(), "fix".to_string(), serde_json::json!("x"), now);
        let Ok(entry) = entry_from_row(row) else {
            return;
        };
        assert_eq!(entry.id, 7);
        assert_eq!(entry.subject.as_str(), "steve");
        assert_eq!(entry.created_at, now);
    }

    #[test]
    fn blank_subject_is_corrupt() {
        let row = (7, "  ".to_string(), "fix".to_string(), serde_json::Value::Null, Utc::now());
        assert!(matches!(entry_from_row(row), Err(BackendError::Corrupt(_))));
    }
}
