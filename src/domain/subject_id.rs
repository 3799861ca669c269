//! Type-safe subject identifier.
//!
//! [`SubjectId`] is a validated newtype around the string reference a change
//! entry is about (a player UUID, an entity name, a world key). Readers that
//! track "last seen" state are keyed by the same type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChangeLogError;

/// Maximum length of a subject identifier, in characters.
pub const MAX_SUBJECT_LEN: usize = 64;

/// Identifier of the entity a change entry refers to.
///
/// Surrounding whitespace is trimmed on construction. The identifier must be
/// non-empty, at most [`MAX_SUBJECT_LEN`] characters and free of control
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Validates and wraps a subject identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeLogError::InvalidRequest`] if the identifier is empty,
    /// too long, or contains control characters.
    pub fn new(raw: impl Into<String>) -> Result<Self, ChangeLogError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ChangeLogError::InvalidRequest(
                "subject must not be empty".to_string(),
            ));
        }
        if trimmed.chars().count() > MAX_SUBJECT_LEN {
            return Err(ChangeLogError::InvalidRequest(format!(
                "subject must be at most {MAX_SUBJECT_LEN} characters"
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ChangeLogError::InvalidRequest(
                "subject must not contain control characters".to_string(),
            ));
        }
        if trimmed.len() == raw.len() {
            Ok(Self(raw))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SubjectId {
    type Err = ChangeLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SubjectId {
    type Error = ChangeLogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubjectId> for String {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

impl AsRef<str> for SubjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
