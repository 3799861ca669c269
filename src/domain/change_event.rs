//! Domain events emitted by the change-log service.
//!
//! Events are broadcast through the [`super::EventBus`] after the store has
//! acknowledged the underlying write. The webhook notifier is the built-in
//! subscriber.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ChangeEntry;

/// Event published after a successful change-log mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ChangeLogEvent {
    /// A new entry was durably recorded.
    EntryRecorded {
        /// The persisted entry.
        entry: ChangeEntry,
    },

    /// The retention prune removed old entries.
    EntriesPruned {
        /// Number of entries deleted.
        removed: u64,
        /// Entries created before this instant were deleted.
        cutoff: DateTime<Utc>,
        /// When the prune ran.
        timestamp: DateTime<Utc>,
    },
}

impl ChangeLogEvent {
    /// Returns the event type string used as the serde tag.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::EntryRecorded { .. } => "entry_recorded",
            Self::EntriesPruned { .. } => "entries_pruned",
        }
    }
}
