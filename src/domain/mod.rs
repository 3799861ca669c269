//! Domain layer: change entries, subjects, filters and the event system.
//!
//! This module contains the change-log data model: the immutable
//! [`ChangeEntry`], the validated [`SubjectId`], the [`QueryFilter`] used
//! both for reads and as the cache key, and the event bus that broadcasts
//! acknowledged writes.

pub mod change_entry;
pub mod change_event;
pub mod event_bus;
pub mod query_filter;
pub mod subject_id;

pub use change_entry::{ChangeEntry, MAX_RETENTION_DAYS, NewChangeEntry, retention_cutoff};
pub use change_event::ChangeLogEvent;
pub use event_bus::EventBus;
pub use query_filter::QueryFilter;
pub use subject_id::SubjectId;
