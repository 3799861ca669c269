//! Typed facade over pooled store sessions.
//!
//! Every operation checks out one session, runs a single backend call and
//! returns the session on every exit path (the guard is dropped at the end
//! of the call whether it succeeded or not). Backend failures are wrapped
//! into [`ChangeLogError::WriteFailure`] or [`ChangeLogError::ReadFailure`]
//! naming the operation and its target.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{BackendError, ChangeConnection};
use crate::domain::{ChangeEntry, NewChangeEntry, QueryFilter, SubjectId};
use crate::error::ChangeLogError;
use crate::pool::{ConnectionPool, PoolState};

fn write_failure(operation: &'static str, target: String, err: &BackendError) -> ChangeLogError {
    ChangeLogError::WriteFailure {
        operation,
        target,
        transient: err.is_transient(),
        reason: err.to_string(),
    }
}

fn read_failure(operation: &'static str, target: String, err: &BackendError) -> ChangeLogError {
    ChangeLogError::ReadFailure {
        operation,
        target,
        transient: err.is_transient(),
        reason: err.to_string(),
    }
}

fn describe_filter(filter: &QueryFilter) -> String {
    match (&filter.subject, &filter.category) {
        (Some(subject), Some(category)) => format!("subject {subject}, category {category}"),
        (Some(subject), None) => format!("subject {subject}"),
        (None, Some(category)) => format!("category {category}"),
        (None, None) => "all entries".to_string(),
    }
}

/// Durable change-log storage backed by a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct ChangeRecordStore {
    pool: Arc<ConnectionPool>,
}

impl ChangeRecordStore {
    /// Creates a store drawing sessions from `pool`.
    #[must_use]
    pub const fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Pool occupancy.
    #[must_use]
    pub fn pool_state(&self) -> PoolState {
        self.pool.state()
    }

    /// Ensures the schema exists. Safe to run on every start.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeLogError::StartupFailure`] if no session can be
    /// opened or the schema cannot be created.
    pub async fn migrate(&self) -> Result<(), ChangeLogError> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            ChangeLogError::StartupFailure(format!("no store session for migrations: {e}"))
        })?;
        conn.run_migrations()
            .await
            .map_err(|e| ChangeLogError::StartupFailure(format!("schema migration failed: {e}")))
    }

    /// Persists `entry` and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::PoolExhausted`] if no session is available.
    /// - [`ChangeLogError::WriteFailure`] if the backend rejects the write.
    pub async fn append(&self, entry: NewChangeEntry) -> Result<ChangeEntry, ChangeLogError> {
        let mut conn = self.pool.acquire().await?;
        let id = conn
            .insert_entry(&entry)
            .await
            .map_err(|e| write_failure("append", format!("subject {}", entry.subject), &e))?;
        Ok(entry.into_entry(id))
    }

    /// Returns the entries matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::PoolExhausted`] if no session is available.
    /// - [`ChangeLogError::ReadFailure`] if the backend call fails.
    pub async fn query(&self, filter: &QueryFilter) -> Result<Vec<ChangeEntry>, ChangeLogError> {
        let mut conn = self.pool.acquire().await?;
        conn.select_entries(filter)
            .await
            .map_err(|e| read_failure("query", describe_filter(filter), &e))
    }

    /// Deletes entries created strictly before `cutoff`.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::PoolExhausted`] if no session is available.
    /// - [`ChangeLogError::WriteFailure`] if the backend call fails.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ChangeLogError> {
        let mut conn = self.pool.acquire().await?;
        conn.delete_before(cutoff)
            .await
            .map_err(|e| write_failure("prune", format!("entries before {cutoff}"), &e))
    }

    /// Stores `seen_at` as the last time `reader` looked at the log.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::PoolExhausted`] if no session is available.
    /// - [`ChangeLogError::WriteFailure`] if the backend call fails.
    pub async fn mark_seen(
        &self,
        reader: &SubjectId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), ChangeLogError> {
        let mut conn = self.pool.acquire().await?;
        conn.upsert_last_seen(reader, seen_at)
            .await
            .map_err(|e| write_failure("mark_seen", format!("reader {reader}"), &e))
    }

    /// When `reader` last looked at the log, if ever.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::PoolExhausted`] if no session is available.
    /// - [`ChangeLogError::ReadFailure`] if the backend call fails.
    pub async fn last_seen(
        &self,
        reader: &SubjectId,
    ) -> Result<Option<DateTime<Utc>>, ChangeLogError> {
        let mut conn = self.pool.acquire().await?;
        conn.select_last_seen(reader)
            .await
            .map_err(|e| read_failure("last_seen", format!("reader {reader}"), &e))
    }

    /// Counts entries created after `after`, optionally in one category.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::PoolExhausted`] if no session is available.
    /// - [`ChangeLogError::ReadFailure`] if the backend call fails.
    pub async fn count_after(
        &self,
        after: Option<DateTime<Utc>>,
        category: Option<&str>,
    ) -> Result<u64, ChangeLogError> {
        let mut conn = self.pool.acquire().await?;
        conn.count_after(after, category).await.map_err(|e| {
            let target = category.map_or_else(
                || "all entries".to_string(),
                |c| format!("category {c}"),
            );
            read_failure("count", target, &e)
        })
    }
}
