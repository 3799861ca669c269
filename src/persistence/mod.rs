//! Persistence layer: the change record store and its backends.
//!
//! A [`ChangeConnection`] is one live session with a backing store. Two
//! backends implement it: PostgreSQL through `sqlx`, and an in-process
//! memory store used for embedded deployments and tests. [`StoreManager`]
//! teaches `bb8` how to open, validate and discard either kind, and
//! [`ChangeRecordStore`] is the typed facade the service talks to.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ChangeEntry, NewChangeEntry, QueryFilter, SubjectId};

pub use memory::{MemoryBackend, MemoryConnection};
pub use postgres::{PostgresConnection, PostgresManager};
pub use store::ChangeRecordStore;

/// Failure reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The store could not be reached or the session died.
    #[error("connection error: {0}")]
    Connection(String),

    /// The store rejected the data.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The statement failed for another reason.
    #[error("query error: {0}")]
    Query(String),

    /// A stored row could not be turned back into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl BackendError {
    /// Returns `true` for connectivity failures that a retry may cure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db)
                if db.is_unique_violation()
                    || db.is_foreign_key_violation()
                    || db.is_check_violation() =>
            {
                Self::Constraint(err.to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connection(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Corrupt(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for BackendError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        match err {
            sqlx::migrate::MigrateError::Execute(inner) => Self::from(inner),
            other => Self::Query(other.to_string()),
        }
    }
}

/// One session with a backing store.
///
/// Every method maps onto a single statement (or a single critical section
/// for the memory backend), so a call either fully applies or not at all.
#[async_trait]
pub trait ChangeConnection: Send {
    /// Creates the change-log tables if they do not exist yet.
    async fn run_migrations(&mut self) -> Result<(), BackendError>;

    /// Persists `entry` and returns its newly assigned id.
    async fn insert_entry(&mut self, entry: &NewChangeEntry) -> Result<i64, BackendError>;

    /// Returns the entries matching `filter`, newest first, paginated.
    async fn select_entries(
        &mut self,
        filter: &QueryFilter,
    ) -> Result<Vec<ChangeEntry>, BackendError>;

    /// Deletes entries created strictly before `cutoff`.
    async fn delete_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64, BackendError>;

    /// Records that `reader` looked at the log at `seen_at`.
    async fn upsert_last_seen(
        &mut self,
        reader: &SubjectId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), BackendError>;

    /// Returns when `reader` last looked at the log.
    async fn select_last_seen(
        &mut self,
        reader: &SubjectId,
    ) -> Result<Option<DateTime<Utc>>, BackendError>;

    /// Counts entries created strictly after `after` (all entries when
    /// `None`), optionally restricted to one category.
    async fn count_after(
        &mut self,
        after: Option<DateTime<Utc>>,
        category: Option<&str>,
    ) -> Result<u64, BackendError>;

    /// Round-trips to the store to prove the session is alive.
    async fn ping(&mut self) -> Result<(), BackendError>;

    /// Returns `true` if the session is known to be unusable.
    fn is_broken(&self) -> bool;
}

#[derive(Debug)]
enum ConnectionKind {
    Postgres(PostgresConnection),
    Memory(MemoryConnection),
}

/// A pooled session with whichever backend the pool was built for.
///
/// A connectivity error on any call marks the session broken, and the pool
/// discards it instead of handing it out again.
#[derive(Debug)]
pub struct StoreConnection {
    kind: ConnectionKind,
    broken: bool,
}

impl StoreConnection {
    fn new(kind: ConnectionKind) -> Self {
        Self {
            kind,
            broken: false,
        }
    }

    fn track<T>(&mut self, result: Result<T, BackendError>) -> Result<T, BackendError> {
        if let Err(err) = &result
            && err.is_transient()
        {
            self.broken = true;
        }
        result
    }
}

macro_rules! dispatch {
    ($self:ident, $conn:ident => $call:expr) => {{
        let result = match &mut $self.kind {
            ConnectionKind::Postgres($conn) => $call.await,
            ConnectionKind::Memory($conn) => $call.await,
        };
        $self.track(result)
    }};
}

#[async_trait]
impl ChangeConnection for StoreConnection {
    async fn run_migrations(&mut self) -> Result<(), BackendError> {
        dispatch!(self, conn => conn.run_migrations())
    }

    async fn insert_entry(&mut self, entry: &NewChangeEntry) -> Result<i64, BackendError> {
        dispatch!(self, conn => conn.insert_entry(entry))
    }

    async fn select_entries(
        &mut self,
        filter: &QueryFilter,
    ) -> Result<Vec<ChangeEntry>, BackendError> {
        dispatch!(self, conn => conn.select_entries(filter))
    }

    async fn delete_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64, BackendError> {
        dispatch!(self, conn => conn.delete_before(cutoff))
    }

    async fn upsert_last_seen(
        &mut self,
        reader: &SubjectId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        dispatch!(self, conn => conn.upsert_last_seen(reader, seen_at))
    }

    async fn select_last_seen(
        &mut self,
        reader: &SubjectId,
    ) -> Result<Option<DateTime<Utc>>, BackendError> {
        dispatch!(self, conn => conn.select_last_seen(reader))
    }

    async fn count_after(
        &mut self,
        after: Option<DateTime<Utc>>,
        category: Option<&str>,
    ) -> Result<u64, BackendError> {
        dispatch!(self, conn => conn.count_after(after, category))
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        dispatch!(self, conn => conn.ping())
    }

    fn is_broken(&self) -> bool {
        self.broken
            || match &self.kind {
                ConnectionKind::Postgres(conn) => conn.is_broken(),
                ConnectionKind::Memory(conn) => conn.is_broken(),
            }
    }
}

/// Opens sessions for the connection pool.
#[derive(Debug, Clone)]
pub enum StoreManager {
    /// PostgreSQL through `sqlx`.
    Postgres(PostgresManager),
    /// The in-process memory store.
    Memory(MemoryBackend),
}

#[async_trait]
impl bb8::ManageConnection for StoreManager {
    type Connection = StoreConnection;
    type Error = BackendError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let kind = match self {
            Self::Postgres(manager) => ConnectionKind::Postgres(manager.connect().await?),
            Self::Memory(backend) => ConnectionKind::Memory(backend.connect()?),
        };
        Ok(StoreConnection::new(kind))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.ping().await
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_broken()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use bb8::ManageConnection;

    #[test]
    fn only_connection_errors_are_transient() {
        assert!(BackendError::Connection("reset".into()).is_transient());
        assert!(!BackendError::Constraint("dup".into()).is_transient());
        assert!(!BackendError::Query("syntax".into()).is_transient());
        assert!(!BackendError::Corrupt("bad".into()).is_transient());
    }

    #[test]
    fn sqlx_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = BackendError::from(sqlx::Error::Io(io));
        assert!(matches!(err, BackendError::Connection(_)));
    }

    #[test]
    fn sqlx_row_not_found_maps_to_query() {
        let err = BackendError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, BackendError::Query(_)));
    }

    #[tokio::test]
    async fn connectivity_error_marks_connection_broken() {
        let backend = MemoryBackend::new();
        let manager = StoreManager::Memory(backend.clone());
        let Ok(mut conn) = manager.connect().await else {
            panic!("connect should succeed");
        };
        assert!(!manager.has_broken(&mut conn));
        assert!(manager.is_valid(&mut conn).await.is_ok());

        backend.set_offline(true);
        assert!(conn.ping().await.is_err());
        assert!(manager.has_broken(&mut conn));
    }

    #[tokio::test]
    async fn constraint_error_keeps_connection_usable() {
        let backend = MemoryBackend::new();
        let manager = StoreManager::Memory(backend.clone());
        let Ok(mut conn) = manager.connect().await else {
            panic!("connect should succeed");
        };
        backend.reject_next_writes(1);
        let Ok(subject) = SubjectId::new("steve") else {
            panic!("valid subject");
        };
        let Ok(entry) = NewChangeEntry::new(subject, "fix", serde_json::json!("x")) else {
            panic!("valid entry");
        };
        let result = conn.insert_entry(&entry).await;
        assert!(matches!(result, Err(BackendError::Constraint(_))));
        assert!(!conn.is_broken());
    }

    #[tokio::test]
    async fn offline_backend_refuses_connections() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        let manager = StoreManager::Memory(backend);
        assert!(manager.connect().await.is_err());
    }
}
