//! In-process storage backend.
//!
//! [`MemoryBackend`] keeps the change log in a mutex-guarded vector. It
//! backs the `memory` storage mode (single-node deployments that do not
//! need durability across restarts) and gives tests a store whose faults
//! can be injected on demand: the whole backend can go offline, a number of
//! upcoming reads or writes can fail, and open sessions can be severed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{BackendError, ChangeConnection};
use crate::domain::{ChangeEntry, NewChangeEntry, QueryFilter, SubjectId};

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    entries: Vec<ChangeEntry>,
    last_seen: HashMap<SubjectId, DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Faults {
    offline: AtomicBool,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    rejected_writes: AtomicU32,
    generation: AtomicU64,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MemoryState>,
    faults: Faults,
    counters: Counters,
}

/// Decrements `counter` if it is positive. Returns `true` if it did.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Shared in-memory change log. Clones refer to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Connection`] while the backend is offline.
    pub fn connect(&self) -> Result<MemoryConnection, BackendError> {
        if self.shared.faults.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Connection(
                "memory backend is offline".to_string(),
            ));
        }
        self.shared.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
            generation: self.shared.faults.generation.load(Ordering::SeqCst),
        })
    }

    /// Takes the backend offline or brings it back. While offline every
    /// call fails with a connectivity error.
    pub fn set_offline(&self, offline: bool) {
        self.shared.faults.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next `count` reads fail with a connectivity error.
    pub fn fail_next_reads(&self, count: u32) {
        self.shared.faults.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail with a connectivity error.
    pub fn fail_next_writes(&self, count: u32) {
        self.shared.faults.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail with a constraint violation.
    pub fn reject_next_writes(&self, count: u32) {
        self.shared.faults.rejected_writes.store(count, Ordering::SeqCst);
    }

    /// Breaks every session opened so far, as a server restart would.
    pub fn sever_connections(&self) {
        self.shared.faults.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of sessions opened.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.shared.counters.connects.load(Ordering::SeqCst)
    }

    /// Number of entry reads attempted, including failed ones.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.shared.counters.reads.load(Ordering::SeqCst)
    }

    /// Number of entry writes attempted, including failed ones.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.shared.counters.writes.load(Ordering::SeqCst)
    }

    /// Number of entries currently stored.
    pub async fn entry_count(&self) -> usize {
        self.shared.state.lock().await.entries.len()
    }
}

/// A session with a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    generation: u64,
}

impl MemoryConnection {
    fn severed(&self) -> bool {
        self.generation != self.shared.faults.generation.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<(), BackendError> {
        if self.shared.faults.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Connection(
                "memory backend is offline".to_string(),
            ));
        }
        if self.severed() {
            return Err(BackendError::Connection(
                "connection was severed".to_string(),
            ));
        }
        Ok(())
    }

    fn begin_read(&self) -> Result<(), BackendError> {
        self.shared.counters.reads.fetch_add(1, Ordering::SeqCst);
        self.check_alive()?;
        if take_one(&self.shared.faults.failing_reads) {
            return Err(BackendError::Connection("injected read failure".to_string()));
        }
        Ok(())
    }

    fn begin_write(&self) -> Result<(), BackendError> {
        self.shared.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.check_alive()?;
        if take_one(&self.shared.faults.failing_writes) {
            return Err(BackendError::Connection(
                "injected write failure".to_string(),
            ));
        }
        if take_one(&self.shared.faults.rejected_writes) {
            return Err(BackendError::Constraint(
                "injected constraint violation".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeConnection for MemoryConnection {
    async fn run_migrations(&mut self) -> Result<(), BackendError> {
        self.check_alive()
    }

    async fn insert_entry(&mut self, entry: &NewChangeEntry) -> Result<i64, BackendError> {
        self.begin_write()?;
        let mut state = self.shared.state.lock().await;
        state.last_id += 1;
        let id = state.last_id;
        state.entries.push(entry.clone().into_entry(id));
        Ok(id)
    }

    async fn select_entries(
        &mut self,
        filter: &QueryFilter,
    ) -> Result<Vec<ChangeEntry>, BackendError> {
        self.begin_read()?;
        let state = self.shared.state.lock().await;
        let mut matching: Vec<&ChangeEntry> =
            state.entries.iter().filter(|e| filter.matches(e)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64, BackendError> {
        self.begin_write()?;
        let mut state = self.shared.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|e| e.created_at >= cutoff);
        Ok((before - state.entries.len()) as u64)
    }

    async fn upsert_last_seen(
        &mut self,
        reader: &SubjectId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        self.begin_write()?;
        self.shared
            .state
            .lock()
            .await
            .last_seen
            .insert(reader.clone(), seen_at);
        Ok(())
    }

    async fn select_last_seen(
        &mut self,
        reader: &SubjectId,
    ) -> Result<Option<DateTime<Utc>>, BackendError> {
        self.begin_read()?;
        Ok(self.shared.state.lock().await.last_seen.get(reader).copied())
    }

    async fn count_after(
        &mut self,
        after: Option<DateTime<Utc>>,
        category: Option<&str>,
    ) -> Result<u64, BackendError> {
        self.begin_read()?;
        let state = self.shared.state.lock().await;
        let count = state
            .entries
            .iter()
            .filter(|e| after.is_none_or(|after| e.created_at > after))
            .filter(|e| category.is_none_or(|c| e.category == c))
            .count();
        Ok(count as u64)
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        self.check_alive()
    }

    fn is_broken(&self) -> bool {
        self.severed()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn subject(name: &str) -> SubjectId {
        let Ok(s) = SubjectId::new(name) else {
            panic!("valid subject");
        };
        s
    }

    fn new_entry(name: &str, category: &str, at: DateTime<Utc>) -> NewChangeEntry {
        let Ok(e) = NewChangeEntry::at(subject(name), category, serde_json::json!(name), at) else {
            panic!("valid entry");
        };
        e
    }

    fn base_time() -> DateTime<Utc> {
        let Some(t) = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single() else {
            panic!("valid timestamp");
        };
        t
    }

    fn open(backend: &MemoryBackend) -> MemoryConnection {
        let Ok(conn) = backend.connect() else {
            panic!("connect should succeed");
        };
        conn
    }

    #[tokio::test]
    async fn ids_increase_in_append_order() {
        let backend = MemoryBackend::new();
        let mut conn = open(&backend);
        let t = base_time();
        let Ok(first) = conn.insert_entry(&new_entry("a", "fix", t)).await else {
            panic!("insert failed");
        };
        let Ok(second) = conn.insert_entry(&new_entry("b", "fix", t)).await else {
            panic!("insert failed");
        };
        assert!(second > first);
        assert_eq!(backend.entry_count().await, 2);
    }

    #[tokio::test]
    async fn select_orders_newest_first_with_id_tiebreak() {
        let backend = MemoryBackend::new();
        let mut conn = open(&backend);
        let t = base_time();
        for (name, offset) in [("a", 0), ("b", 10), ("c", 10), ("d", 5)] {
            let at = t + Duration::seconds(offset);
            let Ok(_) = conn.insert_entry(&new_entry(name, "fix", at)).await else {
                panic!("insert failed");
            };
        }
        let Ok(page) = conn.select_entries(&QueryFilter::new()).await else {
            panic!("select failed");
        };
        let subjects: Vec<&str> = page.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["c", "b", "d", "a"]);
    }

    #[tokio::test]
    async fn select_applies_filter_and_pagination() {
        let backend = MemoryBackend::new();
        let mut conn = open(&backend);
        let t = base_time();
        for i in 0..5 {
            let at = t + Duration::seconds(i);
            let Ok(_) = conn.insert_entry(&new_entry("steve", "fix", at)).await else {
                panic!("insert failed");
            };
        }
        let Ok(_) = conn.insert_entry(&new_entry("alex", "fix", t)).await else {
            panic!("insert failed");
        };

        let filter = QueryFilter::new().subject(subject("steve")).page(1, 2);
        let Ok(page) = conn.select_entries(&filter).await else {
            panic!("select failed");
        };
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|e| e.subject.as_str() == "steve"));
        assert!(page.windows(2).all(|w| match w {
            [a, b] => a.created_at >= b.created_at,
            _ => true,
        }));
    }

    #[tokio::test]
    async fn delete_before_is_strict() {
        let backend = MemoryBackend::new();
        let mut conn = open(&backend);
        let t = base_time();
        for offset in [-2, -1, 0, 1] {
            let at = t + Duration::days(offset);
            let Ok(_) = conn.insert_entry(&new_entry("a", "fix", at)).await else {
                panic!("insert failed");
            };
        }
        assert_eq!(conn.delete_before(t).await.ok(), Some(2));
        assert_eq!(backend.entry_count().await, 2);
    }

    #[tokio::test]
    async fn last_seen_and_count_after() {
        let backend = MemoryBackend::new();
        let mut conn = open(&backend);
        let t = base_time();
        let reader = subject("reader");
        assert_eq!(conn.select_last_seen(&reader).await.ok(), Some(None));

        for (offset, category) in [(-1, "fix"), (1, "fix"), (2, "added")] {
            let at = t + Duration::minutes(offset);
            let Ok(_) = conn.insert_entry(&new_entry("a", category, at)).await else {
                panic!("insert failed");
            };
        }
        assert!(conn.upsert_last_seen(&reader, t).await.is_ok());
        assert_eq!(conn.select_last_seen(&reader).await.ok(), Some(Some(t)));
        assert_eq!(conn.count_after(Some(t), None).await.ok(), Some(2));
        assert_eq!(conn.count_after(Some(t), Some("fix")).await.ok(), Some(1));
        assert_eq!(conn.count_after(None, None).await.ok(), Some(3));
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let backend = MemoryBackend::new();
        let mut conn = open(&backend);
        backend.fail_next_reads(1);
        let first = conn.select_entries(&QueryFilter::new()).await;
        assert!(matches!(first, Err(BackendError::Connection(_))));
        assert!(conn.select_entries(&QueryFilter::new()).await.is_ok());
        assert_eq!(backend.reads(), 2);

        backend.fail_next_writes(1);
        let entry = new_entry("a", "fix", base_time());
        assert!(conn.insert_entry(&entry).await.is_err());
        assert!(conn.insert_entry(&entry).await.is_ok());
        assert_eq!(backend.writes(), 2);
        assert_eq!(backend.entry_count().await, 1);
    }

    #[tokio::test]
    async fn severed_connection_is_broken() {
        let backend = MemoryBackend::new();
        let mut conn = open(&backend);
        assert!(!conn.is_broken());
        backend.sever_connections();
        assert!(conn.is_broken());
        assert!(conn.ping().await.is_err());

        let mut fresh = open(&backend);
        assert!(fresh.ping().await.is_ok());
        assert_eq!(backend.connects(), 2);
    }
}
