//! Change-log service: writes, cached reads and reader tracking.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;

use crate::cache::{CacheStats, CachedPage, EntryCache};
use crate::domain::change_entry::normalize_category;
use crate::domain::{ChangeEntry, ChangeLogEvent, EventBus, NewChangeEntry, QueryFilter, SubjectId};
use crate::error::ChangeLogError;
use crate::persistence::ChangeRecordStore;
use crate::pool::PoolState;

/// How `list` and the other reads retry transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 count as 1.
    pub attempts: u32,
    /// Delay before the second attempt; later attempts wait proportionally
    /// longer.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Turns whatever a read ended with into the error the caller sees.
fn into_read_failure(operation: &'static str, err: ChangeLogError) -> ChangeLogError {
    match err {
        ChangeLogError::PoolExhausted { waited_ms } => ChangeLogError::ReadFailure {
            operation,
            target: "connection pool".to_string(),
            transient: true,
            reason: format!("no store session available after {waited_ms} ms"),
        },
        other => other,
    }
}

/// Orchestrates the store, the entry cache and the event bus.
///
/// Writes go to the store first; only an acknowledged write invalidates the
/// cache and is announced on the bus. Reads are answered from the cache when
/// an identical filter was served recently, and from the store otherwise.
#[derive(Debug, Clone)]
pub struct ChangeLogService {
    store: ChangeRecordStore,
    cache: Arc<EntryCache>,
    event_bus: EventBus,
    retry: RetryPolicy,
}

impl ChangeLogService {
    /// Creates a service over the given components.
    #[must_use]
    pub fn new(
        store: ChangeRecordStore,
        cache: Arc<EntryCache>,
        event_bus: EventBus,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            event_bus,
            retry,
        }
    }

    /// Returns a reference to the inner [`EventBus`].
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Returns the entry cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<EntryCache> {
        &self.cache
    }

    /// Returns the record store.
    #[must_use]
    pub fn store(&self) -> &ChangeRecordStore {
        &self.store
    }

    /// Validates and durably records a change.
    ///
    /// On success every cached page the entry could appear in is dropped
    /// and an [`ChangeLogEvent::EntryRecorded`] event is published.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::InvalidRequest`] for a bad category or payload.
    /// - [`ChangeLogError::PoolExhausted`] or [`ChangeLogError::WriteFailure`]
    ///   from the store, unmodified. Nothing is cached or published then.
    pub async fn record(
        &self,
        subject: SubjectId,
        category: &str,
        payload: Value,
    ) -> Result<ChangeEntry, ChangeLogError> {
        let new_entry = NewChangeEntry::new(subject, category, payload)?;
        let entry = self.store.append(new_entry).await?;

        let invalidated = self.cache.invalidate_subject(&entry.subject).await;
        tracing::info!(
            subject = %entry.subject,
            id = entry.id,
            category = %entry.category,
            invalidated,
            "change recorded"
        );

        let _ = self.event_bus.publish(ChangeLogEvent::EntryRecorded {
            entry: entry.clone(),
        });
        Ok(entry)
    }

    /// Lists entries matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::InvalidRequest`] if the filter is invalid.
    /// - [`ChangeLogError::ReadFailure`] once the retry budget is spent.
    pub async fn list(&self, filter: QueryFilter) -> Result<Vec<ChangeEntry>, ChangeLogError> {
        let filter = filter.normalized()?;
        if let Some(page) = self.cache.get(&filter).await {
            tracing::debug!(entries = page.len(), "list served from cache");
            return Ok(page.to_vec());
        }

        let generation = self.cache.generation();
        let entries = self
            .with_read_retry("query", || self.store.query(&filter))
            .await?;
        let page: CachedPage = Arc::from(entries);
        self.cache
            .put_if_current(filter, Arc::clone(&page), generation)
            .await;
        Ok(page.to_vec())
    }

    /// Records that `reader` has looked at the change log now and returns
    /// the stored time.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::PoolExhausted`] or [`ChangeLogError::WriteFailure`]
    ///   from the store.
    pub async fn mark_seen(&self, reader: &SubjectId) -> Result<DateTime<Utc>, ChangeLogError> {
        let seen_at = Utc::now().trunc_subsecs(3);
        self.store.mark_seen(reader, seen_at).await?;
        tracing::debug!(reader = %reader, %seen_at, "reader marked seen");
        Ok(seen_at)
    }

    /// Counts entries created since `reader` last looked, optionally in one
    /// category. A reader who never looked sees every entry as unseen.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::InvalidRequest`] for a bad category.
    /// - [`ChangeLogError::ReadFailure`] once the retry budget is spent.
    pub async fn unseen_count(
        &self,
        reader: &SubjectId,
        category: Option<&str>,
    ) -> Result<u64, ChangeLogError> {
        let category = category.map(normalize_category).transpose()?;
        let last_seen = self
            .with_read_retry("last_seen", || self.store.last_seen(reader))
            .await?;
        self.with_read_retry("count", || {
            self.store.count_after(last_seen, category.as_deref())
        })
        .await
    }

    /// Deletes entries created before `cutoff`, clears the cache and
    /// publishes [`ChangeLogEvent::EntriesPruned`].
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::PoolExhausted`] or [`ChangeLogError::WriteFailure`]
    ///   from the store. The cache is left alone then.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ChangeLogError> {
        let removed = self.store.prune_before(cutoff).await?;
        self.cache.clear().await;
        tracing::info!(removed, %cutoff, "old change entries pruned");
        let _ = self.event_bus.publish(ChangeLogEvent::EntriesPruned {
            removed,
            cutoff,
            timestamp: Utc::now(),
        });
        Ok(removed)
    }

    /// Entry cache counters.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Pool occupancy.
    #[must_use]
    pub fn pool_state(&self) -> PoolState {
        self.store.pool_state()
    }

    async fn with_read_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, ChangeLogError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChangeLogError>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::warn!(operation, attempt, error = %err, "store read failed, retrying");
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(into_read_failure(operation, err)),
            }
        }
    }
}
