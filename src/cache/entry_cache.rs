//! List-result cache keyed by normalized query filters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::lru::{CacheStats, TtlLruCache};
use crate::domain::{ChangeEntry, QueryFilter, SubjectId};

/// Cached page of entries, shared between the cache and readers.
pub type CachedPage = Arc<[ChangeEntry]>;

/// Bounded cache of `list` results.
///
/// The cache is never the only copy of an entry: every value here was read
/// from the store, and a miss always falls through to it.
///
/// Every invalidation bumps a generation counter. A reader that started
/// before an invalidation stores its page with [`EntryCache::put_if_current`]
/// so that a page read before a write cannot be cached after it.
#[derive(Debug)]
pub struct EntryCache {
    inner: TtlLruCache<QueryFilter, CachedPage>,
    generation: AtomicU64,
}

impl EntryCache {
    /// Creates an empty cache holding at most `max_entries` result pages.
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: TtlLruCache::new(max_entries, ttl),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the cached page for an exact filter match.
    pub async fn get(&self, filter: &QueryFilter) -> Option<CachedPage> {
        self.inner.get(filter).await
    }

    /// Caches a page read from the store.
    pub async fn put(&self, filter: QueryFilter, page: CachedPage) {
        self.inner.put(filter, page).await;
    }

    /// Current invalidation generation. Read it before going to the store.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Caches a page unless an invalidation happened since `generation`
    /// was read. Returns `true` if the page was stored.
    pub async fn put_if_current(
        &self,
        filter: QueryFilter,
        page: CachedPage,
        generation: u64,
    ) -> bool {
        self.inner
            .put_if(filter, page, || self.generation() == generation)
            .await
    }

    /// Drops one cached page.
    pub async fn invalidate(&self, filter: &QueryFilter) -> bool {
        self.inner.invalidate(filter).await
    }

    /// Drops every page a new entry about `subject` could appear in: pages
    /// filtered to that subject and pages not filtered by subject at all.
    pub async fn invalidate_subject(&self, subject: &SubjectId) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner
            .invalidate_if(|filter| filter.covers_subject(subject))
            .await
    }

    /// Drops everything.
    pub async fn clear(&self) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.clear().await
    }

    /// Physically removes expired pages.
    pub async fn purge_expired(&self) -> usize {
        self.inner.purge_expired().await
    }

    /// Current counters.
    pub async fn stats(&self) -> CacheStats {
        self.inner.stats().await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn subject(name: &str) -> SubjectId {
        let Ok(s) = SubjectId::new(name) else {
            panic!("valid subject");
        };
        s
    }

    fn page(name: &str) -> CachedPage {
        Arc::from(vec![ChangeEntry {
            id: 1,
            subject: subject(name),
            category: "added".to_string(),
            payload: serde_json::json!("x"),
            created_at: Utc::now(),
        }])
    }

    #[tokio::test]
    async fn invalidate_subject_drops_matching_and_unfiltered_pages() {
        let cache = EntryCache::new(16, Duration::from_secs(60));
        let steve = QueryFilter::new().subject(subject("steve"));
        let alex = QueryFilter::new().subject(subject("alex"));
        let everyone = QueryFilter::new();
        let fixes = QueryFilter::new().category("fix");

        cache.put(steve.clone(), page("steve")).await;
        cache.put(alex.clone(), page("alex")).await;
        cache.put(everyone.clone(), page("steve")).await;
        cache.put(fixes.clone(), page("alex")).await;

        let removed = cache.invalidate_subject(&subject("steve")).await;
        assert_eq!(removed, 3);
        assert!(cache.get(&steve).await.is_none());
        assert!(cache.get(&everyone).await.is_none());
        assert!(cache.get(&fixes).await.is_none());
        assert!(cache.get(&alex).await.is_some());
    }

    #[tokio::test]
    async fn pages_are_keyed_by_whole_filter() {
        let cache = EntryCache::new(16, Duration::from_secs(60));
        let first = QueryFilter::new().page(0, 10);
        let second = QueryFilter::new().page(10, 10);

        cache.put(first.clone(), page("steve")).await;
        assert!(cache.get(&first).await.is_some());
        assert!(cache.get(&second).await.is_none());
        assert!(cache.invalidate(&first).await);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn page_read_before_invalidation_is_not_cached() {
        let cache = EntryCache::new(16, Duration::from_secs(60));
        let filter = QueryFilter::new();

        let generation = cache.generation();
        cache.invalidate_subject(&subject("steve")).await;
        assert!(!cache.put_if_current(filter.clone(), page("alex"), generation).await);
        assert!(cache.get(&filter).await.is_none());

        let generation = cache.generation();
        assert!(cache.put_if_current(filter.clone(), page("alex"), generation).await);
        assert!(cache.get(&filter).await.is_some());
    }
}
