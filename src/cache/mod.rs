//! In-memory entry cache fronting the change record store.
//!
//! [`TtlLruCache`] is the generic bounded LRU + TTL structure;
//! [`EntryCache`] specializes it to list results keyed by [`QueryFilter`]
//! and knows which keys a write about a given subject makes stale.
//!
//! [`QueryFilter`]: crate::domain::QueryFilter

pub mod entry_cache;
pub mod lru;

pub use entry_cache::{CachedPage, EntryCache};
pub use lru::{CacheStats, TtlLruCache};
