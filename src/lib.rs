//! # changelog-book
//!
//! Durable change-log recording and querying for game-server style
//! deployments. Entries are written through a bounded connection pool to a
//! relational store and list reads are served from a TTL-bounded LRU cache
//! that every acknowledged write invalidates.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── ChangeLogService (service/)
//!     ├── EventBus (domain/) ──► WebhookNotifier (notify/)
//!     │
//!     ├── EntryCache (cache/)
//!     ├── ChangeRecordStore (persistence/)
//!     ├── ConnectionPool (pool)
//!     │
//!     └── PostgreSQL or in-memory backend
//! ```
//!
//! [`ChangeLog`] wires these together and owns the background tasks.

pub mod api;
pub mod app_state;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod pool;
pub mod runtime;
pub mod service;

pub use error::ChangeLogError;
pub use runtime::ChangeLog;
