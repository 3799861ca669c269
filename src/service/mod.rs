//! Service layer: change-log orchestration.
//!
//! [`ChangeLogService`] sits between callers and the store. It validates
//! input, keeps the entry cache coherent with acknowledged writes, retries
//! transient read failures and emits events through the
//! [`super::domain::EventBus`].

pub mod changelog_service;

pub use changelog_service::{ChangeLogService, RetryPolicy};
