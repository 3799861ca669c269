//! Lifecycle of a running change log.
//!
//! [`ChangeLog::start`] opens the pool, migrates the schema, wires the
//! cache, store and event bus into a [`ChangeLogService`] and spawns the
//! background tasks. [`ChangeLog::shutdown`] stops those tasks and
//! releases every resource the runtime owns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::cache::EntryCache;
use crate::config::{ChangeLogConfig, StorageBackend};
use crate::domain::{EventBus, retention_cutoff};
use crate::error::ChangeLogError;
use crate::notify::WebhookNotifier;
use crate::persistence::{ChangeRecordStore, MemoryBackend, PostgresManager, StoreManager};
use crate::pool::ConnectionPool;
use crate::service::{ChangeLogService, RetryPolicy};

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// A started change log and its background tasks.
#[derive(Debug)]
pub struct ChangeLog {
    service: ChangeLogService,
    pool: Arc<ConnectionPool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ChangeLog {
    /// Starts a change log on the backend named by `config.storage`.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::ConfigurationError`] for invalid settings.
    /// - [`ChangeLogError::StartupFailure`] if the store is unreachable or
    ///   the schema cannot be created.
    pub async fn start(config: &ChangeLogConfig) -> Result<Self, ChangeLogError> {
        config.validate()?;
        let manager = match config.storage {
            StorageBackend::Postgres => {
                StoreManager::Postgres(PostgresManager::new(&config.database_url)?)
            }
            StorageBackend::Memory => StoreManager::Memory(MemoryBackend::new()),
        };
        Self::start_with_manager(config, manager).await
    }

    /// Starts a change log over an explicit connection manager. Used to
    /// share a [`MemoryBackend`] with the caller.
    ///
    /// # Errors
    ///
    /// Same as [`ChangeLog::start`].
    pub async fn start_with_manager(
        config: &ChangeLogConfig,
        manager: StoreManager,
    ) -> Result<Self, ChangeLogError> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::open(manager, config.pool).await?);
        let store = ChangeRecordStore::new(Arc::clone(&pool));
        if let Err(err) = store.migrate().await {
            pool.close();
            return Err(err);
        }

        let cache = Arc::new(EntryCache::new(config.cache_max_entries, config.cache_ttl));
        let event_bus = EventBus::new(config.event_bus_capacity);
        let service = ChangeLogService::new(
            store,
            Arc::clone(&cache),
            event_bus.clone(),
            RetryPolicy {
                attempts: config.list_retry_attempts,
                backoff: RETRY_BACKOFF,
            },
        );

        let mut tasks = Vec::new();
        if let Some(interval) = config.cache_sweep_interval {
            tasks.push(("cache sweeper", spawn_cache_sweeper(cache, interval)));
        }
        if config.retention_days > 0 {
            tasks.push((
                "retention pruner",
                spawn_pruner(service.clone(), config.retention_days, config.prune_interval),
            ));
        }
        if let Some(settings) = &config.webhook {
            let notifier = match WebhookNotifier::new(settings.clone()) {
                Ok(notifier) => notifier,
                Err(err) => {
                    abort_all(tasks).await;
                    pool.close();
                    return Err(err);
                }
            };
            tasks.push(("webhook notifier", notifier.spawn(event_bus.subscribe())));
        }

        tracing::info!(
            storage = ?config.storage,
            background_tasks = tasks.len(),
            "change log started"
        );

        Ok(Self {
            service,
            pool,
            tasks,
        })
    }

    /// The service handling writes and reads.
    #[must_use]
    pub fn service(&self) -> &ChangeLogService {
        &self.service
    }

    /// Stops the background tasks, closes the pool and empties the cache.
    pub async fn shutdown(self) {
        abort_all(self.tasks).await;
        self.pool.close();
        self.service.cache().clear().await;
        tracing::info!("change log shut down");
    }
}

async fn abort_all(tasks: Vec<(&'static str, JoinHandle<()>)>) {
    for (_, handle) in &tasks {
        handle.abort();
    }
    for (name, handle) in tasks {
        if let Err(err) = handle.await
            && !err.is_cancelled()
        {
            tracing::warn!(task = name, error = %err, "background task ended abnormally");
        }
    }
}

fn spawn_cache_sweeper(cache: Arc<EntryCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "expired cache pages purged");
            }
        }
    })
}

fn spawn_pruner(
    service: ChangeLogService,
    retention_days: u32,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let cutoff = match retention_cutoff(Utc::now(), retention_days) {
                Ok(cutoff) => cutoff,
                Err(err) => {
                    tracing::error!(error = %err, retention_days, "retention pruner stopped");
                    return;
                }
            };
            if let Err(err) = service.prune_older_than(cutoff).await {
                tracing::warn!(error = %err, %cutoff, "retention prune failed");
            }
        }
    })
}
