//! Bounded pool of store sessions.
//!
//! [`ConnectionPool`] wraps a `bb8` pool over [`StoreManager`]. It keeps at
//! least `min_idle` sessions warm, never opens more than `max_size`, and
//! makes callers wait at most `acquire_timeout` for a free session before
//! failing with [`ChangeLogError::PoolExhausted`]. Sessions are validated
//! on checkout, discarded when broken, and retired after `idle_timeout` or
//! `max_lifetime`.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use bb8::{ErrorSink, RunError};
use serde::Serialize;

use crate::error::ChangeLogError;
use crate::persistence::{BackendError, StoreConnection, StoreManager};

/// Sizing and timing of a [`ConnectionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Sessions kept open while idle.
    pub min_idle: u32,
    /// Upper bound on open sessions.
    pub max_size: u32,
    /// How long `acquire` waits for a free session.
    pub acquire_timeout: Duration,
    /// Idle sessions older than this are closed. `None` keeps them.
    pub idle_timeout: Option<Duration>,
    /// Sessions older than this are closed. `None` keeps them.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_idle: 2,
            max_size: 10,
            acquire_timeout: Duration::from_millis(10_000),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

impl PoolOptions {
    /// Checks the sizing invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeLogError::ConfigurationError`] if `max_size` is zero,
    /// `min_idle` exceeds `max_size`, or the acquire timeout is zero.
    pub fn validate(&self) -> Result<(), ChangeLogError> {
        if self.max_size == 0 {
            return Err(ChangeLogError::ConfigurationError(
                "pool max size must be at least 1".to_string(),
            ));
        }
        if self.min_idle > self.max_size {
            return Err(ChangeLogError::ConfigurationError(format!(
                "pool min idle ({}) exceeds max size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(ChangeLogError::ConfigurationError(
                "pool acquire timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolState {
    /// Open sessions, idle or checked out.
    pub connections: u32,
    /// Open sessions waiting in the pool.
    pub idle_connections: u32,
    /// Upper bound on open sessions.
    pub max_size: u32,
    /// `true` once [`ConnectionPool::close`] has run.
    pub closed: bool,
}

/// Logs background connection failures that `bb8` would otherwise drop.
#[derive(Debug, Clone, Copy)]
struct TracingErrorSink;

impl ErrorSink<BackendError> for TracingErrorSink {
    fn sink(&self, error: BackendError) {
        tracing::warn!(error = %error, "store connection failed");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<BackendError>> {
        Box::new(*self)
    }
}

/// A session checked out of a [`ConnectionPool`].
///
/// Dropping it returns the session to the pool; a session that reported a
/// connectivity error is discarded instead.
pub struct PooledConnection {
    inner: bb8::PooledConnection<'static, StoreManager>,
}

impl PooledConnection {
    /// Returns the session to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &*self.inner)
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = StoreConnection;

    fn deref(&self) -> &StoreConnection {
        &self.inner
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut StoreConnection {
        &mut self.inner
    }
}

/// Bounded, validated pool of store sessions.
pub struct ConnectionPool {
    inner: RwLock<Option<bb8::Pool<StoreManager>>>,
    options: PoolOptions,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionPool {
    /// Builds the pool and opens the initial `min_idle` sessions.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeLogError::ConfigurationError`] for invalid options and
    /// [`ChangeLogError::StartupFailure`] if the initial sessions cannot be
    /// opened.
    pub async fn open(manager: StoreManager, options: PoolOptions) -> Result<Self, ChangeLogError> {
        options.validate()?;
        let pool = bb8::Pool::builder()
            .max_size(options.max_size)
            .min_idle(Some(options.min_idle))
            .connection_timeout(options.acquire_timeout)
            .idle_timeout(options.idle_timeout)
            .max_lifetime(options.max_lifetime)
            .test_on_check_out(true)
            .error_sink(Box::new(TracingErrorSink))
            .build(manager)
            .await
            .map_err(|e| {
                ChangeLogError::StartupFailure(format!("could not open store connections: {e}"))
            })?;

        tracing::info!(
            min_idle = options.min_idle,
            max_size = options.max_size,
            acquire_timeout_ms = options.acquire_timeout.as_millis() as u64,
            "connection pool opened"
        );

        Ok(Self {
            inner: RwLock::new(Some(pool)),
            options,
        })
    }

    /// Options the pool was built with.
    #[must_use]
    pub const fn options(&self) -> &PoolOptions {
        &self.options
    }

    fn current(&self) -> Result<bb8::Pool<StoreManager>, ChangeLogError> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ChangeLogError::ShutDown)
    }

    /// Checks out a session, waiting up to the acquire timeout.
    ///
    /// # Errors
    ///
    /// - [`ChangeLogError::ShutDown`] after [`ConnectionPool::close`].
    /// - [`ChangeLogError::PoolExhausted`] if no session freed up in time.
    pub async fn acquire(&self) -> Result<PooledConnection, ChangeLogError> {
        let pool = self.current()?;
        let started = Instant::now();
        match pool.get_owned().await {
            Ok(inner) => Ok(PooledConnection { inner }),
            Err(RunError::TimedOut) => {
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                let state = pool.state();
                tracing::warn!(
                    waited_ms,
                    connections = state.connections,
                    idle = state.idle_connections,
                    "connection pool exhausted"
                );
                Err(ChangeLogError::PoolExhausted { waited_ms })
            }
            Err(RunError::User(err)) => Err(ChangeLogError::ReadFailure {
                operation: "connect",
                target: "connection pool".to_string(),
                transient: err.is_transient(),
                reason: err.to_string(),
            }),
        }
    }

    /// Returns a session to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection) {
        conn.release();
    }

    /// Current occupancy.
    #[must_use]
    pub fn state(&self) -> PoolState {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(pool) => {
                let state = pool.state();
                PoolState {
                    connections: state.connections,
                    idle_connections: state.idle_connections,
                    max_size: self.options.max_size,
                    closed: false,
                }
            }
            None => PoolState {
                connections: 0,
                idle_connections: 0,
                max_size: self.options.max_size,
                closed: true,
            },
        }
    }

    /// Returns `true` once the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Closes the pool. Idle sessions are dropped now, checked-out sessions
    /// when they are released, and every later `acquire` fails with
    /// [`ChangeLogError::ShutDown`]. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let taken = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if taken.is_some() {
            tracing::info!("connection pool closed");
        }
        taken.is_some()
    }
}
