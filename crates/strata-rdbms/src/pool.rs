//! Bounded connection pool with scoped leases.
//!
//! [`ConnectionPool::acquire`] hands out a [`PooledConnection`] that goes
//! back to the pool when dropped, on every exit path. A lease marked
//! broken, or one left inside a transaction that cannot be rolled back,
//! is closed instead of returned. Idle connections older than the idle
//! timeout are closed lazily on the next acquire.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionFactory};
use crate::error::{BackendError, StoreError};

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum open connections (idle + leased).
    pub max_size: usize,
    /// Idle connections older than this are closed.
    pub idle_timeout: Duration,
    /// How long `acquire` waits for a free slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

struct IdleConnection {
    conn: Box<dyn Connection>,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleConnection>,
    in_use: usize,
    closed: bool,
}

struct PoolInner {
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    released: Condvar,
}

/// A bounded pool of backend connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("backend", &self.inner.factory.describe())
            .field("max_size", &self.inner.config.max_size)
            .field("idle", &self.idle())
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl ConnectionPool {
    /// Creates a pool. No connection is opened until the first acquire.
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: PoolConfig) -> Self {
        let config = PoolConfig {
            max_size: config.max_size.max(1),
            ..config
        };
        Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                state: Mutex::new(PoolState::default()),
                released: Condvar::new(),
            }),
        }
    }

    /// Leases a connection, waiting up to the acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::PoolTimeout` if no connection frees up in
    /// time, `StoreError::Closed` after [`close`](Self::close), or the
    /// classified error of a failed connect.
    pub fn acquire(&self) -> Result<PooledConnection, StoreError> {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.config.acquire_timeout;
        let mut state = inner.state.lock();
        loop {
            if state.closed {
                return Err(StoreError::Closed(inner.factory.describe()));
            }

            let idle_timeout = inner.config.idle_timeout;
            let before = state.idle.len();
            state.idle.retain(|c| c.since.elapsed() < idle_timeout);
            if state.idle.len() < before {
                debug!(
                    evicted = before - state.idle.len(),
                    "closed idle connections past timeout"
                );
            }

            if let Some(idle) = state.idle.pop_back() {
                state.in_use += 1;
                drop(state);
                let mut lease = PooledConnection::new(Arc::clone(inner), idle.conn);
                if lease.is_valid() {
                    return Ok(lease);
                }
                warn!(backend = %inner.factory.describe(), "discarding invalid idle connection");
                lease.mark_broken();
                drop(lease);
                state = inner.state.lock();
                continue;
            }

            if state.in_use < inner.config.max_size {
                state.in_use += 1;
                drop(state);
                return match inner.factory.connect() {
                    Ok(conn) => {
                        debug!(backend = %inner.factory.describe(), "opened connection");
                        Ok(PooledConnection::new(Arc::clone(inner), conn))
                    }
                    Err(e) => {
                        inner.release_slot();
                        Err(connect_error(e))
                    }
                };
            }

            if inner.released.wait_until(&mut state, deadline).timed_out() {
                return Err(StoreError::PoolTimeout(
                    u64::try_from(inner.config.acquire_timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
        }
    }

    /// Connections sitting idle in the pool.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Connections currently leased.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.state.lock().in_use
    }

    /// Leases that could be handed out without waiting.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.config.max_size - self.in_use()
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Closes idle connections and refuses further leases.
    ///
    /// Outstanding leases are closed when dropped.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.idle.clear();
        drop(state);
        self.inner.released.notify_all();
    }

    /// Returns `true` after [`close`](Self::close).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

fn connect_error(e: BackendError) -> StoreError {
    if e.kind == crate::error::BackendErrorKind::Transient {
        StoreError::Transient(e.message)
    } else {
        StoreError::Fatal(e.message)
    }
}

impl PoolInner {
    fn release_slot(&self) {
        self.state.lock().in_use -= 1;
        self.released.notify_one();
    }

    fn give_back(&self, conn: Box<dyn Connection>) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        if !state.closed {
            state.idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
        }
        drop(state);
        self.released.notify_one();
    }
}

/// A leased connection, returned to its pool on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<PoolInner>,
    broken: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Box<dyn Connection>) -> Self {
        Self {
            conn: Some(conn),
            pool,
            broken: false,
        }
    }

    /// Marks the connection unusable; it is closed instead of returned.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns `true` if the connection was marked broken.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Marks the connection broken if `err` is fatal, and passes it through.
    pub fn check(&mut self, err: BackendError) -> BackendError {
        if err.breaks_connection() {
            warn!(error = %err, "fatal backend error, discarding connection");
            self.broken = true;
        }
        err
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the connection out.
        self.conn.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if !self.broken && conn.in_transaction() {
            if let Err(e) = conn.rollback() {
                warn!(error = %e, "rollback on release failed, discarding connection");
                self.broken = true;
            }
        }
        if self.broken {
            drop(conn);
            self.pool.release_slot();
        } else {
            self.pool.give_back(conn);
        }
    }
}
