//! Async connection pool for one endpoint.
//!
//! A semaphore bounds how many connections exist; the idle deque and the
//! checked-out counter live behind one `parking_lot::Mutex` (sync, held only
//! for bookkeeping, never across socket I/O) so connections can be returned
//! in `Drop` without needing async, and `idle + checked_out <= max_size`
//! holds at every observation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::connection::tcp::Connection;
use crate::error::{Error, Result};

#[derive(Debug)]
struct PoolState {
    /// Idle connections ready for reuse (LIFO for cache warmth).
    idle: VecDeque<Connection>,
    checked_out: usize,
    /// Bumped by `disconnect()`; connections from an older generation are
    /// dropped when handed back.
    generation: u64,
}

#[derive(Debug)]
struct PoolInner {
    config: ConnectionConfig,
    state: SyncMutex<PoolState>,
    /// One permit per free slot.
    semaphore: Semaphore,
    max_size: usize,
    idle_timeout: Option<Duration>,
}

/// A bounded set of connections to one server. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a new connection pool from config. No socket is opened yet.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let max_size = config.pool_size;
        let idle_timeout = config.idle_timeout();
        debug!(addr = %config.addr(), max_size, "connection pool created");
        Ok(Self {
            inner: Arc::new(PoolInner {
                state: SyncMutex::new(PoolState {
                    idle: VecDeque::with_capacity(max_size),
                    checked_out: 0,
                    generation: 0,
                }),
                semaphore: Semaphore::new(max_size),
                config,
                max_size,
                idle_timeout,
            }),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Check a connection out of the pool.
    ///
    /// Waits for a free slot according to `pool_timeout_ms`. The returned
    /// connection may be disconnected; it connects on first use. The
    /// [`PoolGuard`] hands it back when dropped.
    pub async fn get(&self) -> Result<PoolGuard> {
        let permit = match self.inner.config.pool_timeout_ms {
            None => self.inner.semaphore.acquire().await.map_err(|_| closed())?,
            Some(0) => self
                .inner
                .semaphore
                .try_acquire()
                .map_err(|_| Error::PoolExhausted)?,
            Some(ms) => {
                match tokio::time::timeout(
                    Duration::from_millis(ms),
                    self.inner.semaphore.acquire(),
                )
                .await
                {
                    Ok(permit) => permit.map_err(|_| closed())?,
                    Err(_) => return Err(Error::PoolExhausted),
                }
            }
        };
        // The slot is now tracked by `checked_out`; `release` gives it back.
        permit.forget();

        let mut conn = {
            let mut state = self.inner.state.lock();
            state.checked_out += 1;
            let generation = state.generation;
            match state.idle.pop_back() {
                Some(conn) => conn,
                None => {
                    let mut conn = Connection::new(&self.inner.config);
                    conn.generation = generation;
                    conn
                }
            }
        };

        if conn.is_connected() && conn.is_stale(self.inner.idle_timeout) {
            debug!(addr = %conn.addr(), "dropping stale idle connection");
            // Reconnects lazily on next use
            conn.disconnect();
        }

        Ok(PoolGuard {
            conn: Some(conn),
            pool: self.clone(),
        })
    }

    /// Connections parked and ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Number of connections currently held by callers.
    pub fn checked_out(&self) -> usize {
        self.inner.state.lock().checked_out
    }

    /// Idle and checked-out counts observed under one lock.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            checked_out: state.checked_out,
            max_size: self.inner.max_size,
        }
    }

    /// Upper bound on open connections.
    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Return the number of free slots (max_size - checked_out).
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Close every idle connection and invalidate the ones checked out.
    ///
    /// Checked-out connections are discarded when their guard drops.
    pub fn disconnect(&self) {
        let drained: Vec<Connection> = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.idle.drain(..).collect()
        };
        debug!(closed = drained.len(), "pool disconnected");
        for mut conn in drained {
            conn.disconnect();
        }
    }

    /// Hand a connection back (sync, safe for Drop).
    fn release(&self, conn: Connection) {
        let discarded = {
            let mut state = self.inner.state.lock();
            state.checked_out -= 1;
            if conn.is_broken()
                || conn.has_pending_replies()
                || conn.generation != state.generation
            {
                Some(conn)
            } else {
                state.idle.push_back(conn);
                None
            }
        };
        self.inner.semaphore.add_permits(1);

        if let Some(mut conn) = discarded {
            debug!(
                addr = %conn.addr(),
                broken = conn.is_broken(),
                pending = conn.has_pending_replies(),
                "discarding connection instead of returning it to the pool"
            );
            conn.disconnect();
        }
    }
}

/// A consistent snapshot of pool bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub checked_out: usize,
    pub max_size: usize,
}

fn closed() -> Error {
    Error::Connection(std::io::Error::new(
        std::io::ErrorKind::Other,
        "pool semaphore closed",
    ))
}

/// A checked-out connection. Dropping it hands the connection back.
#[derive(Debug)]
pub struct PoolGuard {
    conn: Option<Connection>,
    pool: ConnectionPool,
}

impl PoolGuard {
    /// The live connection.
    pub fn conn(&mut self) -> &mut Connection {
        // Only `Drop` takes the connection out
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pool guard used after release"),
        }
    }

    /// Flag the connection so it is discarded instead of reused.
    pub fn discard(&mut self) {
        self.conn().mark_broken();
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
