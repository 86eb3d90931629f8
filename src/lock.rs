//! Server-side mutual exclusion built from SETNX, GET, GETSET and EXPIRE.
//!
//! The lock key holds the Unix time (seconds, as a float) at which the
//! current holder's claim lapses, or [`LOCK_FOREVER`] when the lock was
//! taken without a timeout. A claim whose timestamp has passed can be taken
//! over with GETSET.
//!
//! Two clients reclaiming the same expired lock at the same moment can both
//! believe they won, and `release` deletes the key without checking who
//! holds it. Both are inherent to this scheme.

use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::config::LockOptions;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::resp::types::RespValue;

/// Stored value meaning "held until released".
pub const LOCK_FOREVER: f64 = 2_147_483_649.0; // 2^31 + 1

/// A handle on one lock key. Holds no server state of its own.
#[derive(Debug)]
pub struct Lock {
    executor: Executor,
    name: String,
    options: LockOptions,
    acquired_until: Option<f64>,
}

impl Lock {
    /// Fails with [`Error::Config`] when `sleep >= timeout`.
    pub fn new(executor: Executor, name: impl Into<String>, options: LockOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            executor,
            name: name.into(),
            options,
            acquired_until: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// The expiry this handle last wrote, [`LOCK_FOREVER`] for a lock
    /// without timeout, or `None` when not held.
    pub fn acquired_until(&self) -> Option<f64> {
        self.acquired_until
    }

    /// Try to take the lock.
    ///
    /// With `blocking`, retries every `sleep` until it succeeds; there is no
    /// upper bound on the wait. Without it, returns `false` right away when
    /// someone else holds the lock.
    pub async fn acquire(&mut self, blocking: bool) -> Result<bool> {
        loop {
            let unixtime = unix_now().floor();
            let timeout_at = match self.options.timeout {
                Some(t) => unixtime + t.as_secs_f64(),
                None => LOCK_FOREVER,
            };
            let value = format_timestamp(timeout_at);

            if self.setnx(&value).await? {
                self.expire().await?;
                self.acquired_until = Some(timeout_at);
                return Ok(true);
            }

            let existing = self.read_timestamp(&["GET", self.name.as_str()]).await?;
            if existing < unixtime {
                let previous = self
                    .read_timestamp(&["GETSET", self.name.as_str(), value.as_str()])
                    .await?;
                if previous < unixtime {
                    debug!(lock = %self.name, expired_at = previous, "reclaimed expired lock");
                    self.expire().await?;
                    self.acquired_until = Some(timeout_at);
                    return Ok(true);
                }
            }

            if !blocking {
                return Ok(false);
            }
            tokio::time::sleep(self.options.sleep).await;
        }
    }

    /// Delete the lock key, whoever holds it.
    pub async fn release(&mut self) -> Result<()> {
        self.acquired_until = None;
        self.executor
            .execute_command_with(&["DEL", self.name.as_str()], |_| Ok(()))
            .await
    }

    /// Acquire (blocking), run `body`, release.
    ///
    /// The lock is released whether `body` succeeds or fails; a release
    /// failure is reported only when `body` succeeded. If the returned
    /// future is dropped mid-way, the lock stays held until its timeout.
    pub async fn with_lock<T, F, Fut>(&mut self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire(true).await?;
        let result = body().await;
        let released = self.release().await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    async fn setnx(&self, value: &str) -> Result<bool> {
        self.executor
            .execute_command_with(&["SETNX", self.name.as_str(), value], |reply| {
                reply.as_int().map(|n| n != 0).ok_or_else(|| {
                    Error::Type(format!("SETNX returned {}", reply.type_name()))
                })
            })
            .await
    }

    /// Let the server drop the key even if the holder never releases it.
    async fn expire(&self) -> Result<()> {
        let Some(timeout) = self.options.timeout else {
            return Ok(());
        };
        let seconds = timeout.as_secs_f64().ceil().max(1.0) as u64;
        self.executor
            .execute_command_with(
                &["EXPIRE", self.name.as_str(), seconds.to_string().as_str()],
                |_| Ok(()),
            )
            .await
    }

    /// Run a command returning the stored timestamp. Missing or unreadable
    /// values count as long expired.
    async fn read_timestamp(&self, args: &[&str]) -> Result<f64> {
        self.executor
            .execute_command_with(args, |reply| Ok(parse_timestamp(&reply)))
            .await
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Whole numbers keep one decimal (`1700000001.0`), like any float repr.
fn format_timestamp(ts: f64) -> String {
    if ts.fract() == 0.0 {
        format!("{ts:.1}")
    } else {
        ts.to_string()
    }
}

fn parse_timestamp(reply: &RespValue) -> f64 {
    reply
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(1.0)
}

// ── Tests ──────────────────────────────────────────────────────────
