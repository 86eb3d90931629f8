//! Command executor: one command, one pooled connection, one shaped reply.
//!
//! This is the entry point command wrappers build on. It checks a
//! connection out, sends the command, reads the reply, raises a server
//! error reply as [`Error::Redis`], shapes the rest and hands the
//! connection back on every path.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::warn;

use crate::command::Command;
use crate::config::{ConnectionConfig, LockOptions};
use crate::connection::pool::ConnectionPool;
use crate::error::{Error, Result};
use crate::lock::Lock;
use crate::pipeline::{self, BoxFuture, Pipeline};
use crate::pubsub::PubSub;
use crate::resp::types::RespValue;
use crate::response::{shape_with, ResponseCallbacks, Value};

/// Async client core. Cloning shares the pool and the callback table.
#[derive(Debug, Clone)]
pub struct Executor {
    pool: ConnectionPool,
    callbacks: Arc<RwLock<ResponseCallbacks>>,
}

impl Executor {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Ok(Self::from_pool(ConnectionPool::new(config)?))
    }

    /// Share an existing pool. The callback table starts as a fresh copy of
    /// the defaults.
    pub fn from_pool(pool: ConnectionPool) -> Self {
        Self {
            pool,
            callbacks: Arc::new(RwLock::new(ResponseCallbacks::default())),
        }
    }

    pub fn from_url(url: &str) -> Result<Self> {
        Self::new(ConnectionConfig::from_url(url)?)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run one command and shape the reply through the callback table.
    pub async fn execute_command<A: AsRef<[u8]>>(&self, args: &[A]) -> Result<Value> {
        self.execute(&Command::new(args)).await
    }

    /// Run one command and shape a non-error reply with `shape`.
    pub async fn execute_command_with<A, T, F>(&self, args: &[A], shape: F) -> Result<T>
    where
        A: AsRef<[u8]>,
        F: FnOnce(RespValue) -> Result<T>,
    {
        shape(self.execute_raw(&Command::new(args)).await?.into_result()?)
    }

    pub async fn execute(&self, cmd: &Command) -> Result<Value> {
        let reply = self.execute_raw(cmd).await?;
        let callback = self.callbacks.read().get(&cmd.name());
        shape_with(reply, cmd, callback.as_deref())
    }

    /// Send `cmd` and return the unshaped reply, error replies included.
    ///
    /// A transport failure (reset, broken pipe, peer closed) reconnects and
    /// resends once; a second one is returned to the caller. Timeouts and
    /// protocol errors are not retried.
    pub async fn execute_raw(&self, cmd: &Command) -> Result<RespValue> {
        let mut guard = self.pool.get().await?;
        match guard.conn().execute(cmd).await {
            Err(Error::Connection(e)) => {
                warn!(
                    command = %cmd.name(),
                    error = %e,
                    "transport failure, reconnecting and retrying once"
                );
                guard.conn().disconnect();
                guard.conn().execute(cmd).await
            }
            other => other,
        }
    }

    /// Override the shaping of `command` for this client only.
    pub fn set_response_callback<F>(&self, command: &str, f: F)
    where
        F: Fn(RespValue, &[Bytes]) -> Result<Value> + Send + Sync + 'static,
    {
        self.callbacks.write().set(command, f);
    }

    /// Snapshot of this client's callback table.
    pub fn response_callbacks(&self) -> ResponseCallbacks {
        self.callbacks.read().clone()
    }

    pub(crate) fn callbacks(&self) -> Arc<RwLock<ResponseCallbacks>> {
        Arc::clone(&self.callbacks)
    }

    /// A pipeline session. `transaction` wraps the batch in MULTI/EXEC.
    pub fn pipeline(&self, transaction: bool) -> Pipeline {
        Pipeline::new(self.pool.clone(), self.callbacks(), transaction)
    }

    /// Run `body` in a transaction pipeline watching `watches`, retrying
    /// on watch conflicts until EXEC goes through.
    pub async fn transaction<A, F>(&self, watches: &[A], body: F) -> Result<Vec<Result<Value>>>
    where
        A: AsRef<[u8]>,
        F: for<'p> FnMut(&'p mut Pipeline) -> BoxFuture<'p, Result<()>>,
    {
        pipeline::run_transaction(self.pipeline(true), watches, body).await
    }

    /// A listener on its own connection, outside the pool.
    pub fn pubsub(&self) -> PubSub {
        PubSub::new(self.pool.config())
    }

    /// A lock handle on `name`. Fails when the options are inconsistent.
    pub fn lock(&self, name: impl Into<String>, options: LockOptions) -> Result<Lock> {
        Lock::new(self.clone(), name, options)
    }

    /// Post `message` to `channel`; returns the number of receivers.
    pub async fn publish(&self, channel: impl AsRef<[u8]>, message: impl AsRef<[u8]>) -> Result<i64> {
        let args: [&[u8]; 3] = [b"PUBLISH", channel.as_ref(), message.as_ref()];
        self.execute_command_with(&args, |reply| {
            reply
                .as_int()
                .ok_or_else(|| Error::Type(format!("expected integer, got {}", reply.type_name())))
        })
        .await
    }

    /// Close pooled connections; checked-out ones are dropped on return.
    pub fn disconnect(&self) {
        self.pool.disconnect();
    }
}

// ── Tests ──────────────────────────────────────────────────────────
