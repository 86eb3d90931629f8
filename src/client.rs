//! Blocking client API.
//!
//! Thin wrappers over the async core that drive every call to completion on
//! the shared runtime via [`runtime::block_on`]. These types must not be
//! used from inside an async task; use [`Executor`] and friends there.

use bytes::Bytes;
use tracing::warn;

use crate::config::{ConnectionConfig, LockOptions};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::lock::Lock;
use crate::pipeline::{Attempts, Pipeline};
use crate::pubsub::{Message, PubSub};
use crate::resp::types::RespValue;
use crate::response::Value;
use crate::runtime;

// ── Redis ──────────────────────────────────────────────────────────

/// A synchronous client backed by a connection pool.
///
/// Cheap to clone; clones share the pool and the response-callback table.
#[derive(Debug, Clone)]
pub struct Redis {
    executor: Executor,
}

impl Redis {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Ok(Self {
            executor: Executor::new(config)?,
        })
    }

    /// ```no_run
    /// let r = resplink::Redis::from_url("redis://:secret@localhost:6379/9")?;
    /// # Ok::<(), resplink::Error>(())
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self {
            executor: Executor::from_url(url)?,
        })
    }

    pub fn from_executor(executor: Executor) -> Self {
        Self { executor }
    }

    /// The async core this client drives.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run a raw command and shape the reply through the callback table.
    pub fn execute_command<A: AsRef<[u8]>>(&self, args: &[A]) -> Result<Value> {
        runtime::block_on(self.executor.execute_command(args))
    }

    /// Run a raw command and shape a non-error reply with `shape`.
    pub fn execute_command_with<A, T, F>(&self, args: &[A], shape: F) -> Result<T>
    where
        A: AsRef<[u8]>,
        F: FnOnce(RespValue) -> Result<T>,
    {
        runtime::block_on(self.executor.execute_command_with(args, shape))
    }

    /// Override the shaping of `command` on this client (and its clones).
    pub fn set_response_callback<F>(&self, command: &str, f: F)
    where
        F: Fn(RespValue, &[Bytes]) -> Result<Value> + Send + Sync + 'static,
    {
        self.executor.set_response_callback(command, f);
    }

    pub fn pipeline(&self, transaction: bool) -> BlockingPipeline {
        BlockingPipeline {
            inner: self.executor.pipeline(transaction),
        }
    }

    /// Watch `watches`, run `body`, execute; start over on a watch conflict.
    ///
    /// `body` reads through [`BlockingPipeline::execute_command`], calls
    /// `multi()` and queues its writes. It may run many times, so it must
    /// not have effects outside the pipeline.
    ///
    /// ```no_run
    /// # let r = resplink::Redis::from_url("redis://localhost")?;
    /// r.transaction(&["counter"], |pipe| {
    ///     let current = pipe.execute_command(&["GET", "counter"])?;
    ///     let next = current.as_str().and_then(|s| s.parse::<i64>().ok()).unwrap_or(0) + 1;
    ///     pipe.multi()?;
    ///     pipe.queue(&["SET", "counter", next.to_string().as_str()]);
    ///     Ok(())
    /// })?;
    /// # Ok::<(), resplink::Error>(())
    /// ```
    pub fn transaction<A, F>(&self, watches: &[A], mut body: F) -> Result<Vec<Result<Value>>>
    where
        A: AsRef<[u8]>,
        F: FnMut(&mut BlockingPipeline) -> Result<()>,
    {
        let mut pipe = self.pipeline(true);
        let mut attempts = Attempts::new(watches);
        loop {
            runtime::block_on(attempts.begin(&mut pipe.inner))?;
            body(&mut pipe)?;
            if let Some(result) = attempts.finish(pipe.execute()) {
                return result;
            }
        }
    }

    pub fn pubsub(&self) -> BlockingPubSub {
        BlockingPubSub {
            inner: self.executor.pubsub(),
        }
    }

    /// A lock handle on `name`. Fails when `options.sleep >= options.timeout`.
    pub fn lock(&self, name: impl Into<String>, options: LockOptions) -> Result<BlockingLock> {
        Ok(BlockingLock {
            inner: self.executor.lock(name, options)?,
        })
    }

    /// Returns the number of subscribers that received `message`.
    pub fn publish(&self, channel: impl AsRef<[u8]>, message: impl AsRef<[u8]>) -> Result<i64> {
        runtime::block_on(self.executor.publish(channel, message))
    }

    /// Close pooled connections. The pool reconnects on next use.
    pub fn disconnect(&self) {
        self.executor.disconnect();
    }

    // ── Convenience commands ───────────────────────────────────────

    pub fn ping(&self) -> Result<bool> {
        self.execute_command_with(&["PING"], |r| Ok(r.is_status("PONG")))
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let args: [&[u8]; 2] = [b"GET", key.as_ref()];
        self.execute_command_with(&args, optional_bytes)
    }

    /// Plain SET; always `true` unless the server errors.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<bool> {
        let args: [&[u8]; 3] = [b"SET", key.as_ref(), value.as_ref()];
        self.execute_command_with(&args, |r| Ok(r.is_status("OK")))
    }

    pub fn setnx(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<bool> {
        let args: [&[u8]; 3] = [b"SETNX", key.as_ref(), value.as_ref()];
        self.execute_command_with(&args, |r| integer(r).map(|n| n != 0))
    }

    pub fn getset(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let args: [&[u8]; 3] = [b"GETSET", key.as_ref(), value.as_ref()];
        self.execute_command_with(&args, optional_bytes)
    }

    /// Returns the number of keys removed.
    pub fn delete<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<i64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(keys.iter().map(|k| k.as_ref()));
        self.execute_command_with(&args, integer)
    }

    pub fn expire(&self, key: impl AsRef<[u8]>, seconds: u64) -> Result<bool> {
        let mut buf = itoa::Buffer::new();
        let args: [&[u8]; 3] = [b"EXPIRE", key.as_ref(), buf.format(seconds).as_bytes()];
        self.execute_command_with(&args, |r| integer(r).map(|n| n != 0))
    }

    pub fn incr(&self, key: impl AsRef<[u8]>) -> Result<i64> {
        let args: [&[u8]; 2] = [b"INCR", key.as_ref()];
        self.execute_command_with(&args, integer)
    }
}

fn integer(reply: RespValue) -> Result<i64> {
    reply
        .as_int()
        .ok_or_else(|| Error::Type(format!("expected integer, got {}", reply.type_name())))
}

fn optional_bytes(reply: RespValue) -> Result<Option<Bytes>> {
    match reply {
        RespValue::Null => Ok(None),
        RespValue::BulkString(b) => Ok(Some(b)),
        RespValue::SimpleString(s) => Ok(Some(Bytes::from(s))),
        other => Err(Error::Type(format!("expected bulk string, got {}", other.type_name()))),
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Blocking wrapper over [`Pipeline`].
#[derive(Debug)]
pub struct BlockingPipeline {
    inner: Pipeline,
}

impl BlockingPipeline {
    /// Buffer a command; nothing is sent until [`execute`](Self::execute).
    pub fn queue<A: AsRef<[u8]>>(&mut self, args: &[A]) -> &mut Self {
        self.inner.queue(args);
        self
    }

    pub fn watch<A: AsRef<[u8]>>(&mut self, keys: &[A]) -> Result<()> {
        runtime::block_on(self.inner.watch(keys))
    }

    pub fn unwatch(&mut self) -> Result<()> {
        runtime::block_on(self.inner.unwatch())
    }

    pub fn multi(&mut self) -> Result<()> {
        self.inner.multi()
    }

    /// Run a command right away on the watched connection.
    pub fn execute_command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Value> {
        runtime::block_on(self.inner.execute_command(args))
    }

    /// Send the buffered commands; one result per command, in order.
    pub fn execute(&mut self) -> Result<Vec<Result<Value>>> {
        runtime::block_on(self.inner.execute())
    }

    pub fn reset(&mut self) -> Result<()> {
        runtime::block_on(self.inner.reset())
    }

    pub fn watching(&self) -> bool {
        self.inner.watching()
    }

    pub fn is_transaction(&self) -> bool {
        self.inner.is_transaction()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn into_inner(self) -> Pipeline {
        self.inner
    }
}

// ── PubSub ─────────────────────────────────────────────────────────

/// Blocking wrapper over [`PubSub`].
#[derive(Debug)]
pub struct BlockingPubSub {
    inner: PubSub,
}

impl BlockingPubSub {
    pub fn subscribe<A: AsRef<[u8]>>(&mut self, channels: &[A]) -> Result<Vec<Message>> {
        runtime::block_on(self.inner.subscribe(channels))
    }

    pub fn psubscribe<A: AsRef<[u8]>>(&mut self, patterns: &[A]) -> Result<Vec<Message>> {
        runtime::block_on(self.inner.psubscribe(patterns))
    }

    pub fn unsubscribe<A: AsRef<[u8]>>(&mut self, channels: &[A]) -> Result<Vec<Message>> {
        runtime::block_on(self.inner.unsubscribe(channels))
    }

    pub fn punsubscribe<A: AsRef<[u8]>>(&mut self, patterns: &[A]) -> Result<Vec<Message>> {
        runtime::block_on(self.inner.punsubscribe(patterns))
    }

    /// Block until the next push. `None` once nothing is subscribed.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        runtime::block_on(self.inner.next_message())
    }

    /// Pull messages as they arrive.
    ///
    /// Each `next()` blocks until the server pushes something. The iterator
    /// ends when no subscriptions remain; a dropped connection is yielded
    /// as one error, after which the subscriptions are gone.
    ///
    /// ```no_run
    /// # let r = resplink::Redis::from_url("redis://localhost")?;
    /// let mut ps = r.pubsub();
    /// ps.subscribe(&["news"])?;
    /// for msg in ps.listen() {
    ///     println!("{:?}", msg?.payload());
    /// }
    /// # Ok::<(), resplink::Error>(())
    /// ```
    pub fn listen(&mut self) -> Listen<'_> {
        Listen { pubsub: self }
    }

    pub fn channels(&self) -> impl Iterator<Item = &Bytes> {
        self.inner.channels()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Bytes> {
        self.inner.patterns()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.is_subscribed()
    }

    pub fn close(&mut self) {
        self.inner.close();
    }
}

/// Iterator returned by [`BlockingPubSub::listen`].
#[derive(Debug)]
pub struct Listen<'a> {
    pubsub: &'a mut BlockingPubSub,
}

impl Iterator for Listen<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pubsub.next_message().transpose()
    }
}

// ── Lock ───────────────────────────────────────────────────────────

/// Blocking wrapper over [`Lock`].
#[derive(Debug)]
pub struct BlockingLock {
    inner: Lock,
}

impl BlockingLock {
    pub fn acquire(&mut self, blocking: bool) -> Result<bool> {
        runtime::block_on(self.inner.acquire(blocking))
    }

    pub fn release(&mut self) -> Result<()> {
        runtime::block_on(self.inner.release())
    }

    /// Acquire (waiting as long as it takes) and release when the guard
    /// goes out of scope.
    pub fn guard(&mut self) -> Result<LockGuard<'_>> {
        self.acquire(true)?;
        Ok(LockGuard { lock: self })
    }

    pub fn acquired_until(&self) -> Option<f64> {
        self.inner.acquired_until()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Holds a [`BlockingLock`] for the current scope.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a mut BlockingLock,
}

impl LockGuard<'_> {
    pub fn acquired_until(&self) -> Option<f64> {
        self.lock.acquired_until()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            warn!(lock = %self.lock.name(), error = %e, "failed to release lock");
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
