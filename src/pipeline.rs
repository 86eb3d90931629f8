//! Pipelines and WATCH/MULTI/EXEC transactions.
//!
//! A [`Pipeline`] buffers commands and sends them in one write, reading one
//! reply per command back in order. In transaction mode the batch goes out
//! wrapped in MULTI/EXEC.
//!
//! Session states:
//!
//! ```text
//!  Idle ──queue──▶ Buffering ──execute──▶ Idle
//!   │                  ▲
//!   └─watch─▶ Watching ┘ (multi, then queue)
//! ```
//!
//! While watching and before `multi()`, [`Pipeline::execute_command`] runs
//! immediately on the connection pinned by `watch()` so the caller can read
//! the values it is about to change. Conflicts are detected, not
//! prevented: a watched key written by someone else makes EXEC return null
//! and `execute()` fails with [`Error::WatchConflict`].

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::command::Command;
use crate::connection::pool::{ConnectionPool, PoolGuard};
use crate::connection::tcp::Connection;
use crate::error::{Error, Result};
use crate::resp::types::RespValue;
use crate::response::{shape_with, ResponseCallbacks, Value};

/// Boxed future borrowed for `'a`; the return type of transaction bodies.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One pipeline session. Single owner, reusable after every `execute()`.
#[derive(Debug)]
pub struct Pipeline {
    pool: ConnectionPool,
    callbacks: Arc<RwLock<ResponseCallbacks>>,
    transaction: bool,
    explicit_multi: bool,
    watching: bool,
    watched: Vec<Bytes>,
    queue: Vec<Command>,
    /// Held from `watch()` until the session resets.
    pinned: Option<PoolGuard>,
}

impl Pipeline {
    pub(crate) fn new(
        pool: ConnectionPool,
        callbacks: Arc<RwLock<ResponseCallbacks>>,
        transaction: bool,
    ) -> Self {
        Self {
            pool,
            callbacks,
            transaction,
            explicit_multi: false,
            watching: false,
            watched: Vec::new(),
            queue: Vec::new(),
            pinned: None,
        }
    }

    pub fn is_transaction(&self) -> bool {
        self.transaction
    }

    /// True between `watch()` and the next `execute()`, `unwatch()` or `reset()`.
    pub fn watching(&self) -> bool {
        self.watching
    }

    pub fn watched_keys(&self) -> &[Bytes] {
        &self.watched
    }

    /// True after `multi()` until the session resets.
    pub fn in_multi(&self) -> bool {
        self.explicit_multi
    }

    /// Number of buffered commands.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Buffer a command; nothing is sent until `execute()`.
    pub fn queue<A: AsRef<[u8]>>(&mut self, args: &[A]) -> &mut Self {
        self.queue.push(Command::new(args));
        self
    }

    pub fn queue_command(&mut self, cmd: Command) -> &mut Self {
        self.queue.push(cmd);
        self
    }

    /// Register `keys` with the server for conflict detection.
    ///
    /// Pins a pooled connection to this session; subsequent WATCHes add keys.
    pub async fn watch<A: AsRef<[u8]>>(&mut self, keys: &[A]) -> Result<()> {
        if self.explicit_multi {
            return Err(Error::Usage("cannot WATCH after MULTI".into()));
        }
        if keys.is_empty() {
            return Err(Error::Usage("WATCH needs at least one key".into()));
        }

        let mut cmd = Vec::with_capacity(keys.len() + 1);
        cmd.push(Bytes::from_static(b"WATCH"));
        cmd.extend(keys.iter().map(|k| Bytes::copy_from_slice(k.as_ref())));
        let cmd = Command::from_bytes(cmd);

        let reply = self.immediate(&cmd).await?;
        if let RespValue::Error(msg) = reply {
            return Err(Error::redis(msg));
        }
        self.watching = true;
        self.watched.extend(cmd.params().iter().cloned());
        Ok(())
    }

    /// Forget every watched key and release the pinned connection.
    pub async fn unwatch(&mut self) -> Result<()> {
        self.drop_desynced_pin();
        let result = match self.pinned.as_mut() {
            Some(guard) if self.watching => send_unwatch(guard).await,
            _ => Ok(()),
        };
        self.watching = false;
        self.watched.clear();
        self.pinned = None;
        result
    }

    /// Start buffering the transactional part of a watched session.
    pub fn multi(&mut self) -> Result<()> {
        if self.explicit_multi {
            return Err(Error::Usage("MULTI calls can not be nested".into()));
        }
        if !self.queue.is_empty() {
            return Err(Error::Usage(
                "commands without an initial WATCH have already been issued".into(),
            ));
        }
        self.explicit_multi = true;
        Ok(())
    }

    /// Run a command right away on the watched connection.
    ///
    /// Only valid while watching and before `multi()`; otherwise commands
    /// are buffered with [`Pipeline::queue`].
    pub async fn execute_command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Value> {
        if !self.watching || self.explicit_multi {
            return Err(Error::Usage(
                "commands run immediately only while watching and before MULTI; use queue()"
                    .into(),
            ));
        }
        let cmd = Command::new(args);
        let reply = self.immediate(&cmd).await?;
        let callback = self.callbacks.read().get(&cmd.name());
        shape_with(reply, &cmd, callback.as_deref())
    }

    /// Send every buffered command and collect one result per command.
    ///
    /// Per-command server errors come back inline. A watch conflict, an
    /// aborted transaction or a transport failure fails the whole call.
    /// The session is reset either way.
    pub async fn execute(&mut self) -> Result<Vec<Result<Value>>> {
        if self.drop_desynced_pin() {
            self.queue.clear();
            self.explicit_multi = false;
            return Err(watches_lost());
        }
        let commands = mem::take(&mut self.queue);
        let wrap = self.transaction || self.explicit_multi;
        let was_watching = self.watching;
        let pinned = self.pinned.take();
        self.explicit_multi = false;
        self.watching = false;
        self.watched.clear();

        if commands.is_empty() {
            if let Some(mut guard) = pinned {
                if was_watching {
                    send_unwatch(&mut guard).await?;
                }
            }
            return Ok(Vec::new());
        }

        let mut guard = match pinned {
            Some(guard) => guard,
            None => self.pool.get().await?,
        };

        let result = if wrap {
            self.run_transaction(guard.conn(), &commands).await
        } else {
            let result = self.run_pipeline(guard.conn(), &commands).await;
            if result.is_ok() && was_watching {
                send_unwatch(&mut guard).await?;
            }
            result
        };

        match &result {
            Err(Error::WatchConflict) => {
                debug!(commands = commands.len(), "watched key changed, transaction aborted");
            }
            Err(e) if !e.is_server_error() => {
                // Unknown how much of the batch ran; never reuse this socket
                guard.discard();
            }
            _ => {}
        }
        result
    }

    /// Clear buffered commands, watches and the MULTI flag.
    pub async fn reset(&mut self) -> Result<()> {
        self.queue.clear();
        self.explicit_multi = false;
        self.unwatch().await
    }

    async fn immediate(&mut self, cmd: &Command) -> Result<RespValue> {
        if self.drop_desynced_pin() {
            self.queue.clear();
            self.explicit_multi = false;
            return Err(watches_lost());
        }
        let guard = match self.pinned.take() {
            Some(guard) => guard,
            None => self.pool.get().await?,
        };
        // Stays pinned while the request is in flight, so a cancelled call
        // leaves it where `drop_desynced_pin` finds it.
        let guard = self.pinned.insert(guard);
        match guard.conn().execute(cmd).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                // Watches died with the connection
                guard.discard();
                self.pinned = None;
                self.watching = false;
                self.watched.clear();
                Err(e)
            }
        }
    }

    /// Discard a pinned connection that a cancelled call left owing
    /// replies. Returns true when the session's watches went with it.
    fn drop_desynced_pin(&mut self) -> bool {
        let desynced = self
            .pinned
            .as_mut()
            .is_some_and(|guard| guard.conn().has_pending_replies());
        if !desynced {
            return false;
        }
        if let Some(mut guard) = self.pinned.take() {
            debug!(watching = self.watching, "discarding pinned connection left mid-request");
            guard.discard();
        }
        self.watched.clear();
        mem::take(&mut self.watching)
    }

    /// Batch without MULTI/EXEC: one reply per command, errors inline.
    async fn run_pipeline(
        &self,
        conn: &mut Connection,
        commands: &[Command],
    ) -> Result<Vec<Result<Value>>> {
        let mut buf = Vec::new();
        for cmd in commands {
            cmd.write_to(&mut buf);
        }
        conn.send_raw(&buf, commands.len()).await?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in commands {
            replies.push(conn.read_reply().await?);
        }
        Ok(self.shape_all(commands, replies))
    }

    /// MULTI, the queued commands and EXEC in one write.
    async fn run_transaction(
        &self,
        conn: &mut Connection,
        commands: &[Command],
    ) -> Result<Vec<Result<Value>>> {
        let mut buf = Vec::new();
        Command::new(["MULTI"]).write_to(&mut buf);
        for cmd in commands {
            cmd.write_to(&mut buf);
        }
        Command::new(["EXEC"]).write_to(&mut buf);
        conn.send_raw(&buf, commands.len() + 2).await?;

        // Read every reply before interpreting any, so the connection stays
        // in step with the server whatever happens.
        let multi = conn.read_reply().await?;
        let mut queue_errors: Vec<(usize, String)> = Vec::new();
        for i in 0..commands.len() {
            match conn.read_reply().await? {
                RespValue::Error(msg) => queue_errors.push((i, msg)),
                reply if reply.is_status("QUEUED") => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "expected QUEUED, got {}",
                        other.type_name()
                    )))
                }
            }
        }
        let exec = conn.read_reply().await?;

        if let RespValue::Error(msg) = multi {
            return Err(Error::redis(msg));
        }

        let mut replies = match exec {
            RespValue::Null => return Err(Error::WatchConflict),
            RespValue::Error(msg) => return Err(Error::redis(msg)),
            RespValue::Array(items) => items,
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected EXEC reply: {}",
                    other.type_name()
                )))
            }
        };

        // Servers that execute around rejected commands leave gaps
        for (i, msg) in queue_errors {
            if replies.len() < commands.len() {
                replies.insert(i.min(replies.len()), RespValue::Error(msg));
            }
        }
        if replies.len() != commands.len() {
            return Err(Error::Protocol(format!(
                "EXEC returned {} replies for {} commands",
                replies.len(),
                commands.len()
            )));
        }
        Ok(self.shape_all(commands, replies))
    }

    fn shape_all(&self, commands: &[Command], replies: Vec<RespValue>) -> Vec<Result<Value>> {
        let table = self.callbacks.read();
        commands
            .iter()
            .zip(replies)
            .map(|(cmd, reply)| table.shape(cmd, reply))
            .collect()
    }
}

/// The watched connection was closed under a cancelled call, taking the
/// server-side watches with it.
fn watches_lost() -> Error {
    Error::Connection(std::io::Error::new(
        std::io::ErrorKind::ConnectionAborted,
        "watched connection was closed after a cancelled request",
    ))
}

async fn send_unwatch(guard: &mut PoolGuard) -> Result<()> {
    if !guard.conn().is_connected() {
        return Ok(());
    }
    match guard.conn().execute(&Command::new(["UNWATCH"])).await {
        Ok(RespValue::Error(msg)) => Err(Error::redis(msg)),
        Ok(_) => Ok(()),
        Err(e) => {
            guard.discard();
            Err(e)
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Closing the socket is the only sync way to clear server-side watches
        if self.watching {
            if let Some(guard) = self.pinned.as_mut() {
                guard.discard();
            }
        }
    }
}

/// Watch `watches`, run `body`, execute; start over on a watch conflict.
///
/// `body` may run many times, so it must not have effects outside the
/// pipeline it is given.
pub async fn run_transaction<A, F>(
    mut pipe: Pipeline,
    watches: &[A],
    mut body: F,
) -> Result<Vec<Result<Value>>>
where
    A: AsRef<[u8]>,
    F: for<'p> FnMut(&'p mut Pipeline) -> BoxFuture<'p, Result<()>>,
{
    let mut attempts = Attempts::new(watches);
    loop {
        attempts.begin(&mut pipe).await?;
        body(&mut pipe).await?;
        if let Some(result) = attempts.finish(pipe.execute().await) {
            return result;
        }
    }
}

/// The watch and retry steps around each transaction attempt. Both the
/// async driver and the blocking client loop through these.
pub(crate) struct Attempts<'w, A> {
    watches: &'w [A],
    attempt: u32,
}

impl<'w, A: AsRef<[u8]>> Attempts<'w, A> {
    pub(crate) fn new(watches: &'w [A]) -> Self {
        Self { watches, attempt: 1 }
    }

    pub(crate) async fn begin(&self, pipe: &mut Pipeline) -> Result<()> {
        if self.watches.is_empty() {
            return Ok(());
        }
        pipe.watch(self.watches).await
    }

    /// `None` when a watched key changed and the body must run again.
    pub(crate) fn finish(
        &mut self,
        result: Result<Vec<Result<Value>>>,
    ) -> Option<Result<Vec<Result<Value>>>> {
        match result {
            Err(Error::WatchConflict) => {
                self.attempt += 1;
                debug!(attempt = self.attempt, "retrying transaction after watch conflict");
                None
            }
            other => Some(other),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
