//! Async TCP connection to a Redis server.
//!
//! Wraps a `tokio::net::TcpStream` with an integrated read buffer and
//! RESP parser. The socket is opened lazily on the first send, so a
//! connection handed out by the pool may be disconnected; it reconnects
//! (and re-runs AUTH/SELECT) the next time it is used.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::resp::parser::{parse, resp_frame_len};
use crate::resp::types::RespValue;

/// Default initial read buffer capacity (64 KB).
const DEFAULT_BUF_CAPACITY: usize = 64 * 1024;

/// Default maximum read buffer size (512 MB).
pub const DEFAULT_MAX_BUF_SIZE: usize = 512 * 1024 * 1024;

/// One socket to one server, owned by a single caller at a time.
#[derive(Debug)]
pub struct Connection {
    addr: String,
    username: Option<String>,
    password: Option<String>,
    db: u16,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    max_buf_size: usize,
    stream: Option<TcpStream>,
    /// Data read from the socket but not yet consumed by the parser.
    buf: BytesMut,
    /// Set after a timeout or a framing error; the pool discards it.
    broken: bool,
    /// Replies owed for requests already written. Nonzero when a caller
    /// stopped waiting mid-request, so the next read would be stale.
    pending: usize,
    /// Timestamp of last successful I/O (for idle checks).
    last_used: Instant,
    pub(crate) generation: u64,
}

impl Connection {
    /// A disconnected connection for the configured endpoint.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            addr: config.addr(),
            username: config.username.clone(),
            password: config.password.clone(),
            db: config.db,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            max_buf_size: config.max_buffer_size,
            stream: None,
            buf: BytesMut::new(),
            broken: false,
            pending: 0,
            last_used: Instant::now(),
            generation: 0,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// True once the connection hit a timeout or a protocol error.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// True while a written request still has unread replies.
    pub fn has_pending_replies(&self) -> bool {
        self.pending > 0
    }

    /// Flag the connection so the pool drops it instead of reusing it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
        self.disconnect();
    }

    /// `None` lets reads block until the server pushes something.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Idle for longer than `idle_timeout`.
    pub fn is_stale(&self, idle_timeout: Option<Duration>) -> bool {
        matches!(idle_timeout, Some(t) if self.last_used.elapsed() > t)
    }

    /// Open the socket and run the handshake. No-op when already connected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(self.addr.as_str()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "connection to {} timed out after {:?}",
                    self.addr, self.connect_timeout
                )))
            }
        };
        stream.set_nodelay(true).ok(); // Disable Nagle for low latency

        self.stream = Some(stream);
        self.buf = BytesMut::with_capacity(DEFAULT_BUF_CAPACITY);
        self.broken = false;
        self.last_used = Instant::now();

        if let Err(e) = self.init().await {
            self.disconnect();
            return Err(e);
        }
        debug!(addr = %self.addr, db = self.db, "connected");
        Ok(())
    }

    /// Close the socket. Safe to call on a closed connection.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!(addr = %self.addr, "disconnected");
        }
        self.buf.clear();
        self.pending = 0;
    }

    /// Send raw bytes that will produce `replies` replies, connecting first
    /// if needed.
    pub async fn send_raw(&mut self, data: &[u8], replies: usize) -> Result<()> {
        self.connect().await?;
        self.pending += replies;
        self.write_all(data).await
    }

    pub async fn send_command(&mut self, cmd: &Command) -> Result<()> {
        self.send_raw(&cmd.encode(), 1).await
    }

    /// Send a command and read its reply.
    ///
    /// A server error comes back as [`RespValue::Error`]; the caller decides
    /// whether to raise it.
    pub async fn execute(&mut self, cmd: &Command) -> Result<RespValue> {
        self.send_command(cmd).await?;
        self.read_reply().await
    }

    /// Read one complete reply, honouring the read timeout.
    ///
    /// A timeout or malformed frame marks the connection broken; a transport
    /// failure only closes it so it can reconnect on next use.
    pub async fn read_reply(&mut self) -> Result<RespValue> {
        let result = match self.read_timeout {
            Some(t) => match tokio::time::timeout(t, self.read_frame()).await {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout(format!(
                    "no reply from {} within {:?}",
                    self.addr, t
                ))),
            },
            None => self.read_frame().await,
        };
        match result {
            Ok(value) => {
                self.pending = self.pending.saturating_sub(1);
                self.last_used = Instant::now();
                Ok(value)
            }
            Err(e @ (Error::Timeout(_) | Error::Protocol(_))) => {
                self.mark_broken();
                Err(e)
            }
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Send PING and verify response.
    pub async fn ping(&mut self) -> Result<bool> {
        let response = self.execute(&Command::new(["PING"])).await?;
        Ok(response.is_status("PONG"))
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        if let Err(e) = stream.write_all(data).await {
            self.disconnect();
            return Err(e.into());
        }
        self.last_used = Instant::now();
        Ok(())
    }

    /// Wait until the buffer holds one whole frame, then parse just that frame.
    async fn read_frame(&mut self) -> Result<RespValue> {
        loop {
            if !self.buf.is_empty() {
                match resp_frame_len(&self.buf) {
                    Ok(len) => {
                        let frame = self.buf.split_to(len).freeze();
                        let (value, _) = parse(&frame)?;
                        return Ok(value);
                    }
                    Err(Error::Incomplete) => {}
                    Err(e) => return Err(e),
                }
            }

            // Need more data: ensure capacity and read from socket
            if self.buf.capacity() - self.buf.len() < 4096 {
                let new_cap = (self.buf.capacity() * 2).max(DEFAULT_BUF_CAPACITY);
                if new_cap > self.max_buf_size {
                    if self.buf.capacity() >= self.max_buf_size {
                        return Err(Error::Protocol(format!(
                            "RESP message too large: buffer would exceed {} bytes",
                            self.max_buf_size
                        )));
                    }
                    self.buf.reserve(self.max_buf_size - self.buf.len());
                } else {
                    self.buf.reserve(new_cap - self.buf.len());
                }
            }
            let stream = self.stream.as_mut().ok_or_else(not_connected)?;
            let n = stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::closed());
            }
        }
    }

    /// AUTH and SELECT on a freshly opened socket.
    async fn init(&mut self) -> Result<()> {
        if let Some(password) = self.password.clone() {
            let cmd = match self.username.clone() {
                Some(user) => Command::new(["AUTH", user.as_str(), password.as_str()]),
                None => Command::new(["AUTH", password.as_str()]),
            };
            self.handshake(&cmd, "AUTH").await?;
        }
        if self.db != 0 {
            let cmd = Command::new(["SELECT".to_string(), self.db.to_string()]);
            self.handshake(&cmd, "SELECT").await?;
        }
        Ok(())
    }

    async fn handshake(&mut self, cmd: &Command, what: &str) -> Result<()> {
        self.pending += 1;
        self.write_all(&cmd.encode()).await?;
        match self.read_reply().await? {
            RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
            RespValue::Error(msg) => Err(Error::redis(msg)),
            other => Err(Error::Protocol(format!(
                "unexpected {what} response: {}",
                other.type_name()
            ))),
        }
    }
}

fn not_connected() -> Error {
    Error::Connection(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "connection is not open",
    ))
}

// ── Tests ──────────────────────────────────────────────────────────
