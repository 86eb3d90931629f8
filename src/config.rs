//! Connection configuration and URL parsing.
//!
//! Accepted form: `redis://[user:pass@]host[:port][/db]`. One endpoint per
//! configuration; every pool talks to exactly one server.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;

/// Full connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Optional username (Redis 6+ ACL).
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database index selected right after connecting.
    pub db: u16,
    /// Maximum number of connections the pool may hold (idle + checked out).
    pub pool_size: usize,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Read/response timeout in milliseconds (0 = no timeout, default 30s).
    ///
    /// A connection that hits it is discarded, never handed back healthy.
    pub read_timeout_ms: u64,
    /// Idle timeout in milliseconds (connections idle longer are reconnected).
    pub idle_timeout_ms: u64,
    /// How long a checkout waits for a free slot.
    ///
    /// `None` waits until one frees up, `Some(0)` fails immediately with
    /// [`Error::PoolExhausted`], `Some(n)` waits up to `n` milliseconds.
    pub pool_timeout_ms: Option<u64>,
    /// Maximum read buffer size per connection in bytes.
    pub max_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            db: 0,
            pool_size: 8,
            connect_timeout_ms: 5000,
            read_timeout_ms: 30_000,  // 30 seconds
            idle_timeout_ms: 300_000, // 5 minutes
            pool_timeout_ms: None,
            max_buffer_size: crate::connection::tcp::DEFAULT_MAX_BUF_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Parse a Redis URL into a ConnectionConfig.
    pub fn from_url(url: &str) -> Result<Self> {
        let mut config = Self::default();

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::Config(format!("invalid URL, missing ://: {url}")))?;

        match scheme {
            "redis" => {}
            "rediss" => {
                return Err(Error::Config("TLS (rediss://) is not supported".into()));
            }
            _ => return Err(Error::Config(format!("unknown URL scheme: {scheme}"))),
        }

        let (host_part, db_part) = split_path(rest);

        if let Some(db_str) = db_part {
            config.db = db_str
                .parse()
                .map_err(|_| Error::Config(format!("invalid db number: {db_str}")))?;
        }

        let host_port = if let Some((userinfo, hp)) = host_part.rsplit_once('@') {
            parse_userinfo(&mut config, userinfo);
            hp
        } else {
            host_part
        };

        let (host, port) = parse_host_port(host_port)?;
        config.host = host;
        config.port = port;
        Ok(config)
    }

    /// Reject settings no pool could honour.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be greater than 0".into()));
        }
        if self.max_buffer_size == 0 {
            return Err(Error::Config("max_buffer_size must be greater than 0".into()));
        }
        Ok(())
    }

    /// Return the address as "host:port" (IPv6 hosts are bracketed).
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when reads may block indefinitely.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

/// Settings for a [`crate::lock::Lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// How long a holder keeps the lock. `None` holds until released.
    pub timeout: Option<Duration>,
    /// Pause between attempts of a blocking acquire.
    pub sleep: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            sleep: Duration::from_millis(100),
        }
    }
}

impl LockOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    pub fn sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// A sleep at or beyond the timeout could never observe expiry.
    pub fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(Error::Config("lock timeout must be positive".into()));
            }
            if self.sleep >= timeout {
                return Err(Error::Config(format!(
                    "lock sleep ({:?}) must be shorter than its timeout ({:?})",
                    self.sleep, timeout
                )));
            }
        }
        Ok(())
    }
}

// ── URL parsing helpers ────────────────────────────────────────────

/// Split `rest` into (before_path, Some(path)) or (rest, None).
fn split_path(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('/') {
        Some((before, after)) if !after.is_empty() => (before, Some(after)),
        Some((before, _)) => (before, None),
        None => (rest, None),
    }
}

/// Parse `user:pass` or `:pass` into config.
fn parse_userinfo(config: &mut ConnectionConfig, userinfo: &str) {
    match userinfo.split_once(':') {
        Some((user, pass)) => {
            if !user.is_empty() {
                config.username = Some(user.to_string());
            }
            if !pass.is_empty() {
                config.password = Some(pass.to_string());
            }
        }
        None => {
            if !userinfo.is_empty() {
                config.password = Some(userinfo.to_string());
            }
        }
    }
}

/// Parse `host[:port]` or `[ipv6]:port`.
fn parse_host_port(s: &str) -> Result<(String, u16)> {
    let (host, port) = if let Some(inner) = s.strip_prefix('[') {
        let (h, after) = inner
            .split_once(']')
            .ok_or_else(|| Error::Config(format!("unclosed IPv6 bracket: {s}")))?;
        let port = match after.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None => DEFAULT_PORT,
        };
        (h.to_string(), port)
    } else if let Some((h, p)) = s.rsplit_once(':') {
        match p.parse::<u16>() {
            Ok(port) => (h.to_string(), port),
            // bare IPv6 without brackets
            Err(_) if h.contains(':') => (s.to_string(), DEFAULT_PORT),
            Err(_) => return Err(Error::Config(format!("invalid port: {p}"))),
        }
    } else {
        (s.to_string(), DEFAULT_PORT)
    };

    if host.is_empty() {
        return Ok(("127.0.0.1".to_string(), port));
    }
    Ok((host, port))
}

fn parse_port(p: &str) -> Result<u16> {
    p.parse()
        .map_err(|_| Error::Config(format!("invalid port: {p}")))
}

// ── Tests ──────────────────────────────────────────────────────────
