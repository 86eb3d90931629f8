use std::io;

// ── Error taxonomy ─────────────────────────────────────────────────
//
//  Error
//  ├── Connection / Timeout / PoolExhausted   (transport, reconnect or discard)
//  ├── Protocol                               (malformed framing, connection discarded)
//  ├── Redis { kind, message }                (server said no, connection stays healthy)
//  ├── WatchConflict                          (watched key changed, EXEC aborted)
//  ├── Config                                 (rejected at construction)
//  ├── Usage                                  (API called in the wrong state)
//  └── Type                                   (reply could not be shaped)

/// Structured server error kinds for programmatic matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// EXECABORT Transaction discarded because of previous errors
    ExecAbort,
    /// LOADING Redis is loading the dataset in memory
    Loading,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// NOSCRIPT No matching script
    NoScript,
    /// BUSY Redis is busy running a script
    Busy,
    /// NOAUTH / WRONGPASS
    Auth,
    /// Any other error prefix
    Other(String),
}

impl RedisErrorKind {
    /// Parse from a server error message (e.g. "WRONGTYPE Operation against…").
    pub fn from_error_msg(msg: &str) -> (Self, String) {
        let prefix = msg.split_whitespace().next().unwrap_or("");
        let kind = match prefix {
            "ERR" => Self::Err,
            "WRONGTYPE" => Self::WrongType,
            "EXECABORT" => Self::ExecAbort,
            "LOADING" => Self::Loading,
            "READONLY" => Self::ReadOnly,
            "NOSCRIPT" => Self::NoScript,
            "BUSY" => Self::Busy,
            "NOAUTH" | "WRONGPASS" => Self::Auth,
            "" => Self::Other("UNKNOWN".to_string()),
            other => Self::Other(other.to_string()),
        };
        (kind, msg.to_string())
    }
}

/// The coarse class of an [`Error`], used to decide between retry,
/// abort and reconfigure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Protocol,
    Server,
    Conflict,
    Configuration,
    Usage,
}

/// All error variants for resplink.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TCP / IO level errors (refused, reset, closed by peer).
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),
    /// Connect or read exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),
    /// No pool slot became free within the configured wait.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Malformed RESP data.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Parser needs more data. Control flow only; never escapes a read.
    #[error("incomplete RESP message")]
    Incomplete,
    /// The server answered with an error reply.
    #[error("redis error: {message}")]
    Redis {
        kind: RedisErrorKind,
        message: String,
    },
    /// A watched key changed between WATCH and EXEC.
    #[error("watched variable changed, transaction aborted")]
    WatchConflict,
    /// Invalid configuration, rejected at construction.
    #[error("configuration error: {0}")]
    Config(String),
    /// The API was used in a state that does not allow the call.
    #[error("usage error: {0}")]
    Usage(String),
    /// A reply could not be shaped into the requested value.
    #[error("type error: {0}")]
    Type(String),
}

impl Error {
    /// Create a server error from a raw error message, auto-parsing the kind.
    pub fn redis(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let (kind, message) = RedisErrorKind::from_error_msg(&msg);
        Self::Redis { kind, message }
    }

    /// Connection error for a peer that closed the socket mid-reply.
    pub(crate) fn closed() -> Self {
        Self::Connection(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        ))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) | Self::Timeout(_) | Self::PoolExhausted => {
                ErrorCategory::Connection
            }
            Self::Protocol(_) | Self::Incomplete => ErrorCategory::Protocol,
            Self::Redis { .. } | Self::Type(_) => ErrorCategory::Server,
            Self::WatchConflict => ErrorCategory::Conflict,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Usage(_) => ErrorCategory::Usage,
        }
    }

    /// Transport-level failure: the connection that produced it is gone.
    pub fn is_connection_error(&self) -> bool {
        self.category() == ErrorCategory::Connection
    }

    pub fn is_watch_conflict(&self) -> bool {
        matches!(self, Self::WatchConflict)
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Redis { .. })
    }

    /// The parsed server error kind, if this is a server error.
    pub fn redis_kind(&self) -> Option<&RedisErrorKind> {
        match self {
            Self::Redis { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout(e.to_string()),
            _ => Self::Connection(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Tests ──────────────────────────────────────────────────────────
