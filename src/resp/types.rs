use std::fmt;

use bytes::Bytes;

use crate::error::{Error, Result};

/// A decoded RESP2 reply.
///
/// The null bulk string (`$-1`) and the null array (`*-1`) both decode to
/// [`RespValue::Null`]; callers never need to tell them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line, e.g. `OK` or `QUEUED`.
    SimpleString(String),
    /// Error line. The first word is the error code.
    Error(String),
    Integer(i64),
    /// Binary-safe payload.
    BulkString(Bytes),
    Array(Vec<RespValue>),
    Null,
}

impl RespValue {
    /// Turn an error reply into `Err(Error::Redis)` and pass anything else through.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Error(msg) => Err(Error::redis(msg)),
            reply => Ok(reply),
        }
    }

    pub fn as_error_msg(&self) -> Option<&str> {
        if let Self::Error(msg) = self {
            Some(msg)
        } else {
            None
        }
    }

    /// Text view of a status or bulk reply. Non-UTF-8 bulk payloads give `None`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::SimpleString(s) => Some(s.as_str()),
            Self::BulkString(b) => std::str::from_utf8(b).ok(),
            Self::Error(_) | Self::Integer(_) | Self::Array(_) | Self::Null => None,
        }
    }

    /// Raw bytes of a status or bulk reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::BulkString(b) => Some(b.as_ref()),
            Self::SimpleString(s) => Some(s.as_bytes()),
            Self::Error(_) | Self::Integer(_) | Self::Array(_) | Self::Null => None,
        }
    }

    /// Integer replies only; numeric text is not parsed.
    pub fn as_int(&self) -> Option<i64> {
        if let Self::Integer(n) = *self {
            Some(n)
        } else {
            None
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        if let Self::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::Null
    }

    /// Matches a status line exactly, such as `PONG` or `QUEUED`. A bulk
    /// string with the same text does not count.
    pub fn is_status(&self, expected: &str) -> bool {
        match self {
            Self::SimpleString(s) => s == expected,
            _ => false,
        }
    }

    /// Short name of the reply shape, used in type and protocol errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "status",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk",
            Self::Array(_) => "array",
            Self::Null => "nil",
        }
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SimpleString(s) => f.write_str(s),
            Self::Error(msg) => write!(f, "(error) {msg}"),
            Self::Integer(n) => write!(f, "(integer) {n}"),
            Self::BulkString(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Null => f.write_str("(nil)"),
        }
    }
}
