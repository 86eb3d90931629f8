//! Reply shaping: decoded replies into caller-facing values.
//!
//! Every command reply goes through a shaping function picked by command
//! name. Each client owns a [`ResponseCallbacks`] table copied from the
//! default one, so overriding the shaping of a command on one client never
//! changes it for another.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::resp::types::RespValue;

/// A shaped reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Bytes),
    /// Status line such as `OK` or `QUEUED`.
    Status(String),
    List(Vec<Value>),
    /// Ordered key/value pairs (hash dumps, member/score lists).
    Pairs(Vec<(Value, Value)>),
}

impl Value {
    /// Generic conversion with no command-specific shaping.
    ///
    /// An error reply, at any depth, becomes `Err`.
    pub fn from_resp(reply: RespValue) -> Result<Self> {
        Ok(match reply {
            RespValue::SimpleString(s) => Self::Status(s),
            RespValue::Error(msg) => return Err(Error::redis(msg)),
            RespValue::Integer(i) => Self::Int(i),
            RespValue::BulkString(b) => Self::Bytes(b),
            RespValue::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_resp)
                    .collect::<Result<_>>()?,
            ),
            RespValue::Null => Self::Nil,
        })
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            Self::Status(s) => Some(s),
            _ => None,
        }
    }

    /// Integers, and bulk strings holding a decimal integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bytes(_) => self.as_str().and_then(|s| s.parse().ok()),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Bytes(_) => self.as_str().and_then(|s| s.parse().ok()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<Vec<Value>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_pairs(self) -> Option<Vec<(Value, Value)>> {
        match self {
            Self::Pairs(pairs) => Some(pairs),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Shapes a successful reply. Receives the command arguments after the name.
pub type ResponseCallback = Arc<dyn Fn(RespValue, &[Bytes]) -> Result<Value> + Send + Sync>;

// ── Stock shaping functions ────────────────────────────────────────

/// `OK` → `true`; a null reply (e.g. `SET … NX` that did not apply) → `false`.
pub fn ok_to_bool(reply: RespValue, _args: &[Bytes]) -> Result<Value> {
    match reply {
        RespValue::SimpleString(ref s) if s == "OK" => Ok(Value::Bool(true)),
        RespValue::Null => Ok(Value::Bool(false)),
        other => Value::from_resp(other),
    }
}

/// Integer reply → `n != 0`.
pub fn int_to_bool(reply: RespValue, _args: &[Bytes]) -> Result<Value> {
    match reply {
        RespValue::Integer(i) => Ok(Value::Bool(i != 0)),
        other => Value::from_resp(other),
    }
}

pub fn pong_to_bool(reply: RespValue, _args: &[Bytes]) -> Result<Value> {
    match reply {
        RespValue::SimpleString(ref s) if s == "PONG" => Ok(Value::Bool(true)),
        other => Value::from_resp(other),
    }
}

/// Bulk string holding a float (`inf` and `-inf` included) → `Float`.
pub fn to_float(reply: RespValue, _args: &[Bytes]) -> Result<Value> {
    match reply {
        RespValue::Null => Ok(Value::Nil),
        other => parse_float(&other).map(Value::Float),
    }
}

/// Flat `[k1, v1, k2, v2, …]` → `Pairs`.
pub fn to_pairs(reply: RespValue, _args: &[Bytes]) -> Result<Value> {
    let items = expect_array(reply)?;
    if items.len() % 2 != 0 {
        return Err(Error::Type(format!(
            "expected an even number of elements, got {}",
            items.len()
        )));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((Value::from_resp(k)?, Value::from_resp(v)?));
    }
    Ok(Value::Pairs(pairs))
}

/// Sorted-set ranges: member/score pairs when `WITHSCORES` was requested.
pub fn zset_range(reply: RespValue, args: &[Bytes]) -> Result<Value> {
    let with_scores = args
        .iter()
        .any(|a| a.eq_ignore_ascii_case(b"WITHSCORES"));
    if !with_scores {
        return Value::from_resp(reply);
    }
    let items = expect_array(reply)?;
    if items.len() % 2 != 0 {
        return Err(Error::Type("WITHSCORES reply has an odd length".into()));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
        pairs.push((Value::from_resp(member)?, Value::Float(parse_float(&score)?)));
    }
    Ok(Value::Pairs(pairs))
}

fn expect_array(reply: RespValue) -> Result<Vec<RespValue>> {
    match reply.into_result()? {
        RespValue::Array(items) => Ok(items),
        other => Err(Error::Type(format!("expected array, got {}", other.type_name()))),
    }
}

fn parse_float(reply: &RespValue) -> Result<f64> {
    if let Some(msg) = reply.as_error_msg() {
        return Err(Error::redis(msg));
    }
    reply
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| Error::Type(format!("expected a float, got {}", reply.type_name())))
}

// ── Callback table ─────────────────────────────────────────────────

/// Command name → shaping function. Names are stored uppercased.
#[derive(Clone)]
pub struct ResponseCallbacks {
    table: HashMap<String, ResponseCallback>,
}

impl ResponseCallbacks {
    /// A table with no entries: every reply gets generic conversion.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Replace the shaping for `command`.
    pub fn set<F>(&mut self, command: &str, f: F)
    where
        F: Fn(RespValue, &[Bytes]) -> Result<Value> + Send + Sync + 'static,
    {
        self.table.insert(command.to_ascii_uppercase(), Arc::new(f));
    }

    pub fn remove(&mut self, command: &str) -> Option<ResponseCallback> {
        self.table.remove(&command.to_ascii_uppercase())
    }

    pub fn get(&self, command: &str) -> Option<ResponseCallback> {
        self.table.get(&command.to_ascii_uppercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Raise an error reply, otherwise apply the entry for `cmd`.
    pub fn shape(&self, cmd: &Command, reply: RespValue) -> Result<Value> {
        shape_with(reply, cmd, self.table.get(&cmd.name()).map(|f| &**f))
    }
}

/// Raise an error reply, otherwise apply `f` (or generic conversion).
pub(crate) fn shape_with(
    reply: RespValue,
    cmd: &Command,
    f: Option<&(dyn Fn(RespValue, &[Bytes]) -> Result<Value> + Send + Sync)>,
) -> Result<Value> {
    if let RespValue::Error(msg) = reply {
        return Err(Error::redis(msg));
    }
    match f {
        Some(f) => f(reply, cmd.params()),
        None => Value::from_resp(reply),
    }
}

impl Default for ResponseCallbacks {
    /// A private copy of the stock table.
    fn default() -> Self {
        static DEFAULTS: OnceLock<ResponseCallbacks> = OnceLock::new();
        DEFAULTS.get_or_init(build_defaults).clone()
    }
}

impl fmt::Debug for ResponseCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.table.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ResponseCallbacks")
            .field("commands", &names)
            .finish()
    }
}

fn build_defaults() -> ResponseCallbacks {
    let mut t = ResponseCallbacks::empty();
    for name in [
        "AUTH", "BGREWRITEAOF", "BGSAVE", "FLUSHALL", "FLUSHDB", "HMSET", "LSET", "LTRIM",
        "MSET", "PSETEX", "RENAME", "SAVE", "SELECT", "SET", "SETEX", "SHUTDOWN", "SLAVEOF",
        "UNWATCH", "WATCH",
    ] {
        t.set(name, ok_to_bool);
    }
    for name in [
        "EXISTS", "EXPIRE", "EXPIREAT", "HEXISTS", "HSETNX", "MOVE", "MSETNX", "PERSIST",
        "PEXPIRE", "PEXPIREAT", "RENAMENX", "SETNX", "SISMEMBER", "SMOVE",
    ] {
        t.set(name, int_to_bool);
    }
    for name in ["HINCRBYFLOAT", "INCRBYFLOAT", "ZINCRBY", "ZSCORE"] {
        t.set(name, to_float);
    }
    for name in ["ZRANGE", "ZRANGEBYSCORE", "ZREVRANGE", "ZREVRANGEBYSCORE"] {
        t.set(name, zset_range);
    }
    t.set("HGETALL", to_pairs);
    t.set("PING", pong_to_bool);
    t
}

// ── Tests ──────────────────────────────────────────────────────────
