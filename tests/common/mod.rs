//! Shared helpers for integration tests.
//!
//! [`MockServer`] is a small in-process RESP server running on the crate's
//! shared runtime. It implements just the commands the client core relies
//! on: strings (SET with NX/XX/EX/PX, GET, GETSET, SETNX, DEL, EXISTS,
//! EXPIRE, TTL, INCR), lists for WRONGTYPE, WATCH/MULTI/EXEC with per-key
//! versions, and pub/sub with glob patterns. No external server is needed.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use resplink::resp::{encode_value, parse, resp_frame_len, RespValue};
use resplink::{ConnectionConfig, Error};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

type Args = Vec<Vec<u8>>;

/// Handle on a running mock server. The server lives for the rest of the
/// test process.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    kill: broadcast::Sender<()>,
}

impl MockServer {
    pub fn start() -> Self {
        Self::launch(None)
    }

    /// A server that answers NOAUTH until the client sends `AUTH password`.
    pub fn with_password(password: &str) -> Self {
        Self::launch(Some(password.to_string()))
    }

    fn launch(password: Option<String>) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::new(password)));
        let (kill, _) = broadcast::channel(4);

        let shared = Arc::clone(&state);
        let killer = kill.clone();
        resplink::runtime::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            while let Ok((socket, _)) = listener.accept().await {
                shared.lock().accepted += 1;
                tokio::spawn(serve(socket, Arc::clone(&shared), killer.subscribe()));
            }
        });

        Self { addr, state, kill }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.port())
    }

    /// Client config pointing at this server with short timeouts.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".into(),
            port: self.port(),
            pool_size: 4,
            connect_timeout_ms: 1000,
            read_timeout_ms: 2000,
            ..ConnectionConfig::default()
        }
    }

    /// Every command received so far, lossily decoded.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .log
            .iter()
            .map(|args| {
                args.iter()
                    .map(|a| String::from_utf8_lossy(a).into_owned())
                    .collect()
            })
            .collect()
    }

    /// Names (uppercased) of every command received so far.
    pub fn command_names(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|c| c.first().map(|n| n.to_ascii_uppercase()))
            .collect()
    }

    /// Connections accepted since start.
    pub fn accepted(&self) -> usize {
        self.state.lock().accepted
    }

    /// Connections currently open.
    pub fn open_clients(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Drop every open client connection.
    pub fn kill_connections(&self) {
        let _ = self.kill.send(());
    }

    /// Read a string key straight from the store.
    pub fn value(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock();
        state.purge(key.as_bytes());
        match state.data.get(key.as_bytes()) {
            Some(Entry {
                value: Stored::Str(v),
                ..
            }) => Some(String::from_utf8_lossy(v).into_owned()),
            _ => None,
        }
    }

    /// Write a string key as another client would, bumping its version.
    pub fn set_value(&self, key: &str, value: &str) {
        let mut state = self.state.lock();
        state.put(key.as_bytes(), Stored::Str(value.as_bytes().to_vec()), None);
    }

    /// Remaining time to live of `key`, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock();
        state.purge(key.as_bytes());
        state
            .data
            .get(key.as_bytes())
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

// ── Connection handling ────────────────────────────────────────────

async fn serve(socket: TcpStream, state: Arc<Mutex<State>>, mut kill: broadcast::Receiver<()>) {
    let (mut reader, mut writer) = socket.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let id = state.lock().register(tx.clone());

    // Replies and pub/sub pushes share one ordered outbound queue
    let write_task = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if writer.write_all(&chunk).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::default();
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        tokio::select! {
            _ = kill.recv() => break,
            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                if !drain(&mut buf, &state, id, &mut session, &tx) {
                    break;
                }
            }
        }
    }

    state.lock().clients.remove(&id);
    drop(tx);
    let _ = write_task.await;
}

/// Answer every complete request in `buf`. False on malformed input.
fn drain(
    buf: &mut BytesMut,
    state: &Mutex<State>,
    id: u64,
    session: &mut Session,
    tx: &mpsc::UnboundedSender<Vec<u8>>,
) -> bool {
    loop {
        let len = match resp_frame_len(buf) {
            Ok(n) => n,
            Err(Error::Incomplete) => return true,
            Err(_) => return false,
        };
        let frame: Bytes = buf.split_to(len).freeze();
        let args = match parse(&frame) {
            Ok((RespValue::Array(items), _)) => items
                .into_iter()
                .filter_map(|v| v.as_bytes().map(<[u8]>::to_vec))
                .collect::<Args>(),
            _ => return false,
        };
        let replies = state.lock().dispatch(id, session, args);
        for reply in replies {
            let _ = tx.send(encode_value(&reply));
        }
    }
}

// ── Server state ───────────────────────────────────────────────────

enum Stored {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

struct Client {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    channels: BTreeSet<Vec<u8>>,
    patterns: BTreeSet<Vec<u8>>,
}

#[derive(Default)]
struct Session {
    authed: bool,
    multi: bool,
    aborted: bool,
    queued: Vec<Args>,
    watched: Vec<(Vec<u8>, u64)>,
}

struct State {
    password: Option<String>,
    data: HashMap<Vec<u8>, Entry>,
    versions: HashMap<Vec<u8>, u64>,
    clients: HashMap<u64, Client>,
    next_id: u64,
    accepted: usize,
    log: Vec<Args>,
}

/// Commands that may be queued inside MULTI.
const QUEUEABLE: &[&str] = &[
    "PING", "ECHO", "SET", "GET", "GETSET", "SETNX", "DEL", "EXISTS", "EXPIRE", "TTL", "INCR",
    "LPUSH", "RPUSH", "LRANGE", "PUBLISH", "FLUSHDB", "SELECT",
];

impl State {
    fn new(password: Option<String>) -> Self {
        Self {
            password,
            data: HashMap::new(),
            versions: HashMap::new(),
            clients: HashMap::new(),
            next_id: 0,
            accepted: 0,
            log: Vec::new(),
        }
    }

    fn register(&mut self, tx: mpsc::UnboundedSender<Vec<u8>>) -> u64 {
        self.next_id += 1;
        self.clients.insert(
            self.next_id,
            Client {
                tx,
                channels: BTreeSet::new(),
                patterns: BTreeSet::new(),
            },
        );
        self.next_id
    }

    fn dispatch(&mut self, id: u64, session: &mut Session, args: Args) -> Vec<RespValue> {
        self.log.push(args.clone());
        let Some(first) = args.first() else {
            return vec![err("ERR empty command")];
        };
        let name = String::from_utf8_lossy(first).to_ascii_uppercase();

        if self.password.is_some() && !session.authed && name != "AUTH" {
            return vec![err("NOAUTH Authentication required.")];
        }

        if session.multi {
            let reply = match name.as_str() {
                "EXEC" => self.exec(session),
                "DISCARD" => {
                    *session = Session {
                        authed: session.authed,
                        ..Session::default()
                    };
                    ok()
                }
                "MULTI" => err("ERR MULTI calls can not be nested"),
                "WATCH" => err("ERR WATCH inside MULTI is not allowed"),
                n if QUEUEABLE.contains(&n) => {
                    session.queued.push(args);
                    RespValue::SimpleString("QUEUED".into())
                }
                n => {
                    session.aborted = true;
                    unknown(n)
                }
            };
            return vec![reply];
        }

        match name.as_str() {
            "AUTH" => vec![self.auth(session, &args)],
            "SUBSCRIBE" | "PSUBSCRIBE" | "UNSUBSCRIBE" | "PUNSUBSCRIBE" => {
                self.pubsub(id, &name, &args[1..])
            }
            "WATCH" => {
                if args.len() < 2 {
                    return vec![arity(&name)];
                }
                for key in &args[1..] {
                    let version = self.version(key);
                    session.watched.push((key.clone(), version));
                }
                vec![ok()]
            }
            "UNWATCH" => {
                session.watched.clear();
                vec![ok()]
            }
            "MULTI" => {
                session.multi = true;
                vec![ok()]
            }
            "EXEC" => vec![err("ERR EXEC without MULTI")],
            "DISCARD" => vec![err("ERR DISCARD without MULTI")],
            _ => vec![self.command(&name, &args)],
        }
    }

    fn auth(&self, session: &mut Session, args: &Args) -> RespValue {
        let given = match args.len() {
            2 => &args[1],
            3 => &args[2],
            _ => return arity("AUTH"),
        };
        match &self.password {
            None => err("ERR AUTH called without any password configured for the default user."),
            Some(p) if p.as_bytes() == given.as_slice() => {
                session.authed = true;
                ok()
            }
            Some(_) => err("WRONGPASS invalid username-password pair or user is disabled."),
        }
    }

    fn exec(&mut self, session: &mut Session) -> RespValue {
        let queued = mem::take(&mut session.queued);
        let watched = mem::take(&mut session.watched);
        let aborted = session.aborted;
        session.multi = false;
        session.aborted = false;

        if aborted {
            return err("EXECABORT Transaction discarded because of previous errors.");
        }
        if watched.iter().any(|(key, v)| self.version(key) != *v) {
            return RespValue::Null;
        }
        RespValue::Array(
            queued
                .iter()
                .map(|args| {
                    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
                    self.command(&name, args)
                })
                .collect(),
        )
    }

    fn command(&mut self, name: &str, args: &Args) -> RespValue {
        let a = &args[1..];
        match name {
            "PING" => match a.first() {
                None => RespValue::SimpleString("PONG".into()),
                Some(msg) => bulk(msg),
            },
            "ECHO" if a.len() == 1 => bulk(&a[0]),
            "SELECT" if a.len() == 1 => ok(),
            "FLUSHDB" => {
                let keys: Vec<_> = self.data.keys().cloned().collect();
                for key in keys {
                    self.bump(&key);
                }
                self.data.clear();
                ok()
            }
            "SET" if a.len() >= 2 => self.set(&a[0], &a[1], &a[2..]),
            "GET" if a.len() == 1 => match self.string(&a[0]) {
                Ok(Some(v)) => bulk(&v),
                Ok(None) => RespValue::Null,
                Err(e) => e,
            },
            "GETSET" if a.len() == 2 => match self.string(&a[0]) {
                Ok(old) => {
                    self.put(&a[0], Stored::Str(a[1].clone()), None);
                    old.map_or(RespValue::Null, |v| bulk(&v))
                }
                Err(e) => e,
            },
            "SETNX" if a.len() == 2 => {
                self.purge(&a[0]);
                if self.data.contains_key(&a[0]) {
                    RespValue::Integer(0)
                } else {
                    self.put(&a[0], Stored::Str(a[1].clone()), None);
                    RespValue::Integer(1)
                }
            }
            "DEL" if !a.is_empty() => {
                let mut removed = 0;
                for key in a {
                    self.purge(key);
                    if self.data.remove(key).is_some() {
                        self.bump(key);
                        removed += 1;
                    }
                }
                RespValue::Integer(removed)
            }
            "EXISTS" if !a.is_empty() => {
                let mut n = 0;
                for key in a {
                    self.purge(key);
                    n += i64::from(self.data.contains_key(key));
                }
                RespValue::Integer(n)
            }
            "EXPIRE" if a.len() == 2 => {
                let Some(secs) = int_arg(&a[1]) else {
                    return not_an_integer();
                };
                self.purge(&a[0]);
                match self.data.get_mut(&a[0]) {
                    Some(entry) => {
                        entry.expires_at = Some(Instant::now() + Duration::from_secs(secs.max(0) as u64));
                        self.bump(&a[0]);
                        RespValue::Integer(1)
                    }
                    None => RespValue::Integer(0),
                }
            }
            "TTL" if a.len() == 1 => {
                self.purge(&a[0]);
                match self.data.get(&a[0]) {
                    None => RespValue::Integer(-2),
                    Some(Entry { expires_at: None, .. }) => RespValue::Integer(-1),
                    Some(Entry {
                        expires_at: Some(at),
                        ..
                    }) => {
                        let left = at.saturating_duration_since(Instant::now());
                        RespValue::Integer(left.as_secs_f64().ceil() as i64)
                    }
                }
            }
            "INCR" if a.len() == 1 => {
                let current = match self.string(&a[0]) {
                    Ok(v) => v,
                    Err(e) => return e,
                };
                let n = match current {
                    None => 0,
                    Some(v) => match int_arg(&v) {
                        Some(n) => n,
                        None => return not_an_integer(),
                    },
                };
                let expires_at = self.data.get(&a[0]).and_then(|e| e.expires_at);
                self.put(&a[0], Stored::Str((n + 1).to_string().into_bytes()), expires_at);
                RespValue::Integer(n + 1)
            }
            "LPUSH" | "RPUSH" if a.len() >= 2 => {
                self.purge(&a[0]);
                let entry = self.data.entry(a[0].clone()).or_insert_with(|| Entry {
                    value: Stored::List(VecDeque::new()),
                    expires_at: None,
                });
                let Stored::List(list) = &mut entry.value else {
                    return wrong_type();
                };
                for v in &a[1..] {
                    if name == "LPUSH" {
                        list.push_front(v.clone());
                    } else {
                        list.push_back(v.clone());
                    }
                }
                let len = list.len() as i64;
                self.bump(&a[0]);
                RespValue::Integer(len)
            }
            "LRANGE" if a.len() == 3 => {
                self.purge(&a[0]);
                let (Some(start), Some(stop)) = (int_arg(&a[1]), int_arg(&a[2])) else {
                    return not_an_integer();
                };
                match self.data.get(&a[0]) {
                    None => RespValue::Array(Vec::new()),
                    Some(Entry {
                        value: Stored::List(list),
                        ..
                    }) => {
                        let len = list.len() as i64;
                        let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
                        let (start, stop) = (norm(start), norm(stop).min(len - 1));
                        RespValue::Array(
                            (start..=stop)
                                .filter_map(|i| list.get(i as usize))
                                .map(|v| bulk(v))
                                .collect(),
                        )
                    }
                    Some(_) => wrong_type(),
                }
            }
            "PUBLISH" if a.len() == 2 => RespValue::Integer(self.publish(&a[0], &a[1])),
            n if QUEUEABLE.contains(&n) => arity(n),
            n => unknown(n),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8], opts: &[Vec<u8>]) -> RespValue {
        let mut nx = false;
        let mut xx = false;
        let mut ttl = None;
        let mut i = 0;
        while i < opts.len() {
            match opts[i].to_ascii_uppercase().as_slice() {
                b"NX" => nx = true,
                b"XX" => xx = true,
                unit @ (b"EX" | b"PX") => {
                    let Some(n) = opts.get(i + 1).and_then(|v| int_arg(v)).filter(|n| *n > 0) else {
                        return err("ERR invalid expire time in 'set' command");
                    };
                    ttl = Some(if unit == b"EX" {
                        Duration::from_secs(n as u64)
                    } else {
                        Duration::from_millis(n as u64)
                    });
                    i += 1;
                }
                _ => return err("ERR syntax error"),
            }
            i += 1;
        }

        self.purge(key);
        let exists = self.data.contains_key(key);
        if (nx && exists) || (xx && !exists) {
            return RespValue::Null;
        }
        self.put(key, Stored::Str(value.to_vec()), ttl.map(|d| Instant::now() + d));
        ok()
    }

    fn pubsub(&mut self, id: u64, name: &str, targets: &[Vec<u8>]) -> Vec<RespValue> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Vec::new();
        };
        let kind = name.to_ascii_lowercase();
        let (set, other) = if name.starts_with('P') {
            (&mut client.patterns, &client.channels)
        } else {
            (&mut client.channels, &client.patterns)
        };
        let ack = |target: RespValue, count: usize| {
            RespValue::Array(vec![bulk(kind.as_bytes()), target, RespValue::Integer(count as i64)])
        };

        match name {
            "SUBSCRIBE" | "PSUBSCRIBE" => {
                if targets.is_empty() {
                    return vec![arity(name)];
                }
                targets
                    .iter()
                    .map(|t| {
                        set.insert(t.clone());
                        ack(bulk(t), set.len() + other.len())
                    })
                    .collect()
            }
            _ => {
                let dropping: Vec<Vec<u8>> = if targets.is_empty() {
                    set.iter().cloned().collect()
                } else {
                    targets.to_vec()
                };
                if dropping.is_empty() {
                    return vec![ack(RespValue::Null, other.len())];
                }
                dropping
                    .into_iter()
                    .map(|t| {
                        set.remove(&t);
                        ack(bulk(&t), set.len() + other.len())
                    })
                    .collect()
            }
        }
    }

    fn publish(&mut self, channel: &[u8], message: &[u8]) -> i64 {
        let mut delivered = 0;
        for client in self.clients.values() {
            if client.channels.contains(channel) {
                let push = RespValue::Array(vec![bulk(b"message"), bulk(channel), bulk(message)]);
                if client.tx.send(encode_value(&push)).is_ok() {
                    delivered += 1;
                }
            }
            for pattern in &client.patterns {
                if glob_match(pattern, channel) {
                    let push = RespValue::Array(vec![
                        bulk(b"pmessage"),
                        bulk(pattern),
                        bulk(channel),
                        bulk(message),
                    ]);
                    if client.tx.send(encode_value(&push)).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }

    // ── Keyspace helpers ───────────────────────────────────────────

    fn purge(&mut self, key: &[u8]) {
        let expired = self
            .data
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.data.remove(key);
        }
    }

    fn string(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, RespValue> {
        self.purge(key);
        match self.data.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Stored::Str(v),
                ..
            }) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type()),
        }
    }

    fn put(&mut self, key: &[u8], value: Stored, expires_at: Option<Instant>) {
        self.data.insert(key.to_vec(), Entry { value, expires_at });
        self.bump(key);
    }

    fn version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &[u8]) {
        *self.versions.entry(key.to_vec()).or_insert(0) += 1;
    }
}

fn glob_match(pattern: &[u8], s: &[u8]) -> bool {
    match (pattern.first(), s.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], s) || (!s.is_empty() && glob_match(pattern, &s[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &s[1..]),
        (Some(p), Some(c)) if p == c => glob_match(&pattern[1..], &s[1..]),
        _ => false,
    }
}

fn int_arg(v: &[u8]) -> Option<i64> {
    std::str::from_utf8(v).ok()?.parse().ok()
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".into())
}

fn bulk(v: &[u8]) -> RespValue {
    RespValue::BulkString(Bytes::copy_from_slice(v))
}

fn err(msg: &str) -> RespValue {
    RespValue::Error(msg.into())
}

fn wrong_type() -> RespValue {
    err("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn not_an_integer() -> RespValue {
    err("ERR value is not an integer or out of range")
}

fn arity(name: &str) -> RespValue {
    RespValue::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn unknown(name: &str) -> RespValue {
    RespValue::Error(format!("ERR unknown command '{name}'"))
}

// ── Test helpers ───────────────────────────────────────────────────

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
