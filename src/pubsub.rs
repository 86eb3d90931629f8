//! Publish/subscribe listener on a dedicated connection.
//!
//! The listener owns one [`Connection`] outside the pool with no read
//! timeout: waiting for the next push is the normal state. Messages are
//! pulled one at a time with [`PubSub::next_message`]; there is no
//! background task. If the connection drops, the pull that notices it
//! fails with a connection error and every subscription is forgotten;
//! callers re-subscribe from scratch.

use std::collections::{BTreeSet, VecDeque};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::connection::tcp::Connection;
use crate::error::{Error, Result};
use crate::resp::types::RespValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
    Message,
    PMessage,
}

impl MessageKind {
    fn from_bytes(kind: &[u8]) -> Option<Self> {
        Some(match kind.to_ascii_lowercase().as_slice() {
            b"subscribe" => Self::Subscribe,
            b"unsubscribe" => Self::Unsubscribe,
            b"psubscribe" => Self::PSubscribe,
            b"punsubscribe" => Self::PUnsubscribe,
            b"message" => Self::Message,
            b"pmessage" => Self::PMessage,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::PSubscribe => "psubscribe",
            Self::PUnsubscribe => "punsubscribe",
            Self::Message => "message",
            Self::PMessage => "pmessage",
        }
    }
}

/// Subscription changes carry the remaining count, deliveries a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    Count(i64),
    Payload(Bytes),
}

/// One decoded push from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    /// Empty when the server reports no channel (unsubscribe from nothing).
    pub channel: Bytes,
    /// The matching pattern, for `pmessage` only.
    pub pattern: Option<Bytes>,
    pub data: MessageData,
}

impl Message {
    pub fn payload(&self) -> Option<&Bytes> {
        match &self.data {
            MessageData::Payload(p) => Some(p),
            MessageData::Count(_) => None,
        }
    }

    pub fn count(&self) -> Option<i64> {
        match self.data {
            MessageData::Count(n) => Some(n),
            MessageData::Payload(_) => None,
        }
    }

    fn from_reply(reply: RespValue) -> Result<Self> {
        let items = match reply {
            RespValue::Array(items) => items,
            RespValue::Error(msg) => return Err(Error::redis(msg)),
            other => {
                return Err(Error::Protocol(format!(
                    "expected pubsub array, got {}",
                    other.type_name()
                )))
            }
        };
        let mut items = items.into_iter();
        let kind = items
            .next()
            .as_ref()
            .and_then(RespValue::as_bytes)
            .and_then(MessageKind::from_bytes)
            .ok_or_else(|| Error::Protocol("pubsub push without a known kind".into()))?;

        let pattern = match kind {
            MessageKind::PMessage => Some(bytes_of(items.next())?),
            _ => None,
        };
        let channel = bytes_of(items.next())?;
        let data = match (kind, items.next()) {
            (MessageKind::Message | MessageKind::PMessage, Some(RespValue::BulkString(b))) => {
                MessageData::Payload(b)
            }
            (_, Some(RespValue::Integer(n))) => MessageData::Count(n),
            (_, other) => {
                return Err(Error::Protocol(format!(
                    "malformed {} push: {:?}",
                    kind.as_str(),
                    other.map(|v| v.type_name())
                )))
            }
        };
        Ok(Self {
            kind,
            channel,
            pattern,
            data,
        })
    }
}

fn bytes_of(value: Option<RespValue>) -> Result<Bytes> {
    match value {
        Some(RespValue::BulkString(b)) => Ok(b),
        Some(RespValue::SimpleString(s)) => Ok(Bytes::from(s)),
        Some(RespValue::Null) => Ok(Bytes::new()),
        other => Err(Error::Protocol(format!(
            "expected channel name, got {:?}",
            other.map(|v| v.type_name())
        ))),
    }
}

/// A subscriber session. Single owner.
#[derive(Debug)]
pub struct PubSub {
    conn: Connection,
    channels: BTreeSet<Bytes>,
    patterns: BTreeSet<Bytes>,
    /// Deliveries read while waiting for an acknowledgement.
    pending: VecDeque<Message>,
}

impl PubSub {
    pub fn new(config: &ConnectionConfig) -> Self {
        let mut conn = Connection::new(config);
        conn.set_read_timeout(None);
        Self {
            conn,
            channels: BTreeSet::new(),
            patterns: BTreeSet::new(),
            pending: VecDeque::new(),
        }
    }

    pub async fn subscribe<A: AsRef<[u8]>>(&mut self, channels: &[A]) -> Result<Vec<Message>> {
        if channels.is_empty() {
            return Err(Error::Usage("SUBSCRIBE needs at least one channel".into()));
        }
        self.request("SUBSCRIBE", channels, MessageKind::Subscribe, channels.len())
            .await
    }

    pub async fn psubscribe<A: AsRef<[u8]>>(&mut self, patterns: &[A]) -> Result<Vec<Message>> {
        if patterns.is_empty() {
            return Err(Error::Usage("PSUBSCRIBE needs at least one pattern".into()));
        }
        self.request("PSUBSCRIBE", patterns, MessageKind::PSubscribe, patterns.len())
            .await
    }

    /// Leave `channels`, or every channel when empty.
    pub async fn unsubscribe<A: AsRef<[u8]>>(&mut self, channels: &[A]) -> Result<Vec<Message>> {
        // The server acknowledges each channel dropped, or once when there
        // was nothing to drop.
        let expected = match channels.len() {
            0 => self.channels.len().max(1),
            n => n,
        };
        self.request("UNSUBSCRIBE", channels, MessageKind::Unsubscribe, expected)
            .await
    }

    /// Leave `patterns`, or every pattern when empty.
    pub async fn punsubscribe<A: AsRef<[u8]>>(&mut self, patterns: &[A]) -> Result<Vec<Message>> {
        let expected = match patterns.len() {
            0 => self.patterns.len().max(1),
            n => n,
        };
        self.request("PUNSUBSCRIBE", patterns, MessageKind::PUnsubscribe, expected)
            .await
    }

    /// The next push from the server, waiting as long as it takes.
    ///
    /// Returns `Ok(None)` once nothing is subscribed and nothing is queued.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(msg));
        }
        if !self.is_subscribed() {
            return Ok(None);
        }
        self.read_message().await.map(Some)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Bytes> {
        self.channels.iter()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Bytes> {
        self.patterns.iter()
    }

    pub fn subscription_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription_count() > 0
    }

    /// Drop the connection and every subscription with it.
    pub fn close(&mut self) {
        self.conn.disconnect();
        self.forget();
    }

    async fn request<A: AsRef<[u8]>>(
        &mut self,
        name: &'static str,
        targets: &[A],
        ack: MessageKind,
        expected: usize,
    ) -> Result<Vec<Message>> {
        let mut args = Vec::with_capacity(targets.len() + 1);
        args.push(Bytes::from_static(name.as_bytes()));
        args.extend(targets.iter().map(|t| Bytes::copy_from_slice(t.as_ref())));

        if let Err(e) = self.conn.send_command(&Command::from_bytes(args)).await {
            self.forget();
            return Err(e);
        }

        let mut acks = Vec::with_capacity(expected);
        while acks.len() < expected {
            let msg = self.read_message().await?;
            if msg.kind == ack {
                acks.push(msg);
            } else {
                self.pending.push_back(msg);
            }
        }
        debug!(
            command = name,
            channels = self.channels.len(),
            patterns = self.patterns.len(),
            "subscriptions changed"
        );
        Ok(acks)
    }

    async fn read_message(&mut self) -> Result<Message> {
        let reply = match self.conn.read_reply().await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "pubsub connection lost, subscriptions dropped");
                self.conn.disconnect();
                self.forget();
                return Err(e);
            }
        };
        let msg = Message::from_reply(reply)?;
        match msg.kind {
            MessageKind::Subscribe => {
                self.channels.insert(msg.channel.clone());
            }
            MessageKind::Unsubscribe => {
                self.channels.remove(&msg.channel);
            }
            MessageKind::PSubscribe => {
                self.patterns.insert(msg.channel.clone());
            }
            MessageKind::PUnsubscribe => {
                self.patterns.remove(&msg.channel);
            }
            MessageKind::Message | MessageKind::PMessage => {}
        }
        Ok(msg)
    }

    fn forget(&mut self) {
        self.channels.clear();
        self.patterns.clear();
        self.pending.clear();
    }
}

// ── Tests ──────────────────────────────────────────────────────────
