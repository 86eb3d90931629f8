//! A client for RESP (REdis Serialization Protocol) servers.
//!
//! The core is async and runs on tokio: [`Executor`] for single commands,
//! [`Pipeline`] for batches and WATCH/MULTI/EXEC transactions, [`PubSub`]
//! for subscriptions and [`Lock`] for a server-side mutex. [`Redis`] and
//! the other `Blocking*` types in [`client`] drive the same core from
//! synchronous code on a shared runtime.

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod lock;
pub mod pipeline;
pub mod pubsub;
pub mod resp;
pub mod response;
pub mod runtime;

// Re-exported for the `cmd!` macro.
pub use bytes;

pub use client::{BlockingLock, BlockingPipeline, BlockingPubSub, LockGuard, Redis};
pub use command::Command;
pub use config::{ConnectionConfig, LockOptions};
pub use connection::{ConnectionPool, PoolGuard};
pub use error::{Error, ErrorCategory, RedisErrorKind, Result};
pub use executor::Executor;
pub use lock::{Lock, LOCK_FOREVER};
pub use pipeline::{run_transaction, Pipeline};
pub use pubsub::{Message, MessageData, MessageKind, PubSub};
pub use resp::RespValue;
pub use response::{ResponseCallbacks, Value};
