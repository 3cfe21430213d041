//! Shared key-value store handle
//!
//! The guardrails only need a handful of Redis-style primitives: `GET`, `SET`
//! with optional TTL, atomic `INCR`, `PEXPIRE`, and a pipeline of those.
//! The store is an optional capability: callers hold an
//! `Option<Arc<dyn KvStore>>` and every consumer handles the absent case.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod upstash;

pub use memory::MemoryStore;
pub use upstash::UpstashStore;

/// Errors raised by a store backend
///
/// Consumers treat every variant as "store unavailable" and degrade; the
/// distinction only matters for logs.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unavailable(String),

    #[error("store request timed out after {0:?}")]
    Timeout(Duration),

    #[error("store returned an error for {command}: {message}")]
    Command { command: String, message: String },

    #[error("unexpected store reply for {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },
}

/// A single store command, used for pipelining
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(String),
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Incr(String),
    Expire { key: String, ttl: Duration },
}

impl Command {
    /// Command name for logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get(_) => "GET",
            Command::Set { .. } => "SET",
            Command::Incr(_) => "INCR",
            Command::Expire { .. } => "PEXPIRE",
        }
    }

    /// The key this command reads or writes
    pub fn key(&self) -> &str {
        match self {
            Command::Get(key) | Command::Incr(key) => key,
            Command::Set { key, .. } | Command::Expire { key, .. } => key,
        }
    }
}

/// Reply to a single command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `GET` result
    Value(Option<String>),
    /// `INCR` result
    Int(i64),
    /// `PEXPIRE` result (whether the key existed)
    Bool(bool),
    /// `SET` acknowledgement
    Ok,
}

impl Reply {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<String> {
        match self {
            Reply::Value(v) => v,
            _ => None,
        }
    }
}

/// Network-backed key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Atomically increment the integer at `key`, creating it at 0 first
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set a TTL on an existing key. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Execute commands in order and return one reply per command
    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StoreError>;

    /// Backend name for health output and logs
    fn name(&self) -> &'static str;
}

/// Shared, optional store handle
pub type StoreHandle = Option<Arc<dyn KvStore>>;

/// Build the store handle from configuration
///
/// Returns `None` when no REST URL/token pair is configured; consumers then
/// run unthrottled with cache versioning pinned at 1.
pub fn from_config(config: &crate::config::StoreConfig) -> StoreHandle {
    match config.credentials() {
        Some((url, token)) => match UpstashStore::new(url, token, config.timeout()) {
            Ok(store) => {
                tracing::info!(backend = "upstash", "Key-value store configured");
                Some(Arc::new(store))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Key-value store configuration is invalid, running without a store"
                );
                None
            }
        },
        None if config.in_memory => {
            tracing::info!(backend = "memory", "Using process-local key-value store");
            Some(Arc::new(MemoryStore::new()))
        }
        None => {
            tracing::warn!(
                "No key-value store configured. Rate limiting is disabled and cache tags stay at version 1"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        assert_eq!(Command::Get("k".into()).name(), "GET");
        assert_eq!(Command::Incr("k".into()).name(), "INCR");
        assert_eq!(
            Command::Expire {
                key: "k".into(),
                ttl: Duration::from_secs(1)
            }
            .name(),
            "PEXPIRE"
        );
    }

    #[test]
    fn test_reply_accessors() {
        assert_eq!(Reply::Int(3).as_int(), Some(3));
        assert_eq!(Reply::Ok.as_int(), None);
        assert_eq!(
            Reply::Value(Some("x".into())).into_value(),
            Some("x".to_string())
        );
        assert_eq!(Reply::Bool(true).into_value(), None);
    }
}
