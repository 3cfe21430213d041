//! Process-local store
//!
//! Used for single-instance deployments and tests. Expiry is evaluated lazily
//! on access using the tokio clock, so paused-time tests see TTLs elapse.
//! Each command purges only the key it touches; a full sweep runs every
//! `SWEEP_EVERY` commands to drop keys that are never read again.

use super::{Command, KvStore, Reply, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Commands between full expiry sweeps
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    commands_since_sweep: u64,
}

impl Entries {
    fn purge_if_expired(&mut self, key: &str, now: Instant) {
        if self.map.get(key).is_some_and(|e| e.is_expired(now)) {
            self.map.remove(key);
        }
    }

    fn maybe_sweep(&mut self, now: Instant) {
        self.commands_since_sweep += 1;
        if self.commands_since_sweep >= SWEEP_EVERY {
            self.commands_since_sweep = 0;
            self.map.retain(|_, e| !e.is_expired(now));
        }
    }
}

/// In-memory `KvStore`
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.map.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keys held in memory, expired ones included until they are purged
    #[cfg(test)]
    async fn stored_keys(&self) -> usize {
        self.entries.lock().await.map.len()
    }

    fn apply(entries: &mut Entries, command: Command) -> Result<Reply, StoreError> {
        let now = Instant::now();
        entries.maybe_sweep(now);
        entries.purge_if_expired(command.key(), now);
        let map = &mut entries.map;

        match command {
            Command::Get(key) => Ok(Reply::Value(map.get(&key).map(|e| e.value.clone()))),
            Command::Set { key, value, ttl } => {
                map.insert(
                    key,
                    Entry {
                        value,
                        expires_at: ttl.map(|ttl| now + ttl),
                    },
                );
                Ok(Reply::Ok)
            }
            Command::Incr(key) => {
                let entry = map.entry(key.clone()).or_insert_with(|| Entry {
                    value: "0".to_string(),
                    expires_at: None,
                });
                let current: i64 = entry.value.parse().map_err(|_| StoreError::Command {
                    command: format!("INCR {}", key),
                    message: "value is not an integer or out of range".to_string(),
                })?;
                let next = current.checked_add(1).ok_or_else(|| StoreError::Command {
                    command: format!("INCR {}", key),
                    message: "increment would overflow".to_string(),
                })?;
                entry.value = next.to_string();
                Ok(Reply::Int(next))
            }
            Command::Expire { key, ttl } => match map.get_mut(&key) {
                Some(entry) => {
                    entry.expires_at = Some(now + ttl);
                    Ok(Reply::Bool(true))
                }
                None => Ok(Reply::Bool(false)),
            },
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        Self::apply(&mut entries, Command::Get(key.to_string())).map(Reply::into_value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        Self::apply(
            &mut entries,
            Command::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
        )
        .map(|_| ())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().await;
        let reply = Self::apply(&mut entries, Command::Incr(key.to_string()))?;
        reply.as_int().ok_or_else(|| StoreError::UnexpectedReply {
            command: "INCR".to_string(),
            reply: format!("{:?}", reply),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        match Self::apply(
            &mut entries,
            Command::Expire {
                key: key.to_string(),
                ttl,
            },
        )? {
            Reply::Bool(existed) => Ok(existed),
            other => Err(StoreError::UnexpectedReply {
                command: "PEXPIRE".to_string(),
                reply: format!("{:?}", other),
            }),
        }
    }

    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StoreError> {
        // One lock for the whole batch, like a MULTI block
        let mut entries = self.entries.lock().await;
        commands
            .into_iter()
            .map(|command| Self::apply(&mut entries, command))
            .collect()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
