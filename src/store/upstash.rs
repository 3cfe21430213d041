//! Redis-over-REST store (Upstash wire format)
//!
//! Single commands are `POST {base}` with a JSON array body such as
//! `["INCR", "tagver:flights"]` and reply `{"result": 3}` or `{"error": "..."}`.
//! Pipelines are `POST {base}/pipeline` with an array of command arrays and
//! reply with an array of result objects, one per command.

use super::{Command, KvStore, Reply, StoreError};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// REST client for an Upstash-compatible Redis endpoint
#[derive(Clone)]
pub struct UpstashStore {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    timeout: Duration,
}

impl std::fmt::Debug for UpstashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstashStore")
            .field("host", &self.base_url.host_str())
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl UpstashStore {
    /// Create a client for `base_url` authenticated with `token`
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the URL is not http(s) or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| StoreError::Unavailable(format!("invalid store URL: {}", e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(StoreError::Unavailable(format!(
                "store URL must use http or https, got '{}'",
                base_url.scheme()
            )));
        }
        if token.trim().is_empty() {
            return Err(StoreError::Unavailable(
                "store token must not be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
            timeout,
        })
    }

    fn encode(command: &Command) -> Vec<String> {
        match command {
            Command::Get(key) => vec!["GET".into(), key.clone()],
            Command::Set { key, value, ttl } => {
                let mut parts = vec!["SET".into(), key.clone(), value.clone()];
                if let Some(ttl) = ttl {
                    parts.push("PX".into());
                    parts.push(ttl.as_millis().max(1).to_string());
                }
                parts
            }
            Command::Incr(key) => vec!["INCR".into(), key.clone()],
            Command::Expire { key, ttl } => vec![
                "PEXPIRE".into(),
                key.clone(),
                ttl.as_millis().max(1).to_string(),
            ],
        }
    }

    fn decode(command: &Command, reply: RestReply) -> Result<Reply, StoreError> {
        if let Some(message) = reply.error {
            return Err(StoreError::Command {
                command: command.name().to_string(),
                message,
            });
        }

        let unexpected = |value: &Value| StoreError::UnexpectedReply {
            command: command.name().to_string(),
            reply: value.to_string(),
        };

        let value = reply.result.unwrap_or(Value::Null);
        match command {
            Command::Get(_) => match value {
                Value::Null => Ok(Reply::Value(None)),
                Value::String(s) => Ok(Reply::Value(Some(s))),
                Value::Number(n) => Ok(Reply::Value(Some(n.to_string()))),
                other => Err(unexpected(&other)),
            },
            Command::Set { .. } => match value {
                Value::String(ref s) if s.eq_ignore_ascii_case("OK") => Ok(Reply::Ok),
                other => Err(unexpected(&other)),
            },
            Command::Incr(_) => value
                .as_i64()
                .map(Reply::Int)
                .ok_or_else(|| unexpected(&value)),
            Command::Expire { .. } => value
                .as_i64()
                .map(|n| Reply::Bool(n == 1))
                .ok_or_else(|| unexpected(&value)),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        body: &impl serde::Serialize,
        what: &str,
    ) -> Result<T, StoreError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::Timeout(self.timeout)
                } else {
                    StoreError::Unavailable(format!("{} request failed: {}", what, e))
                }
            })?;

        let status = response.status();
        // Command errors come back as 400 with an `error` field, so only treat
        // auth and server failures as transport-level problems.
        if status.is_server_error() || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(StoreError::Unavailable(format!(
                "{} returned HTTP {}",
                what, status
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::UnexpectedReply {
                command: what.to_string(),
                reply: e.to_string(),
            })
    }

    async fn execute(&self, command: Command) -> Result<Reply, StoreError> {
        let reply: RestReply = self
            .post(self.base_url.clone(), &Self::encode(&command), command.name())
            .await?;
        Self::decode(&command, reply)
    }
}

#[async_trait]
impl KvStore for UpstashStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.execute(Command::Get(key.to_string()))
            .await
            .map(Reply::into_value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.execute(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        })
        .await
        .map(|_| ())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        match self.execute(Command::Incr(key.to_string())).await? {
            Reply::Int(n) => Ok(n),
            other => Err(StoreError::UnexpectedReply {
                command: "INCR".to_string(),
                reply: format!("{:?}", other),
            }),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self
            .execute(Command::Expire {
                key: key.to_string(),
                ttl,
            })
            .await?
        {
            Reply::Bool(existed) => Ok(existed),
            other => Err(StoreError::UnexpectedReply {
                command: "PEXPIRE".to_string(),
                reply: format!("{:?}", other),
            }),
        }
    }

    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StoreError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Unavailable("store URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push("pipeline");

        let body: Vec<Vec<String>> = commands.iter().map(Self::encode).collect();
        let replies: Vec<RestReply> = self.post(url, &body, "pipeline").await?;

        if replies.len() != commands.len() {
            return Err(StoreError::UnexpectedReply {
                command: "pipeline".to_string(),
                reply: format!(
                    "expected {} replies, got {}",
                    commands.len(),
                    replies.len()
                ),
            });
        }

        commands
            .iter()
            .zip(replies)
            .map(|(command, reply)| Self::decode(command, reply))
            .collect()
    }

    fn name(&self) -> &'static str {
        "upstash"
    }
}
