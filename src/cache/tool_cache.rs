//! JSON memoization of tool results under versioned keys
//!
//! Store failures are cache misses: the tool still runs and its result is
//! returned, it just is not remembered.

use super::tags::TagVersions;
use crate::store::StoreHandle;
use crate::telemetry::{Telemetry, in_span};
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::time::Duration;

const FEATURE: &str = "tool-cache";

/// Span/event name for a cache-miss computation
pub const COMPUTE_EVENT: &str = "tool_cache.compute";

/// Read-through cache for tool results
#[derive(Clone)]
pub struct ToolCache {
    store: StoreHandle,
    tags: TagVersions,
    telemetry: Telemetry,
}

impl ToolCache {
    pub fn new(store: StoreHandle, telemetry: Telemetry) -> Self {
        let tags = TagVersions::new(store.clone(), telemetry.clone());
        Self {
            store,
            tags,
            telemetry,
        }
    }

    /// Tag versioning over the same store
    pub fn tags(&self) -> &TagVersions {
        &self.tags
    }

    /// Fetch and decode a cached value
    ///
    /// Entries that no longer decode as `T` are treated as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = self.store.as_deref()?;
        match store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(key = key, error = %e, "Cached entry failed to decode, ignoring");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.telemetry
                    .warn_once(FEATURE, &format!("Tool cache read failed: {}", e));
                None
            }
        }
    }

    /// Store `value` under `key` for at most `ttl`
    ///
    /// Returns whether the value was written.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let Some(store) = self.store.as_deref() else {
            return false;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Tool result is not serializable, skipping cache");
                return false;
            }
        };
        match store.set(key, &raw, Some(ttl)).await {
            Ok(()) => true,
            Err(e) => {
                self.telemetry
                    .warn_once(FEATURE, &format!("Tool cache write failed: {}", e));
                false
            }
        }
    }

    /// Return the cached value for `base_key` under `tag`, or compute and cache it
    ///
    /// Errors from `compute` are returned as-is and never cached.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        tag: &str,
        base_key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.tags.versioned_key(tag, base_key).await;

        if let Some(hit) = self.get_json::<T>(&key).await {
            tracing::debug!(tag = tag, key = %key, "Tool cache hit");
            return Ok(hit);
        }

        tracing::debug!(tag = tag, key = %key, "Tool cache miss");
        // Base keys embed user queries
        let value = in_span(
            &self.telemetry,
            COMPUTE_EVENT,
            &[("tag", tag.to_string()), ("base_key", base_key.to_string())],
            &["base_key"],
            compute(),
        )
        .await?;
        self.set_json(&key, &value, ttl).await;
        Ok(value)
    }
}
