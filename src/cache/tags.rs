//! Cache tag versioning
//!
//! Each tag has an integer version stored at `tagver:{tag}`. Cached entries are
//! written under `{tag}:v{version}:{base_key}`; bumping the version makes every
//! earlier key unreachable without enumerating or deleting it. Orphaned keys
//! expire under their own TTL.
//!
//! Versions only ever go up. Missing or unreadable versions read as 1, and any
//! store failure degrades to version 1 instead of surfacing an error.

use crate::store::{KvStore, StoreHandle};
use crate::telemetry::Telemetry;
use futures::future::join_all;
use std::collections::BTreeMap;

/// Version reported when the store has no usable value
pub const DEFAULT_TAG_VERSION: u64 = 1;

/// Namespace prefix for version counters
pub const TAG_VERSION_PREFIX: &str = "tagver:";

const FEATURE: &str = "cache-tags";

/// Store key holding the version counter for `tag`
pub fn tag_version_key(tag: &str) -> String {
    format!("{}{}", TAG_VERSION_PREFIX, tag)
}

/// Compose a versioned cache key
pub fn format_versioned_key(tag: &str, version: u64, base_key: &str) -> String {
    format!("{}:v{}:{}", tag, version, base_key)
}

/// Interpret a stored version, falling back to the default for anything unusable
fn parse_version(raw: &str) -> u64 {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 1.0 => v.floor() as u64,
        _ => DEFAULT_TAG_VERSION,
    }
}

/// Tag version reader and bumper over an optional store
#[derive(Clone)]
pub struct TagVersions {
    store: StoreHandle,
    telemetry: Telemetry,
}

impl TagVersions {
    pub fn new(store: StoreHandle, telemetry: Telemetry) -> Self {
        Self { store, telemetry }
    }

    fn store(&self) -> Option<&dyn KvStore> {
        self.store.as_deref()
    }

    /// Current version of `tag`, 1 when absent or unavailable
    pub async fn get_tag_version(&self, tag: &str) -> u64 {
        let Some(store) = self.store() else {
            self.telemetry.warn_once(
                FEATURE,
                "Cache tag versioning unavailable: no key-value store configured",
            );
            return DEFAULT_TAG_VERSION;
        };

        match store.get(&tag_version_key(tag)).await {
            Ok(Some(raw)) => parse_version(&raw),
            Ok(None) => DEFAULT_TAG_VERSION,
            Err(e) => {
                tracing::debug!(tag = tag, error = %e, "Tag version read failed");
                self.telemetry.warn_once(
                    FEATURE,
                    &format!("Cache tag versioning degraded, store error: {}", e),
                );
                DEFAULT_TAG_VERSION
            }
        }
    }

    /// Atomically increment `tag` and return the new version
    ///
    /// A tag that has never been bumped reads as 1, so its first bump yields 2.
    /// Without a working store this is a no-op returning 1.
    pub async fn bump_tag(&self, tag: &str) -> u64 {
        let Some(store) = self.store() else {
            self.telemetry.warn_once(
                FEATURE,
                "Cache tag bump skipped: no key-value store configured",
            );
            return DEFAULT_TAG_VERSION;
        };

        let key = tag_version_key(tag);
        let mut version = match store.incr(&key).await {
            Ok(v) => v,
            Err(e) => {
                self.telemetry.warn_once(
                    FEATURE,
                    &format!("Cache tag bump failed, store error: {}", e),
                );
                return DEFAULT_TAG_VERSION;
            }
        };

        // INCR on a missing key yields 1, which readers already treat as the
        // default; bump once more so the new version is observable.
        if version <= DEFAULT_TAG_VERSION as i64 {
            version = match store.incr(&key).await {
                Ok(v) => v,
                Err(e) => {
                    self.telemetry.warn_once(
                        FEATURE,
                        &format!("Cache tag bump failed, store error: {}", e),
                    );
                    return DEFAULT_TAG_VERSION;
                }
            };
        }

        let version = u64::try_from(version).unwrap_or(DEFAULT_TAG_VERSION);
        if let Some(metrics) = self.telemetry.metrics() {
            metrics.record_tag_bump();
        }
        tracing::info!(tag = tag, version = version, "Cache tag bumped");
        version
    }

    /// Bump several tags concurrently
    pub async fn bump_tags(&self, tags: &[&str]) -> BTreeMap<String, u64> {
        let versions = join_all(tags.iter().map(|tag| self.bump_tag(tag))).await;
        tags.iter()
            .map(|tag| tag.to_string())
            .zip(versions)
            .collect()
    }

    /// Versioned key for `base_key` under the current version of `tag`
    pub async fn versioned_key(&self, tag: &str, base_key: &str) -> String {
        let version = self.get_tag_version(tag).await;
        format_versioned_key(tag, version, base_key)
    }
}
