//! Per-user credential lookups
//!
//! The persistent credential store belongs to the host application; the
//! resolver only reads from it through [`CredentialStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The user's own key for `service` (a provider name or `"gateway"`)
    async fn get_user_api_key(&self, user_id: &str, service: &str) -> Result<Option<String>, CredentialError>;

    /// Custom base URL for the user's gateway key, if they set one
    async fn get_user_gateway_base_url(&self, user_id: &str) -> Result<Option<String>, CredentialError>;

    /// Whether the user lets requests fall back to the team gateway
    async fn get_user_allow_gateway_fallback(&self, user_id: &str) -> Result<bool, CredentialError>;
}

#[derive(Debug, Default)]
struct Records {
    keys: HashMap<(String, String), String>,
    gateway_base_urls: HashMap<String, String>,
    fallback_consent: HashMap<String, bool>,
}

/// In-process credential store
///
/// Users without an explicit consent record are treated as consenting.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    records: Arc<RwLock<Records>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_user_api_key(&self, user_id: &str, service: &str, key: &str) {
        self.records
            .write()
            .await
            .keys
            .insert((user_id.to_string(), service.to_string()), key.to_string());
    }

    pub async fn set_user_gateway_base_url(&self, user_id: &str, base_url: &str) {
        self.records
            .write()
            .await
            .gateway_base_urls
            .insert(user_id.to_string(), base_url.to_string());
    }

    pub async fn set_user_allow_gateway_fallback(&self, user_id: &str, allow: bool) {
        self.records
            .write()
            .await
            .fallback_consent
            .insert(user_id.to_string(), allow);
    }

    /// Make every lookup fail, as if the backing database were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CredentialError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CredentialError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_user_api_key(&self, user_id: &str, service: &str) -> Result<Option<String>, CredentialError> {
        self.check()?;
        let records = self.records.read().await;
        Ok(records
            .keys
            .get(&(user_id.to_string(), service.to_string()))
            .cloned())
    }

    async fn get_user_gateway_base_url(&self, user_id: &str) -> Result<Option<String>, CredentialError> {
        self.check()?;
        Ok(self.records.read().await.gateway_base_urls.get(user_id).cloned())
    }

    async fn get_user_allow_gateway_fallback(&self, user_id: &str) -> Result<bool, CredentialError> {
        self.check()?;
        Ok(self
            .records
            .read()
            .await
            .fallback_consent
            .get(user_id)
            .copied()
            .unwrap_or(true))
    }
}
