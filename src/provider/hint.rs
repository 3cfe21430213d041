//! Model hint parsing
//!
//! A hint is `provider/model` (e.g. `openai/gpt-4o-mini`) or a bare model
//! name. Bare names from well-known families are attributed to their
//! provider. Hints are advisory: a hint that fails to parse is dropped and
//! resolution proceeds as if none was given.

use super::ProviderId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HintError {
    #[error("model hint is empty")]
    Empty,
    #[error("model hint '{0}' is malformed")]
    Malformed(String),
    #[error("model hint names unknown provider '{0}'")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHint {
    provider: Option<ProviderId>,
    model: String,
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.chars().any(char::is_whitespace)
}

/// Provider owning a bare model name, for families with an unambiguous prefix
fn infer_provider(model: &str) -> Option<ProviderId> {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("gpt-")
        || lower.starts_with("o1")
        || lower.starts_with("o3")
        || lower.starts_with("o4")
    {
        Some(ProviderId::OpenAi)
    } else if lower.starts_with("claude") {
        Some(ProviderId::Anthropic)
    } else if lower.starts_with("grok") {
        Some(ProviderId::Xai)
    } else {
        None
    }
}

impl ModelHint {
    pub fn parse(raw: &str) -> Result<Self, HintError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(HintError::Empty);
        }

        match raw.split_once('/') {
            Some((provider, model)) => {
                if !valid_segment(provider) || !model.split('/').all(valid_segment) {
                    return Err(HintError::Malformed(raw.to_string()));
                }
                let provider = provider
                    .parse::<ProviderId>()
                    .ok()
                    .filter(ProviderId::is_direct)
                    .ok_or_else(|| HintError::UnknownProvider(provider.to_string()))?;
                Ok(Self {
                    provider: Some(provider),
                    model: model.to_string(),
                })
            }
            None => {
                if !valid_segment(raw) {
                    return Err(HintError::Malformed(raw.to_string()));
                }
                Ok(Self {
                    provider: infer_provider(raw),
                    model: raw.to_string(),
                })
            }
        }
    }

    pub fn provider(&self) -> Option<ProviderId> {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Model id to send through a gateway, which expects `provider/model`
    pub fn gateway_model_id(&self) -> String {
        match self.provider {
            // OpenRouter hints already carry a `vendor/model` id
            Some(ProviderId::OpenRouter) | None => self.model.clone(),
            Some(provider) => format!("{}/{}", provider, self.model),
        }
    }

    /// Model id to request from `provider` directly, if the hint applies to it
    pub fn model_for(&self, provider: ProviderId) -> Option<String> {
        match self.provider {
            Some(hinted) if hinted == provider => Some(self.model.clone()),
            // The aggregator serves other vendors' models under their full id
            Some(_) if provider == ProviderId::OpenRouter => Some(self.gateway_model_id()),
            Some(_) => None,
            None => Some(self.model.clone()),
        }
    }
}
