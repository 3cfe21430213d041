//! Provider Resolution Engine
//!
//! Chooses the upstream model provider and credential path for a request:
//! the caller's own gateway key, then the team gateway (with consent), then
//! direct providers in preference order. The result is a [`ResolvedProvider`]
//! that is built fresh for every request and never cached.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod credentials;
pub mod hint;
pub mod resolver;
pub mod settings;

pub use credentials::{CredentialError, CredentialStore, MemoryCredentialStore};
pub use hint::{HintError, ModelHint};
pub use resolver::ProviderResolver;
pub use settings::ProviderSettings;

/// Default endpoint for a user's personal gateway key
pub const DEFAULT_GATEWAY_BASE_URL: &str = "https://ai-gateway.vercel.sh/v1";

/// Service name under which gateway keys are stored
pub const GATEWAY_SERVICE: &str = "gateway";

/// Upstream model provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    OpenRouter,
    Anthropic,
    Xai,
    Gateway,
}

impl ProviderId {
    /// Providers callable directly, in the default preference order
    pub const DIRECT: [ProviderId; 4] = [
        ProviderId::OpenAi,
        ProviderId::OpenRouter,
        ProviderId::Anthropic,
        ProviderId::Xai,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Xai => "xai",
            ProviderId::Gateway => "gateway",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "https://api.openai.com/v1",
            ProviderId::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderId::Anthropic => "https://api.anthropic.com/v1",
            ProviderId::Xai => "https://api.x.ai/v1",
            ProviderId::Gateway => DEFAULT_GATEWAY_BASE_URL,
        }
    }

    /// Model used when the request carries no applicable hint
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "gpt-4o-mini",
            ProviderId::OpenRouter => "openai/gpt-4o-mini",
            ProviderId::Anthropic => "claude-3-5-haiku-latest",
            ProviderId::Xai => "grok-3-mini",
            ProviderId::Gateway => "openai/gpt-4o-mini",
        }
    }

    /// Only the aggregator accepts `HTTP-Referer` / `X-Title` attribution
    pub fn supports_attribution(&self) -> bool {
        matches!(self, ProviderId::OpenRouter)
    }

    pub fn is_direct(&self) -> bool {
        !matches!(self, ProviderId::Gateway)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "openrouter" => Ok(ProviderId::OpenRouter),
            "anthropic" => Ok(ProviderId::Anthropic),
            "xai" => Ok(ProviderId::Xai),
            "gateway" => Ok(ProviderId::Gateway),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Which branch of the fallback chain produced the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionPath {
    UserGateway,
    TeamGateway,
    Direct,
}

impl ResolutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPath::UserGateway => "user-gateway",
            ResolutionPath::TeamGateway => "team-gateway",
            ResolutionPath::Direct => "direct",
        }
    }
}

/// Whose gateway base URL is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseUrlSource {
    User,
    Team,
}

impl BaseUrlSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseUrlSource::User => "user",
            BaseUrlSource::Team => "team",
        }
    }
}

/// Client-ready model endpoint
///
/// Holds the credential; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelHandle {
    base_url: String,
    model_id: String,
    api_key: String,
}

impl ModelHandle {
    pub fn new(base_url: impl Into<String>, model_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_id: model_id.into(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("base_url", &self.base_url)
            .field("model_id", &self.model_id)
            .field("api_key", &crate::telemetry::REDACTED)
            .finish()
    }
}

/// Outcome of provider resolution for one request
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProvider {
    #[serde(skip)]
    pub handle: ModelHandle,
    pub provider: ProviderId,
    pub model_id: String,
    pub path: ResolutionPath,
    pub base_url_source: Option<BaseUrlSource>,
    pub headers: Vec<(String, String)>,
    pub max_output_tokens: Option<u32>,
}

impl ResolvedProvider {
    /// Host of the base URL, safe to log
    pub fn base_url_host(&self) -> Option<String> {
        base_url_host(self.handle.base_url())
    }
}

pub(crate) fn base_url_host(base_url: &str) -> Option<String> {
    reqwest::Url::parse(base_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no usable model provider credential (tried: {})", .tried.join(", "))]
    NoCredential { tried: Vec<String> },
}

/// Conservative output budget for well-known model families
///
/// The provider prefix of a `provider/model` id is ignored. Unknown models get
/// no budget so the upstream default applies.
pub fn max_output_tokens(model_id: &str) -> Option<u32> {
    let model = model_id
        .rsplit_once('/')
        .map(|(_, model)| model)
        .unwrap_or(model_id)
        .to_ascii_lowercase();

    const TABLE: &[(&str, u32)] = &[
        ("gpt-4o-mini", 16_384),
        ("gpt-4o", 16_384),
        ("gpt-4.1", 32_768),
        ("gpt-5", 32_768),
        ("o3", 32_768),
        ("o4-mini", 32_768),
        ("claude-3-5-haiku", 8_192),
        ("claude-3-5-sonnet", 8_192),
        ("claude-3-7-sonnet", 16_384),
        ("claude-sonnet-4", 16_384),
        ("claude-opus-4", 16_384),
        ("grok-3-mini", 8_192),
        ("grok-3", 8_192),
        ("grok-4", 16_384),
    ];

    TABLE
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, budget)| *budget)
}
