//! Process-wide provider settings
//!
//! Built once at startup from flat environment key/values and shared
//! read-only behind an `Arc`. Tests inject values through
//! [`ProviderSettings::from_lookup`] instead of mutating the environment.

use super::{DEFAULT_GATEWAY_BASE_URL, ProviderId};
use std::collections::HashMap;

/// Comma-separated direct provider order, e.g. `openrouter,openai`
pub const PROVIDER_PREFERENCE_ENV: &str = "PROVIDER_PREFERENCE";
pub const GATEWAY_KEY_ENV: &str = "AI_GATEWAY_API_KEY";
pub const GATEWAY_URL_ENV: &str = "AI_GATEWAY_URL";
pub const REFERER_ENV: &str = "OPENROUTER_REFERER";
pub const TITLE_ENV: &str = "OPENROUTER_TITLE";

/// Environment variable holding the server key for a direct provider
pub fn server_key_env(provider: ProviderId) -> Option<&'static str> {
    match provider {
        ProviderId::OpenAi => Some("OPENAI_API_KEY"),
        ProviderId::OpenRouter => Some("OPENROUTER_API_KEY"),
        ProviderId::Anthropic => Some("ANTHROPIC_API_KEY"),
        ProviderId::Xai => Some("XAI_API_KEY"),
        ProviderId::Gateway => None,
    }
}

/// Shared gateway operated by the team
#[derive(Clone, PartialEq, Eq)]
pub struct TeamGateway {
    pub api_key: String,
    pub base_url: String,
}

impl std::fmt::Debug for TeamGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamGateway")
            .field("api_key", &crate::telemetry::REDACTED)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    pub referer: Option<String>,
    pub title: Option<String>,
}

#[derive(Clone, Default)]
pub struct ProviderSettings {
    preference: Vec<ProviderId>,
    server_keys: HashMap<ProviderId, String>,
    team_gateway: Option<TeamGateway>,
    attribution: Attribution,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut configured: Vec<_> = self.server_keys.keys().map(|p| p.as_str()).collect();
        configured.sort_unstable();
        f.debug_struct("ProviderSettings")
            .field("preference", &self.preference)
            .field("server_keys", &configured)
            .field("team_gateway", &self.team_gateway)
            .field("attribution", &self.attribution)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a preference list, dropping unknown and duplicate entries
fn parse_preference(raw: &str) -> Vec<ProviderId> {
    let mut order = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.parse::<ProviderId>() {
            Ok(provider) if provider.is_direct() => {
                if !order.contains(&provider) {
                    order.push(provider);
                }
            }
            Ok(_) => {
                tracing::warn!(entry = entry, "Gateway is not a direct provider, ignoring in {}", PROVIDER_PREFERENCE_ENV);
            }
            Err(e) => {
                tracing::warn!(entry = entry, error = %e, "Ignoring unknown entry in {}", PROVIDER_PREFERENCE_ENV);
            }
        }
    }
    order
}

impl ProviderSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let preference = non_empty(lookup(PROVIDER_PREFERENCE_ENV))
            .map(|raw| parse_preference(&raw))
            .filter(|order| !order.is_empty())
            .unwrap_or_else(|| ProviderId::DIRECT.to_vec());

        let server_keys = ProviderId::DIRECT
            .iter()
            .filter_map(|provider| {
                let env = server_key_env(*provider)?;
                non_empty(lookup(env)).map(|key| (*provider, key))
            })
            .collect();

        let team_gateway = non_empty(lookup(GATEWAY_KEY_ENV)).map(|api_key| TeamGateway {
            api_key,
            base_url: non_empty(lookup(GATEWAY_URL_ENV))
                .unwrap_or_else(|| DEFAULT_GATEWAY_BASE_URL.to_string()),
        });

        let attribution = Attribution {
            referer: non_empty(lookup(REFERER_ENV)),
            title: non_empty(lookup(TITLE_ENV)),
        };

        let settings = Self {
            preference,
            server_keys,
            team_gateway,
            attribution,
        };
        tracing::debug!(settings = ?settings, "Provider settings loaded");
        settings
    }

    pub fn with_preference(mut self, preference: Vec<ProviderId>) -> Self {
        self.preference = preference.into_iter().filter(ProviderId::is_direct).collect();
        self
    }

    pub fn with_server_key(mut self, provider: ProviderId, key: impl Into<String>) -> Self {
        if provider.is_direct() {
            self.server_keys.insert(provider, key.into());
        }
        self
    }

    pub fn with_team_gateway(mut self, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.team_gateway = Some(TeamGateway {
            api_key: api_key.into(),
            base_url: base_url.into(),
        });
        self
    }

    pub fn with_attribution(mut self, referer: Option<String>, title: Option<String>) -> Self {
        self.attribution = Attribution { referer, title };
        self
    }

    pub fn preference(&self) -> &[ProviderId] {
        &self.preference
    }

    pub fn server_key(&self, provider: ProviderId) -> Option<&str> {
        self.server_keys.get(&provider).map(String::as_str)
    }

    pub fn team_gateway(&self) -> Option<&TeamGateway> {
        self.team_gateway.as_ref()
    }

    pub fn attribution(&self) -> &Attribution {
        &self.attribution
    }

    /// Direct providers in the order they should be tried
    ///
    /// A hinted provider moves to the front; the rest keep preference order.
    pub fn direct_order(&self, hinted: Option<ProviderId>) -> Vec<ProviderId> {
        let mut order = Vec::with_capacity(self.preference.len() + 1);
        if let Some(provider) = hinted.filter(ProviderId::is_direct) {
            order.push(provider);
        }
        for provider in &self.preference {
            if !order.contains(provider) {
                order.push(*provider);
            }
        }
        order
    }

    /// Attribution headers for `provider`, empty for providers that don't take them
    pub fn attribution_headers(&self, provider: ProviderId) -> Vec<(String, String)> {
        if !provider.supports_attribution() {
            return Vec::new();
        }
        let mut headers = Vec::new();
        if let Some(referer) = &self.attribution.referer {
            headers.push(("HTTP-Referer".to_string(), referer.clone()));
        }
        if let Some(title) = &self.attribution.title {
            headers.push(("X-Title".to_string(), title.clone()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> ProviderSettings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProviderSettings::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn test_empty_environment_uses_default_order() {
        let s = settings(&[]);
        assert_eq!(s.preference(), &ProviderId::DIRECT);
        assert!(s.team_gateway().is_none());
        assert!(s.server_key(ProviderId::OpenAi).is_none());
    }

    #[test]
    fn test_preference_drops_unknown_duplicate_and_gateway() {
        let s = settings(&[(PROVIDER_PREFERENCE_ENV, "xai, mistral,gateway,openai,xai")]);
        assert_eq!(s.preference(), &[ProviderId::Xai, ProviderId::OpenAi]);
    }

    #[test]
    fn test_blank_values_are_unset() {
        let s = settings(&[("OPENAI_API_KEY", "  "), (GATEWAY_KEY_ENV, "")]);
        assert!(s.server_key(ProviderId::OpenAi).is_none());
        assert!(s.team_gateway().is_none());
    }

    #[test]
    fn test_team_gateway_defaults_base_url() {
        let s = settings(&[(GATEWAY_KEY_ENV, "team-key")]);
        let gateway = s.team_gateway().unwrap();
        assert_eq!(gateway.base_url, DEFAULT_GATEWAY_BASE_URL);
        assert!(!format!("{:?}", s).contains("team-key"));
    }

    #[test]
    fn test_direct_order_puts_hint_first() {
        let s = settings(&[]);
        assert_eq!(
            s.direct_order(Some(ProviderId::Anthropic)),
            vec![
                ProviderId::Anthropic,
                ProviderId::OpenAi,
                ProviderId::OpenRouter,
                ProviderId::Xai
            ]
        );
        assert_eq!(s.direct_order(Some(ProviderId::Gateway)), ProviderId::DIRECT.to_vec());
    }

    #[test]
    fn test_attribution_headers_only_for_openrouter() {
        let s = settings(&[(REFERER_ENV, "https://trips.example"), (TITLE_ENV, "Trips")]);
        assert!(s.attribution_headers(ProviderId::OpenAi).is_empty());
        assert_eq!(
            s.attribution_headers(ProviderId::OpenRouter),
            vec![
                ("HTTP-Referer".to_string(), "https://trips.example".to_string()),
                ("X-Title".to_string(), "Trips".to_string()),
            ]
        );
    }
}
