use super::credentials::CredentialStore;
use super::hint::ModelHint;
use super::settings::ProviderSettings;
use super::{
    BaseUrlSource, DEFAULT_GATEWAY_BASE_URL, GATEWAY_SERVICE, ModelHandle, ProviderError,
    ProviderId, ResolutionPath, ResolvedProvider, base_url_host, max_output_tokens,
};
use crate::identity::Identity;
use crate::telemetry::Telemetry;
use std::sync::Arc;

/// Telemetry event emitted for every successful resolution
pub const RESOLVED_EVENT: &str = "provider.resolved";

/// Walks the credential fallback chain for a request
///
/// Order:
/// 1. the user's own gateway key (`base_url_source = user`)
/// 2. the team gateway, if configured and the user has not opted out
///    (`base_url_source = team`)
/// 3. direct providers in preference order, user key before server key
///
/// Credential-store failures are logged and treated as "nothing on this path".
#[derive(Clone)]
pub struct ProviderResolver {
    settings: Arc<ProviderSettings>,
    credentials: Arc<dyn CredentialStore>,
    telemetry: Telemetry,
}

impl ProviderResolver {
    pub fn new(
        settings: Arc<ProviderSettings>,
        credentials: Arc<dyn CredentialStore>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            settings,
            credentials,
            telemetry,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub async fn resolve(
        &self,
        identity: &Identity,
        model_hint: Option<&str>,
    ) -> Result<ResolvedProvider, ProviderError> {
        let hint = model_hint.and_then(|raw| match ModelHint::parse(raw) {
            Ok(hint) => Some(hint),
            Err(e) => {
                tracing::debug!(hint = raw, error = %e, "Ignoring model hint");
                None
            }
        });

        let mut tried = Vec::new();

        if let Some(resolved) = self.user_gateway(identity, hint.as_ref(), &mut tried).await {
            return Ok(self.finish(resolved));
        }
        if let Some(resolved) = self.team_gateway(identity, hint.as_ref(), &mut tried).await {
            return Ok(self.finish(resolved));
        }
        if let Some(resolved) = self.direct(identity, hint.as_ref(), &mut tried).await {
            return Ok(self.finish(resolved));
        }

        tracing::error!(
            identity = %identity,
            tried = ?tried,
            "No model provider credential available"
        );
        if let Some(metrics) = self.telemetry.metrics() {
            metrics.record_resolution_failure();
        }
        Err(ProviderError::NoCredential { tried })
    }

    async fn user_gateway(
        &self,
        identity: &Identity,
        hint: Option<&ModelHint>,
        tried: &mut Vec<String>,
    ) -> Option<ResolvedProvider> {
        let user_id = identity.user_id()?;
        tried.push(ResolutionPath::UserGateway.as_str().to_string());

        let key = self.user_key(user_id, GATEWAY_SERVICE).await?;
        let base_url = match self.credentials.get_user_gateway_base_url(user_id).await {
            Ok(Some(url)) if is_http_url(&url) => url,
            Ok(Some(url)) => {
                tracing::warn!(
                    base_url_host = ?base_url_host(&url),
                    "Ignoring invalid user gateway base URL"
                );
                DEFAULT_GATEWAY_BASE_URL.to_string()
            }
            Ok(None) => DEFAULT_GATEWAY_BASE_URL.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Gateway base URL lookup failed, using default");
                DEFAULT_GATEWAY_BASE_URL.to_string()
            }
        };

        Some(self.gateway(
            key,
            base_url,
            hint,
            ResolutionPath::UserGateway,
            BaseUrlSource::User,
        ))
    }

    async fn team_gateway(
        &self,
        identity: &Identity,
        hint: Option<&ModelHint>,
        tried: &mut Vec<String>,
    ) -> Option<ResolvedProvider> {
        let team = self.settings.team_gateway()?;
        tried.push(ResolutionPath::TeamGateway.as_str().to_string());

        if !self.fallback_allowed(identity).await {
            tracing::debug!(identity = %identity, "Team gateway fallback declined by user");
            return None;
        }

        Some(self.gateway(
            team.api_key.clone(),
            team.base_url.clone(),
            hint,
            ResolutionPath::TeamGateway,
            BaseUrlSource::Team,
        ))
    }

    async fn direct(
        &self,
        identity: &Identity,
        hint: Option<&ModelHint>,
        tried: &mut Vec<String>,
    ) -> Option<ResolvedProvider> {
        let hinted = hint.and_then(ModelHint::provider);

        for provider in self.settings.direct_order(hinted) {
            tried.push(provider.as_str().to_string());

            let user_key = match identity.user_id() {
                Some(user_id) => self.user_key(user_id, provider.as_str()).await,
                None => None,
            };
            let Some(key) = user_key.or_else(|| self.settings.server_key(provider).map(str::to_string))
            else {
                if hinted == Some(provider) {
                    tracing::debug!(
                        provider = provider.as_str(),
                        "Hinted provider has no credential, using fallback order"
                    );
                }
                continue;
            };

            let model_id = hint
                .and_then(|h| h.model_for(provider))
                .unwrap_or_else(|| provider.default_model().to_string());

            return Some(ResolvedProvider {
                handle: ModelHandle::new(provider.default_base_url(), model_id.clone(), key),
                provider,
                max_output_tokens: max_output_tokens(&model_id),
                model_id,
                path: ResolutionPath::Direct,
                base_url_source: None,
                headers: self.settings.attribution_headers(provider),
            });
        }

        None
    }

    fn gateway(
        &self,
        key: String,
        base_url: String,
        hint: Option<&ModelHint>,
        path: ResolutionPath,
        source: BaseUrlSource,
    ) -> ResolvedProvider {
        let model_id = hint
            .map(ModelHint::gateway_model_id)
            .unwrap_or_else(|| ProviderId::Gateway.default_model().to_string());

        ResolvedProvider {
            handle: ModelHandle::new(base_url, model_id.clone(), key),
            provider: ProviderId::Gateway,
            max_output_tokens: max_output_tokens(&model_id),
            model_id,
            path,
            base_url_source: Some(source),
            headers: Vec::new(),
        }
    }

    /// A user's key for `service`; lookup failures count as no key
    async fn user_key(&self, user_id: &str, service: &str) -> Option<String> {
        match self.credentials.get_user_api_key(user_id, service).await {
            Ok(key) => key.filter(|k| !k.trim().is_empty()),
            Err(e) => {
                tracing::warn!(service = service, error = %e, "User credential lookup failed");
                None
            }
        }
    }

    /// Consent to the team gateway; anonymous callers have no record and are allowed
    async fn fallback_allowed(&self, identity: &Identity) -> bool {
        let Some(user_id) = identity.user_id() else {
            return true;
        };
        match self.credentials.get_user_allow_gateway_fallback(user_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(error = %e, "Fallback consent lookup failed, skipping team gateway");
                false
            }
        }
    }

    fn finish(&self, resolved: ResolvedProvider) -> ResolvedProvider {
        let host = resolved.base_url_host().unwrap_or_default();
        let source = resolved.base_url_source.map(|s| s.as_str());

        tracing::info!(
            provider = resolved.provider.as_str(),
            path = resolved.path.as_str(),
            base_url_source = source,
            base_url_host = %host,
            model_id = %resolved.model_id,
            "Provider resolved"
        );
        // Direct resolutions have no base URL source; the attribute is left out
        let mut attributes = vec![
            ("provider", resolved.provider.as_str().to_string()),
            ("path", resolved.path.as_str().to_string()),
        ];
        if let Some(source) = source {
            attributes.push(("base_url_source", source.to_string()));
        }
        attributes.push(("base_url_host", host));
        attributes.push(("model_id", resolved.model_id.clone()));
        self.telemetry.record_event(RESOLVED_EVENT, &attributes);
        if let Some(metrics) = self.telemetry.metrics() {
            metrics.record_resolution(resolved.provider.as_str(), resolved.path.as_str());
        }
        resolved
    }
}

fn is_http_url(raw: &str) -> bool {
    reqwest::Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}
