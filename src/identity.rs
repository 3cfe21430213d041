//! Caller identity for guardrail decisions
//!
//! Authentication happens upstream; by the time a request reaches a guarded
//! route the auth layer has either set `x-user-id` or left it absent.
//! Anonymous callers are identified by a hash of their network address so raw
//! IPs never reach the counter store or logs.
//!
//! # Deployment
//!
//! `x-user-id`, `x-forwarded-for` and `x-real-ip` are trusted as given. The
//! service must sit behind an auth proxy that strips these headers from client
//! requests and sets them itself. Exposed directly, a client can rotate
//! `x-user-id` to get a fresh rate-limit budget on every request.

use crate::cache::hash_input_for_cache;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use std::convert::Infallible;
use std::fmt;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Address bucket for callers with no discoverable address
const UNKNOWN_ADDRESS: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Authenticated user id
    User(String),
    /// Hash of the client address
    Anonymous(String),
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Identity::User(id.into())
    }

    /// Anonymous identity for a raw client address
    pub fn anonymous_from_address(address: &str) -> Self {
        let token = hash_input_for_cache(address).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Failed to hash client address");
            UNKNOWN_ADDRESS.to_string()
        });
        Identity::Anonymous(token)
    }

    /// Derive the identity from request headers
    ///
    /// The first hop of `x-forwarded-for` wins over `x-real-ip`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(user_id) = header(USER_ID_HEADER) {
            return Identity::User(user_id.to_string());
        }

        let address = header(FORWARDED_FOR_HEADER)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| header(REAL_IP_HEADER))
            .unwrap_or(UNKNOWN_ADDRESS);

        Self::anonymous_from_address(address)
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::User(id) => Some(id),
            Identity::Anonymous(_) => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous(_))
    }

    /// Rate-limit identifier, namespaced so user ids and address hashes never collide
    pub fn partition_key(&self) -> String {
        match self {
            Identity::User(id) => format!("user:{}", id),
            Identity::Anonymous(hash) => format!("anon:{}", hash),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.partition_key())
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Identity::from_headers(&parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_user_header_wins() {
        let identity = Identity::from_headers(&headers(&[
            (USER_ID_HEADER, "user-7"),
            (FORWARDED_FOR_HEADER, "203.0.113.9"),
        ]));
        assert_eq!(identity, Identity::user("user-7"));
        assert_eq!(identity.partition_key(), "user:user-7");
    }

    #[test]
    fn test_anonymous_uses_first_forwarded_hop() {
        let forwarded = Identity::from_headers(&headers(&[(
            FORWARDED_FOR_HEADER,
            "203.0.113.9, 10.0.0.1",
        )]));
        let direct = Identity::from_headers(&headers(&[(REAL_IP_HEADER, "203.0.113.9")]));

        assert!(forwarded.is_anonymous());
        assert_eq!(forwarded, direct);
        assert!(!forwarded.partition_key().contains("203.0.113.9"));
    }

    #[test]
    fn test_missing_address_still_yields_stable_identity() {
        let a = Identity::from_headers(&HeaderMap::new());
        let b = Identity::from_headers(&headers(&[(USER_ID_HEADER, "  ")]));
        assert_eq!(a, b);
        assert!(a.partition_key().starts_with("anon:"));
        assert_eq!(a.user_id(), None);
    }
}
