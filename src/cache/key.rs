//! Deterministic cache key construction
//!
//! Tool results are cached under keys derived from request parameters. Two
//! requests that differ only in parameter order, string casing or array order
//! must land on the same key, so parameters are normalized before joining.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest (64 bits)
pub const INPUT_HASH_LEN: usize = 16;

/// Render one scalar for a key: strings are lowercased, everything else is
/// its JSON text
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        // Nested structures are not expected in flat params; keep them stable anyway
        other => canonical_json(other).to_lowercase(),
    }
}

/// Canonicalize a flat parameter map into a cache key
///
/// Names are sorted, null values are dropped, strings are lowercased, array
/// elements are lowercased and sorted and joined with `,`. Pairs are
/// rendered `name:value` and joined with `|`. A non-empty `prefix` is
/// prepended as `prefix:`.
///
/// ```
/// use serde_json::json;
/// use tripguard::cache::key::canonicalize_params;
///
/// let params = json!({"to": "CDG", "from": "sfo", "cabins": ["Economy", "business"]});
/// let key = canonicalize_params(params.as_object().unwrap(), Some("flights"));
/// assert_eq!(key, "flights:cabins:business,economy|from:sfo|to:cdg");
/// ```
pub fn canonicalize_params(params: &Map<String, Value>, prefix: Option<&str>) -> String {
    let mut names: Vec<&String> = params.keys().collect();
    names.sort();

    let parts: Vec<String> = names
        .into_iter()
        .filter_map(|name| {
            let value = &params[name.as_str()];
            let rendered = match value {
                Value::Null => return None,
                Value::Array(items) => {
                    let mut elements: Vec<String> = items.iter().map(scalar_text).collect();
                    elements.sort();
                    elements.join(",")
                }
                other => scalar_text(other),
            };
            Some(format!("{}:{}", name, rendered))
        })
        .collect();

    let body = parts.join("|");
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, body),
        _ => body,
    }
}

/// Builder for typed callers that do not already hold a JSON map
#[derive(Debug, Clone, Default)]
pub struct CacheParams {
    params: Map<String, Value>,
}

impl CacheParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter; `None` values are recorded as null and dropped from the key
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn key(&self, prefix: Option<&str>) -> String {
        canonicalize_params(&self.params, prefix)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.params
    }
}

/// Compact JSON with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), sorted(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// Condense a serializable value into a 16-hex-character digest
///
/// Used in lookup keys where the raw input must not be stored, such as
/// free-text location queries.
///
/// # Errors
/// Returns an error if `value` cannot be serialized to JSON.
pub fn hash_input_for_cache<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let digest = Sha256::digest(canonical_json(&value).as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(hex[..INPUT_HASH_LEN].to_string())
}
