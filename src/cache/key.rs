// Cache key derivation over arbitrary request parameters
// Author: kelexine (https://github.com/kelexine)

use crate::config::CacheSettings;
use crate::error::{CacheError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Strings longer than this are replaced by their digest.
const MAX_STRING_CHARS: usize = 10_000;
/// Arrays longer than this are digested without normalising their elements.
const MAX_ARRAY_ITEMS: usize = 100;
/// Objects with more entries than this are digested without normalising their values.
const MAX_OBJECT_ENTRIES: usize = 50;
/// Normalised arrays/objects whose JSON encoding is longer than this are digested.
const MAX_ENCODED_CHARS: usize = 1_000;
/// Deeper nesting than this is refused rather than walked.
const MAX_DEPTH: usize = 64;

/// Model identifier used when the caller does not name one.
pub const DEFAULT_MODEL_ID: &str = "unknown-model";

/// `<prefix>:<sha256-hex>`; only produced by [`KeyDeriver::derive`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derives cache keys and their jail counterparts for one pair of namespaces.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    cache_prefix: String,
    jail_prefix: String,
}

impl KeyDeriver {
    pub fn new(cache_prefix: impl Into<String>, jail_prefix: impl Into<String>) -> Self {
        Self {
            cache_prefix: cache_prefix.into(),
            jail_prefix: jail_prefix.into(),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(&settings.cache_key_prefix, &settings.jail_key_prefix)
    }

    /// Derive the cache key for a request.
    ///
    /// Parameters are normalised bottom-up (nulls dropped, object keys sorted,
    /// array elements sorted, oversized values digested), wrapped together with
    /// the model id, stripped of whitespace and backslashes and hashed.
    ///
    /// Note that array element order does not contribute to the key for arrays
    /// whose normalised encoding stays under the size limit: `[1, 2]` and
    /// `[2, 1]` produce the same key.
    pub fn derive(&self, params: &Value, model_id: Option<&str>) -> Result<CacheKey> {
        let mut wrapper = Map::new();
        wrapper.insert(
            "modelId".to_string(),
            Value::String(model_id.unwrap_or(DEFAULT_MODEL_ID).to_string()),
        );
        if let Some(normalized) = normalize(params, 0)? {
            wrapper.insert("params".to_string(), normalized);
        }

        let encoded = encode(&Value::Object(wrapper))?;
        let compact: String = encoded
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\\')
            .collect();

        Ok(CacheKey(format!(
            "{}:{}",
            self.cache_prefix,
            sha256_hex(compact.as_bytes())
        )))
    }

    /// Map a cache key into the jail namespace, keeping its digest suffix.
    pub fn jail_key(&self, key: &CacheKey) -> String {
        let suffix = key
            .as_str()
            .strip_prefix(self.cache_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key.as_str());
        format!("{}:{}", self.jail_prefix, suffix)
    }
}

/// Shorten a key for log output.
pub fn truncate_for_log(key: &str, max_chars: usize) -> String {
    if key.chars().count() <= max_chars {
        return key.to_string();
    }
    let head: String = key.chars().take(max_chars).collect();
    format!("{}...", head)
}

fn normalize(value: &Value, depth: usize) -> Result<Option<Value>> {
    if depth > MAX_DEPTH {
        return Err(CacheError::KeyDerivation(format!(
            "parameters nested deeper than {} levels",
            MAX_DEPTH
        )));
    }

    match value {
        Value::Null => Ok(None),
        Value::Bool(_) | Value::Number(_) => Ok(Some(value.clone())),
        Value::String(s) => {
            if s.chars().count() > MAX_STRING_CHARS {
                Ok(Some(Value::String(sha256_hex(s.as_bytes()))))
            } else {
                Ok(Some(value.clone()))
            }
        }
        Value::Array(items) => normalize_array(items, depth).map(Some),
        Value::Object(map) => normalize_object(map, depth).map(Some),
    }
}

fn normalize_array(items: &[Value], depth: usize) -> Result<Value> {
    if items.is_empty() {
        return Ok(Value::String("[]".to_string()));
    }
    if items.len() > MAX_ARRAY_ITEMS {
        return indexed_digest(items).map(Value::String);
    }

    let mut normalized = Vec::with_capacity(items.len());
    for item in items {
        if let Some(n) = normalize(item, depth + 1)? {
            normalized.push(n);
        }
    }
    normalized.sort_by_cached_key(sort_key);

    let encoded = encode(&Value::Array(normalized))?;
    if encoded.chars().count() > MAX_ENCODED_CHARS {
        return indexed_digest(items).map(Value::String);
    }
    Ok(Value::String(encoded))
}

fn normalize_object(map: &Map<String, Value>, depth: usize) -> Result<Value> {
    let sorted: BTreeMap<&String, &Value> = map.iter().collect();
    if sorted.len() > MAX_OBJECT_ENTRIES {
        return keyed_digest(&sorted).map(Value::String);
    }

    let mut normalized = Map::new();
    for (k, v) in &sorted {
        if let Some(n) = normalize(v, depth + 1)? {
            normalized.insert((*k).clone(), n);
        }
    }

    let encoded = encode(&Value::Object(normalized))?;
    if encoded.chars().count() > MAX_ENCODED_CHARS {
        return keyed_digest(&sorted).map(Value::String);
    }
    Ok(Value::String(encoded))
}

/// Lexicographic ordering on the element's string rendering.
fn sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn indexed_digest(items: &[Value]) -> Result<String> {
    let mut hasher = Sha256::new();
    for (i, item) in items.iter().enumerate() {
        hasher.update(i.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(encode(item)?.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn keyed_digest(entries: &BTreeMap<&String, &Value>) -> Result<String> {
    let mut hasher = Sha256::new();
    for (k, v) in entries.iter().filter(|(_, v)| !v.is_null()) {
        hasher.update(k.as_bytes());
        hasher.update(b":");
        hasher.update(encode(v)?.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn encode(value: &Value) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CacheError::KeyDerivation(e.to_string()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn deriver() -> KeyDeriver {
        KeyDeriver::new("ai-cache", "ai-jail")
    }

    fn key(params: Value) -> String {
        deriver().derive(&params, Some("model-a")).unwrap().to_string()
    }

    #[test]
    fn test_key_is_deterministic() {
        let params = json!({"prompt": "hello", "temperature": 0.2, "tools": ["a", "b"]});
        assert_eq!(key(params.clone()), key(params));
    }

    #[test]
    fn test_key_format() {
        let k = key(json!({"prompt": "hi"}));
        let (prefix, hex) = k.split_once(':').unwrap();
        assert_eq!(prefix, "ai-cache");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_object_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(key(a), key(b));
    }

    #[test]
    fn test_array_order_collapses() {
        assert_eq!(key(json!({"xs": [1, 2]})), key(json!({"xs": [2, 1]})));
    }

    #[test]
    fn test_nulls_are_dropped() {
        assert_eq!(
            key(json!({"a": 1, "b": null})),
            key(json!({"a": 1}))
        );
    }

    #[test]
    fn test_model_id_changes_key() {
        let params = json!({"prompt": "hi"});
        let a = deriver().derive(&params, Some("model-a")).unwrap();
        let b = deriver().derive(&params, Some("model-b")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_model_uses_sentinel() {
        let params = json!({"prompt": "hi"});
        let implicit = deriver().derive(&params, None).unwrap();
        let explicit = deriver().derive(&params, Some(DEFAULT_MODEL_ID)).unwrap();
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn test_values_change_key() {
        assert_ne!(key(json!({"prompt": "hi"})), key(json!({"prompt": "bye"})));
        assert_ne!(key(json!({"flag": true})), key(json!({"flag": false})));
    }

    #[test]
    fn test_long_strings_are_digested() {
        let long_a = "a".repeat(MAX_STRING_CHARS + 1);
        let long_b = format!("{}b", "a".repeat(MAX_STRING_CHARS));
        assert_ne!(key(json!({"doc": long_a})), key(json!({"doc": long_b})));
        let long = "x".repeat(MAX_STRING_CHARS + 1);
        assert_eq!(key(json!({"doc": long.clone()})), key(json!({"doc": long})));
    }

    #[test]
    fn test_oversized_arrays_keep_order() {
        let forward: Vec<u32> = (0..150).collect();
        let mut backward = forward.clone();
        backward.reverse();
        assert_ne!(key(json!({"xs": forward})), key(json!({"xs": backward})));
    }

    #[test]
    fn test_arrays_with_large_encoding_keep_order() {
        let forward: Vec<String> = (0..50).map(|i| format!("{:030}", i)).collect();
        let mut backward = forward.clone();
        backward.reverse();
        assert_ne!(key(json!({"xs": forward})), key(json!({"xs": backward})));
    }

    #[test]
    fn test_wide_objects_are_digested() {
        let mut wide = Map::new();
        for i in 0..60 {
            wide.insert(format!("k{}", i), json!(i));
        }
        let mut changed = wide.clone();
        changed.insert("k7".to_string(), json!(700));

        let a = key(Value::Object(wide.clone()));
        assert_eq!(a, key(Value::Object(wide)));
        assert_ne!(a, key(Value::Object(changed)));
    }

    #[test]
    fn test_empty_array_is_distinct_from_missing() {
        assert_ne!(key(json!({"xs": []})), key(json!({})));
    }

    #[test]
    fn test_excessive_nesting_is_an_error() {
        let mut nested = json!(1);
        for _ in 0..(MAX_DEPTH + 5) {
            nested = json!([nested]);
        }
        let err = deriver().derive(&nested, None).unwrap_err();
        assert!(matches!(err, CacheError::KeyDerivation(_)));
    }

    #[test]
    fn test_jail_key_keeps_suffix() {
        let d = deriver();
        let k = d.derive(&json!({"prompt": "hi"}), None).unwrap();
        let jail = d.jail_key(&k);
        assert!(jail.starts_with("ai-jail:"));
        assert_eq!(
            jail.strip_prefix("ai-jail:"),
            k.as_str().strip_prefix("ai-cache:")
        );
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 20), "short");
        assert_eq!(truncate_for_log("ai-cache:0123456789abcdef", 8), "ai-cache...");
    }

    proptest! {
        #[test]
        fn prop_small_arrays_are_order_insensitive(xs in proptest::collection::vec(any::<i32>(), 1..20)) {
            let mut reversed = xs.clone();
            reversed.reverse();
            prop_assert_eq!(key(json!({"xs": xs})), key(json!({"xs": reversed})));
        }

        #[test]
        fn prop_derivation_is_stable(prompt in ".{0,200}", temperature in 0u8..20) {
            let params = json!({"prompt": prompt, "temperature": temperature});
            prop_assert_eq!(key(params.clone()), key(params));
        }
    }
}
