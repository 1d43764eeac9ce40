use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// A Metadata Cache key: lowercase hex SHA-256 of the canonical configuration
/// followed by the raw adaptor specifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataKey(String);

impl MetadataKey {
    /// Equal keys iff the configurations are equal up to object key order and
    /// the adaptor specifiers are byte-identical.
    pub fn generate(config: &Value, adaptor: &str) -> Self {
        let canonical = canonicalize(config);
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hasher.update(adaptor.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Rebuilds `value` with object keys sorted at every depth.
///
/// Array order is preserved (it is meaningful, e.g. precedence lists) and
/// scalars are left untouched. Insertion order is made explicit so the
/// result does not depend on whether `serde_json` preserves map order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key.clone(), canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
