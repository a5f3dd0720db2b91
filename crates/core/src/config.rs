//! Projecting a task payload into a base configuration.

use serde_json::Value;

/// Errors raised while resolving a key path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The path does not name an existing field
    #[error("key path `{path}` does not exist in the base config (missing `{segment}`)")]
    MissingKey {
        /// Full dot-separated path
        path: String,
        /// First segment that failed to resolve
        segment: String,
    },

    /// The path is empty or has empty segments
    #[error("invalid key path `{0}`")]
    InvalidPath(String),
}

fn segments(key_path: &str) -> Result<Vec<&str>, ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if key_path.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(ConfigError::InvalidPath(key_path.to_string()));
    }
    Ok(parts)
}

fn missing(key_path: &str, segment: &str) -> ConfigError {
    ConfigError::MissingKey {
        path: key_path.to_string(),
        segment: segment.to_string(),
    }
}

/// Check that `key_path` names an existing field of `base`.
pub fn validate_key_path(base: &Value, key_path: &str) -> Result<(), ConfigError> {
    let mut node = base;
    for segment in segments(key_path)? {
        node = match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| missing(key_path, segment))?;
    }
    Ok(())
}

/// Return a copy of `base` with the field at `key_path` replaced by `value`.
///
/// Segments are object keys; numeric segments also index arrays. The field
/// must already exist, this never inserts new keys.
pub fn merge(base: &Value, key_path: &str, value: Value) -> Result<Value, ConfigError> {
    let parts = segments(key_path)?;
    let mut merged = base.clone();

    let mut node = Some(&mut merged);
    for segment in parts {
        node = match node {
            Some(Value::Object(map)) => map.get_mut(segment),
            Some(Value::Array(items)) => segment
                .parse::<usize>()
                .ok()
                .and_then(move |i| items.get_mut(i)),
            _ => None,
        };
        if node.is_none() {
            return Err(missing(key_path, segment));
        }
    }

    if let Some(slot) = node {
        *slot = value;
    }
    Ok(merged)
}
