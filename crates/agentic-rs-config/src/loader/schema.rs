//! Structural checks for a single JSON5 layer.
//!
//! Layers are partial: any section or key may be omitted, but every key that
//! is present must be known and carry the right JSON type. Range checks run
//! later on the merged config.

use crate::ConfigError;
use serde_json::{Map, Value};

/// Expected JSON shape of a leaf key.
#[derive(Debug, Clone, Copy)]
enum Kind {
    String,
    OptionalString,
    Integer,
    OptionalInteger,
    Number,
    OneOf(&'static [&'static str]),
}

const MEMORY_KEYS: &[(&str, Kind)] = &[
    ("backend", Kind::OneOf(&["local", "remote"])),
    ("path", Kind::String),
    ("dimension", Kind::Integer),
    ("retrieval_count", Kind::Integer),
    ("dedup_threshold", Kind::Number),
    ("importance_weight", Kind::Number),
    ("candidate_multiplier", Kind::Integer),
];

const REMOTE_KEYS: &[(&str, Kind)] = &[
    ("endpoint", Kind::OptionalString),
    ("api_key", Kind::OptionalString),
    ("api_key_env", Kind::String),
    ("namespace", Kind::OptionalString),
    ("timeout_ms", Kind::Integer),
    ("max_attempts", Kind::Integer),
    ("base_delay_ms", Kind::Integer),
    ("max_delay_ms", Kind::Integer),
    ("jitter_ratio", Kind::Number),
];

const EMBEDDING_KEYS: &[(&str, Kind)] = &[
    ("model", Kind::String),
    ("endpoint", Kind::String),
    ("api_key", Kind::OptionalString),
    ("api_key_env", Kind::String),
    ("dimensions", Kind::OptionalInteger),
    ("timeout_ms", Kind::Integer),
];

const CONTEXT_KEYS: &[(&str, Kind)] = &[
    ("max_context_tokens", Kind::Integer),
    ("conversation_history_length", Kind::Integer),
    ("chars_per_token", Kind::Integer),
];

/// Validate one config layer; `layer` prefixes error paths.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let root = expect_object(value, layer, "")?;
    ensure_allowed_keys(root, &["$schema", "memory", "embedding", "context"], layer, "")?;

    if let Some(value) = root.get("$schema") {
        check_kind(value, Kind::String, layer, "$schema")?;
    }
    if let Some(value) = root.get("memory") {
        let map = validate_section(value, MEMORY_KEYS, &["remote"], layer, "memory")?;
        if let Some(remote) = map.get("remote") {
            validate_section(remote, REMOTE_KEYS, &[], layer, "memory.remote")?;
        }
    }
    if let Some(value) = root.get("embedding") {
        validate_section(value, EMBEDDING_KEYS, &[], layer, "embedding")?;
    }
    if let Some(value) = root.get("context") {
        validate_section(value, CONTEXT_KEYS, &[], layer, "context")?;
    }
    Ok(())
}

/// Check an object's leaves against `keys`; `nested` names child objects
/// that the caller validates itself.
fn validate_section<'a>(
    value: &'a Value,
    keys: &[(&str, Kind)],
    nested: &[&str],
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    let map = expect_object(value, layer, path)?;
    for (key, value) in map {
        let field = join_path(path, key);
        if nested.contains(&key.as_str()) {
            continue;
        }
        match keys.iter().find(|(name, _)| name == key) {
            Some((_, kind)) => check_kind(value, *kind, layer, &field)?,
            None => return Err(invalid_field(layer, &field, "unknown key")),
        }
    }
    Ok(map)
}

fn check_kind(value: &Value, kind: Kind, layer: &str, path: &str) -> Result<(), ConfigError> {
    let (ok, expected) = match kind {
        Kind::String => (value.is_string(), "expected string".to_string()),
        Kind::OptionalString => (
            value.is_string() || value.is_null(),
            "expected string or null".to_string(),
        ),
        Kind::Integer => (value.is_u64(), "expected non-negative integer".to_string()),
        Kind::OptionalInteger => (
            value.is_u64() || value.is_null(),
            "expected non-negative integer or null".to_string(),
        ),
        Kind::Number => (value.is_number(), "expected number".to_string()),
        Kind::OneOf(choices) => (
            value.as_str().is_some_and(|choice| choices.contains(&choice)),
            format!("expected one of: {}", choices.join(", ")),
        ),
    };
    if ok {
        Ok(())
    } else {
        Err(invalid_field(layer, path, &expected))
    }
}

fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    value
        .as_object()
        .ok_or_else(|| invalid_field(layer, path, "expected object"))
}

fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    match map.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(invalid_field(layer, &join_path(path, key), "unknown key")),
        None => Ok(()),
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{path}"),
        message: message.to_string(),
    }
}
