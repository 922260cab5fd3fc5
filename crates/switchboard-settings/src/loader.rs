//! Settings layering: defaults, file, environment.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::PathBuf;

use serde_json::Value;
use switchboard_core::{ApiKey, ProviderKind};
use tracing::debug;

use crate::types::Settings;

/// Directory holding the settings file and key (`~/.switchboard`).
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchboard")
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Scalar settings are replaced when the variable is set and non-empty.
/// API key variables only fill keys the settings file did not provide.
/// Invalid values are ignored.
pub fn apply_overrides_from(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = read("SWITCHBOARD_DEFAULT_PROVIDER") {
        match v.parse::<ProviderKind>() {
            Ok(kind) => settings.default_provider = kind,
            Err(_) => debug!(value = %v, "ignoring unknown SWITCHBOARD_DEFAULT_PROVIDER"),
        }
    }
    if let Some(v) = read("SWITCHBOARD_DEFAULT_MODEL") {
        settings.default_model = Some(v);
    }
    if let Some(v) = read("SWITCHBOARD_LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = read("AWS_REGION") {
        let bedrock = settings.provider_mut(ProviderKind::Bedrock);
        if bedrock.region.is_none() {
            bedrock.region = Some(v);
        }
    }

    for kind in ProviderKind::ALL {
        let Some(var) = kind.api_key_env_var() else {
            continue;
        };
        let Some(key) = read(var) else {
            continue;
        };
        let provider = settings.provider_mut(kind);
        if provider.api_key.is_none() {
            debug!(provider = %kind, var, "using API key from environment");
            provider.api_key = Some(ApiKey::new(key));
        }
    }
}
