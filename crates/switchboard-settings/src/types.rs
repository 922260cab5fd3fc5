//! Settings schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use switchboard_core::{ApiKey, ProviderConfig, ProviderKind};

use crate::errors::{Result, SettingsError};

/// Top-level settings document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Backend used when the host does not name one.
    pub default_provider: ProviderKind,
    /// Model override for the default backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    /// Log level passed to telemetry setup.
    pub log_level: String,
    /// Per-backend settings.
    pub providers: BTreeMap<ProviderKind, ProviderSettings>,
    /// Resilience tuning.
    pub resilience: ResilienceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::Anthropic,
            default_model: None,
            log_level: "info".to_string(),
            providers: BTreeMap::new(),
            resilience: ResilienceSettings::default(),
        }
    }
}

impl Settings {
    /// Settings for `kind`, empty when not configured.
    pub fn provider(&self, kind: ProviderKind) -> ProviderSettings {
        self.providers.get(&kind).cloned().unwrap_or_default()
    }

    /// Mutable settings for `kind`, inserted when missing.
    pub fn provider_mut(&mut self, kind: ProviderKind) -> &mut ProviderSettings {
        self.providers.entry(kind).or_default()
    }

    /// Registry input for `kind`.
    pub fn provider_config(&self, kind: ProviderKind) -> ProviderConfig {
        let mut config = self.provider(kind).to_config(kind);
        if kind == self.default_provider && config.model.is_none() {
            config.model.clone_from(&self.default_model);
        }
        config
    }

    /// Registry input for the default backend.
    pub fn default_provider_config(&self) -> ProviderConfig {
        self.provider_config(self.default_provider)
    }

    /// Reject values no consumer can act on.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(SettingsError::InvalidValue(format!("unknown log level `{}`", self.log_level)));
        }
        Ok(())
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Settings for one backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Decrypted key. Only ever written to disk as `encryptedApiKey`.
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
    /// Ciphertext as stored on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_api_key: Option<String>,
    /// Model for this backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Endpoint override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Cloud region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// API version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Extra request headers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
}

impl ProviderSettings {
    /// Convert into registry input.
    pub fn to_config(&self, kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            kind,
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            region: self.region.clone(),
            api_version: self.api_version.clone(),
            extra_headers: self.extra_headers.clone(),
        }
    }
}

/// Tuning knobs for the resilience wrapper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceSettings {
    /// System prompts shorter than this may classify a call as a side call.
    pub side_call_system_chars: usize,
    /// Output budgets at or below this may classify a call as a side call.
    pub side_call_max_tokens: u32,
    /// Base delay before a capacity retry.
    pub capacity_backoff_ms: u64,
    /// Ceiling on the capacity retry delay.
    pub max_backoff_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            side_call_system_chars: 1_500,
            side_call_max_tokens: 2_048,
            capacity_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}
