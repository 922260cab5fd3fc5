//! Settings persistence.

use std::path::{Path, PathBuf};

use serde_json::Value;
use switchboard_core::ApiKey;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::loader::{apply_env_overrides, deep_merge, settings_dir};
use crate::secrets;
use crate::types::Settings;

/// Load and save settings. Implementations own encryption at rest.
pub trait SettingsStore: Send + Sync {
    /// Settings with API keys decrypted.
    fn load(&self) -> Result<Settings>;

    /// Persist settings, encrypting API keys.
    fn save(&self, settings: &Settings) -> Result<()>;
}

/// JSON file store with a sibling key file.
#[derive(Clone, Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    key_path: PathBuf,
    use_env: bool,
}

impl FileSettingsStore {
    /// Store at `~/.switchboard/settings.json`.
    pub fn default_location() -> Self {
        Self::new(settings_dir().join("settings.json"))
    }

    /// Store at `path`; the key lives next to it as `secret.key`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key_path = path
            .parent()
            .map_or_else(|| PathBuf::from("secret.key"), |dir| dir.join("secret.key"));
        Self {
            path,
            key_path,
            use_env: true,
        }
    }

    /// Skip environment overrides on load.
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Settings file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_merged(&self) -> Result<Settings> {
        let defaults = serde_json::to_value(Settings::default())?;
        let merged = if self.path.exists() {
            debug!(path = ?self.path, "loading settings from file");
            let content = std::fs::read_to_string(&self.path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        } else {
            debug!(path = ?self.path, "settings file not found, using defaults");
            defaults
        };
        Ok(serde_json::from_value(merged)?)
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<Settings> {
        let mut settings = self.read_merged()?;

        let has_ciphertext = settings.providers.values().any(|p| p.encrypted_api_key.is_some());
        if has_ciphertext {
            let key = secrets::load_or_create_key(&self.key_path)?;
            for (kind, provider) in &mut settings.providers {
                let Some(sealed) = provider.encrypted_api_key.as_deref() else {
                    continue;
                };
                match secrets::decrypt(sealed, &key) {
                    Ok(plain) => provider.api_key = Some(ApiKey::new(plain)),
                    Err(e) => warn!(provider = %kind, error = %e, "could not decrypt stored API key"),
                }
            }
        }

        if self.use_env {
            apply_env_overrides(&mut settings);
        }
        settings.validate()?;
        Ok(settings)
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        let mut sealed = settings.clone();
        if sealed.providers.values().any(|p| p.api_key.is_some()) {
            let key = secrets::load_or_create_key(&self.key_path)?;
            for provider in sealed.providers.values_mut() {
                if let Some(api_key) = provider.api_key.take() {
                    provider.encrypted_api_key = Some(secrets::encrypt(api_key.expose(), &key)?);
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&sealed)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = ?self.path, "settings saved");
        Ok(())
    }
}
