//! # switchboard-settings
//!
//! Settings for hosts that embed Switchboard.
//!
//! - **Loading**: compiled defaults, deep-merged with `~/.switchboard/settings.json`,
//!   then environment overrides
//! - **Secrets**: API keys live on disk only as ChaCha20-Poly1305 ciphertext;
//!   [`SettingsStore::load`] hands back decrypted keys, [`SettingsStore::save`]
//!   re-encrypts them
//! - **Bridging**: [`Settings::provider_config`] produces the `ProviderConfig`
//!   the provider registry consumes

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod secrets;
pub mod store;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, settings_dir};
pub use store::{FileSettingsStore, SettingsStore};
pub use types::{ProviderSettings, ResilienceSettings, Settings};
