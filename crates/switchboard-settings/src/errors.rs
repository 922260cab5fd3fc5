//! Settings error types.

use thiserror::Error;

use crate::secrets::SecretError;

/// Errors that can occur when loading or saving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read or write the settings file.
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse or produce settings JSON.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// An API key could not be encrypted or decrypted.
    #[error("secret handling failed: {0}")]
    Secret(#[from] SecretError),
    /// A settings value was invalid.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
