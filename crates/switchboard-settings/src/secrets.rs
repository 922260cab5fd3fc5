//! At-rest encryption for API keys.
//!
//! Ciphertext format: base64(`nonce || ciphertext`), 12-byte nonce,
//! ChaCha20-Poly1305 with a 256-bit key stored base64-encoded next to the
//! settings file.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

const NONCE_LEN: usize = 12;

/// Errors from key management and AEAD operations.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// The cipher refused to encrypt.
    #[error("encryption failed")]
    EncryptionFailed,
    /// Wrong key or tampered ciphertext.
    #[error("decryption failed")]
    DecryptionFailed,
    /// Input was not valid base64 or too short.
    #[error("invalid encoding")]
    InvalidEncoding,
    /// Decrypted bytes were not UTF-8.
    #[error("invalid utf-8 in decrypted secret")]
    InvalidUtf8,
    /// The key file does not hold 32 bytes.
    #[error("invalid key length")]
    InvalidKeyLength,
    /// The key file could not be read or written.
    #[error("key file error: {0}")]
    Io(String),
}

/// Encrypt `plaintext`, returning base64 `nonce || ciphertext`.
pub fn encrypt(plaintext: &str, key: &[u8; 32]) -> Result<String, SecretError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| SecretError::EncryptionFailed)?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

/// Reverse of [`encrypt`].
pub fn decrypt(encoded: &str, key: &[u8; 32]) -> Result<String, SecretError> {
    let combined = STANDARD
        .decode(encoded.trim())
        .map_err(|_| SecretError::InvalidEncoding)?;
    if combined.len() < NONCE_LEN {
        return Err(SecretError::InvalidEncoding);
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(key.into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| SecretError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| SecretError::InvalidUtf8)
}

/// Fresh random 256-bit key.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Read the key at `path`, creating it (mode 0600 on Unix) when missing.
pub fn load_or_create_key(path: &Path) -> Result<[u8; 32], SecretError> {
    if path.exists() {
        let encoded = std::fs::read_to_string(path).map_err(|e| SecretError::Io(e.to_string()))?;
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| SecretError::InvalidEncoding)?;
        return <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| SecretError::InvalidKeyLength);
    }

    let key = generate_key();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SecretError::Io(e.to_string()))?;
    }
    std::fs::write(path, STANDARD.encode(key)).map_err(|e| SecretError::Io(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| SecretError::Io(e.to_string()))?;
    }

    Ok(key)
}
