//! Key, nonce and file id generation from the operating system RNG.
//!
//! Key material is zeroized on drop and never printed: its `Debug` output is
//! redacted so an accidental `{:?}` in a log line cannot leak it.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, ServiceError};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Bytes of randomness behind a file id (rendered as 32 hex chars).
pub const FILE_ID_BYTES: usize = 16;

/// AES-256-GCM key plus the single nonce it is used with.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
}

impl KeyMaterial {
    pub fn from_parts(key: [u8; KEY_LEN], nonce: [u8; NONCE_LEN]) -> Self {
        Self { key, nonce }
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial { .. }")
    }
}

/// Fill `buf` from the OS RNG, mapping failure to `EntropyUnavailable`.
pub fn fill_secure(buf: &mut [u8]) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        tracing::error!("OS random source failed: {}", e);
        ServiceError::EntropyUnavailable
    })
}

/// Generate a fresh key and nonce for one encryption.
pub fn generate() -> Result<KeyMaterial> {
    let mut buf = Zeroizing::new([0u8; KEY_LEN + NONCE_LEN]);
    fill_secure(&mut buf[..])?;

    let mut key = [0u8; KEY_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    key.copy_from_slice(&buf[..KEY_LEN]);
    nonce.copy_from_slice(&buf[KEY_LEN..]);
    let material = KeyMaterial::from_parts(key, nonce);
    key.zeroize();
    Ok(material)
}

/// Random, non-sequential file identifier as lowercase hex.
pub fn random_file_id() -> Result<String> {
    let mut bytes = [0u8; FILE_ID_BYTES];
    fill_secure(&mut bytes)?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_distinct_material() {
        let a = generate().unwrap();
        let b = generate().unwrap();
        assert_ne!(a.key(), b.key());
        assert_ne!(a.nonce(), b.nonce());
    }

    #[test]
    fn test_debug_is_redacted() {
        let material = KeyMaterial::from_parts([0xAB; KEY_LEN], [0xCD; NONCE_LEN]);
        let printed = format!("{:?}", material);
        assert_eq!(printed, "KeyMaterial { .. }");
        assert!(!printed.contains("171"));
    }

    #[test]
    fn test_file_id_format() {
        let id = random_file_id().unwrap();
        assert_eq!(id.len(), FILE_ID_BYTES * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
