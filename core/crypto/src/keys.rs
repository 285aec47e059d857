//! Symmetric key type with secure memory handling.
//!
//! The key zeroizes its memory on drop so a bundle's one-time key never
//! outlives the operation that used it.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use keycrypt_common::{Error, Result};

/// Length of symmetric keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Ephemeral key protecting the bulk data of one bundle.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_LENGTH],
}

impl SymmetricKey {
    /// Generate a random key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a key from a slice, as recovered from an OAEP envelope.
    ///
    /// # Errors
    /// - `Integrity` if the slice is not exactly KEY_LENGTH bytes; a wrapped
    ///   key of any other size cannot have come from this engine.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::Integrity(format!(
                "Unwrapped key has length {}, expected {}",
                bytes.len(),
                KEY_LENGTH
            ))
        })?;
        Ok(Self::from_bytes(key))
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keycrypt_common::ErrorKind;

    #[test]
    fn test_generate_is_random() {
        let key1 = SymmetricKey::generate();
        let key2 = SymmetricKey::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_from_slice_checks_length() {
        let key = SymmetricKey::from_slice(&[7u8; KEY_LENGTH]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; KEY_LENGTH]);

        let err = SymmetricKey::from_slice(&[7u8; 31]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SymmetricKey::from_bytes([1u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "SymmetricKey([REDACTED])");
    }
}
