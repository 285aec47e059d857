//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. A sealed token
//! is laid out as `nonce || ciphertext || tag`.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use keycrypt_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Preconditions
/// - `key` must be exactly KEY_LENGTH bytes
/// - `plaintext` can be any size
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
/// - The token length is plaintext length + TAG_SIZE + NONCE_SIZE
///
/// # Errors
/// - Returns `InvalidInput` if key length is incorrect
/// - Returns `Crypto` if encryption fails
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt a token produced by [`encrypt`].
///
/// # Preconditions
/// - `key` must be exactly KEY_LENGTH bytes
/// - Token format: nonce || encrypted_data || tag
///
/// # Postconditions
/// - Returns the original plaintext
/// - Verifies the authentication tag before returning anything
///
/// # Errors
/// - Returns `InvalidInput` if key length is incorrect
/// - Returns `Integrity` if the token is truncated or the tag does not verify
pub fn decrypt(key: &[u8], token: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if token.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Integrity("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = token.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, encrypted)
        .map_err(|_| Error::Integrity("Ciphertext failed authentication".to_string()))
}
