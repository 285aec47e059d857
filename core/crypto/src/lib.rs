//! Cryptographic primitives for Keycrypt.
//!
//! This module provides:
//! - Authenticated symmetric encryption using XChaCha20-Poly1305
//! - Ephemeral symmetric keys with automatic zeroization
//! - RSA key pairs, PEM encoding (optionally password-wrapped PKCS#8)
//! - OAEP-SHA512 wrapping of symmetric keys
//!
//! # Security Guarantees
//! - All symmetric key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption fails closed on any authentication failure

pub mod aead;
pub mod asymmetric;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use asymmetric::{
    asymmetric_decrypt, asymmetric_encrypt, decode_private_key, decode_public_key,
    encode_private_key, encode_public_key, generate_key_pair, DEFAULT_KEY_BITS,
};
pub use keys::{SymmetricKey, KEY_LENGTH};
pub use rsa::{RsaPrivateKey, RsaPublicKey};
