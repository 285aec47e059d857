//! Catalog entities.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Password metadata attached to a protected key pair.
///
/// The password itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordMeta {
    /// Free-form reminder chosen by the user.
    pub hint: String,
    /// Whether the password met every strength criterion.
    pub strong: bool,
}

/// A key pair ready to be persisted.
#[derive(Clone)]
pub struct NewKeyPair {
    pub name: String,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub password: Option<PasswordMeta>,
}

impl fmt::Debug for NewKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewKeyPair")
            .field("name", &self.name)
            .field("password", &self.password)
            .finish_non_exhaustive()
    }
}

/// A stored key pair.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct KeyPairRecord {
    pub id: i64,
    pub name: String,
    /// SubjectPublicKeyInfo PEM.
    #[serde(skip)]
    pub public_key: Vec<u8>,
    /// PEM private key, password-wrapped iff `password` is set.
    #[serde(skip)]
    pub private_key: Vec<u8>,
    pub password: Option<PasswordMeta>,
    pub created_at: DateTime<Utc>,
}

impl KeyPairRecord {
    /// Whether the private key is protected by a password.
    pub fn is_protected(&self) -> bool {
        self.password.is_some()
    }
}

impl fmt::Debug for KeyPairRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("password", &self.password)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// An archive record ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewArchive {
    pub name: String,
    pub src_path: String,
    pub dst_path: String,
    pub key_pair_id: i64,
}

/// Metadata about a bundle produced by an encrypt operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveRecord {
    pub id: i64,
    pub name: String,
    pub src_path: String,
    pub dst_path: String,
    pub created_at: DateTime<Utc>,
    pub key_pair_id: i64,
    /// Name of the referenced key pair, resolved by the store.
    pub key_pair_name: String,
}
