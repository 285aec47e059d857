//! Common error types for Keycrypt.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Top-level error type for Keycrypt operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing path, wrong kind of filesystem entry, malformed key bytes.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown key pair or archive name.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate key pair name or an output file that already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Wrong or missing password on a protected private key.
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// Authentication tag mismatch, tampered or corrupted ciphertext.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Operation refused by a security policy.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Cryptographic operation failed for a reason other than the above.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Archive container could not be written or read.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Catalog store failure.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another operation is already in flight.
    #[error("Busy: {0}")]
    Busy(String),
}

/// Coarse classification of an [`Error`], stable for front ends to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    AuthenticationFailure,
    Integrity,
    PolicyViolation,
    Crypto,
    Archive,
    Catalog,
    Io,
    Serialization,
    Busy,
}

impl Error {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::AuthenticationFailure(_) => ErrorKind::AuthenticationFailure,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::PolicyViolation(_) => ErrorKind::PolicyViolation,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::Archive(_) => ErrorKind::Archive,
            Error::Catalog(_) => ErrorKind::Catalog,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Busy(_) => ErrorKind::Busy,
        }
    }

    /// Map an I/O error from an exclusive create into a `Conflict`.
    ///
    /// Any other I/O error is passed through unchanged.
    pub fn from_exclusive_create(err: std::io::Error, what: impl fmt::Display) -> Self {
        if err.kind() == std::io::ErrorKind::AlreadyExists {
            Error::Conflict(format!("{} already exists", what))
        } else {
            Error::Io(err)
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(
            Error::Conflict("x".to_string()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            Error::Integrity("x".to_string()).kind(),
            ErrorKind::Integrity
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(Error::from(io).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_exclusive_create_maps_to_conflict() {
        let err = std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists");
        let mapped = Error::from_exclusive_create(err, "report.zip");
        assert_eq!(mapped.kind(), ErrorKind::Conflict);
        assert_eq!(mapped.to_string(), "Conflict: report.zip already exists");

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            Error::from_exclusive_create(err, "report.zip").kind(),
            ErrorKind::Io
        );
    }
}
