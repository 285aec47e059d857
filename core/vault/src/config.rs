//! Keycrypt configuration and file naming.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use keycrypt_common::{Error, Result};
use keycrypt_crypto::asymmetric::MIN_KEY_BITS;
use keycrypt_crypto::DEFAULT_KEY_BITS;

/// Suffix of the intermediate, unencrypted bundle.
pub const UNENCRYPTED_SUFFIX: &str = "_UNENCRYPTED.zip";

/// Suffix of the authenticated ciphertext entry in an encrypted bundle.
pub const ENCRYPTED_SUFFIX: &str = "_ENCRYPTED.zip";

/// Suffix of the wrapped symmetric key entry in an encrypted bundle.
pub const KEY_SUFFIX: &str = "_KEY.key";

/// Suffix of an exported private key file.
pub const PRIVATE_KEY_SUFFIX: &str = "_PRIVATE.key";

/// Suffix of an exported public key file.
pub const PUBLIC_KEY_SUFFIX: &str = "_public.key";

/// Extension of every bundle written to a destination directory.
pub const BUNDLE_EXTENSION: &str = ".zip";

/// Marker between the catalog file name and the rollover counter.
pub const ROLLOVER_MARKER: &str = ".back_";

/// Prefix of per-operation workspace directories.
pub const WORKSPACE_PREFIX: &str = ".keycrypt-work-";

/// Default catalog file name.
pub const CATALOG_FILENAME: &str = "keycrypt.db";

/// Environment variable overriding the catalog location.
pub const CATALOG_ENV: &str = "KEYCRYPT_CATALOG";

/// Default catalog location under the platform data directory.
pub fn default_catalog_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("keycrypt"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CATALOG_FILENAME)
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeycryptConfig {
    /// Location of the catalog database.
    pub catalog_path: PathBuf,
    /// RSA modulus size for generated key pairs.
    pub key_bits: usize,
}

impl Default for KeycryptConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

impl KeycryptConfig {
    /// Configuration for a catalog at `catalog_path` with default settings.
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            ..Self::default()
        }
    }

    /// Set the RSA modulus size.
    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }

    /// Load configuration from a JSON file.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `Serialization` if the content is not valid configuration JSON
    /// - `InvalidInput` if the loaded values are out of range
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (`KEYCRYPT_CATALOG`).
    pub fn with_env_overrides(self) -> Self {
        self.with_catalog_override(std::env::var_os(CATALOG_ENV))
    }

    fn with_catalog_override(mut self, catalog: Option<OsString>) -> Self {
        if let Some(catalog) = catalog.filter(|c| !c.is_empty()) {
            self.catalog_path = PathBuf::from(catalog);
        }
        self
    }

    /// Check that values are usable.
    ///
    /// # Errors
    /// - `InvalidInput` if the key size is too small or the catalog path is empty
    pub fn validate(&self) -> Result<()> {
        if self.key_bits < MIN_KEY_BITS {
            return Err(Error::InvalidInput(format!(
                "key_bits must be at least {}, got {}",
                MIN_KEY_BITS, self.key_bits
            )));
        }
        if self.catalog_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("catalog_path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
