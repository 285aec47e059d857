//! Key pair life cycle backed by the catalog.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{PRIVATE_KEY_SUFFIX, PUBLIC_KEY_SUFFIX};
use crate::policy::PasswordPolicy;
use crate::workspace::{write_new_file, OutputGuard};
use keycrypt_catalog::{CatalogStore, KeyPairRecord, NewKeyPair, PasswordMeta};
use keycrypt_common::{Error, Outcome, Result};
use keycrypt_crypto::{
    decode_private_key, decode_public_key, encode_private_key, encode_public_key,
    generate_key_pair, RsaPublicKey, DEFAULT_KEY_BITS,
};

/// Message used when an import is refused by the password policy.
pub const IMPORT_REJECTED: &str = "Cannot import key due to password simplicity";

/// Treat an empty password the same as no password.
pub(crate) fn effective(password: Option<&str>) -> Option<&str> {
    password.filter(|p| !p.is_empty())
}

/// Key pair names end up in file and directory names.
fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput(
            "These parameters are required -- \"Name\"".to_string(),
        ));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::InvalidInput(format!(
            "Key pair name cannot be used as a file name: {:?}",
            name
        )));
    }
    Ok(())
}

fn require_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(Error::InvalidInput(format!(
            "The destination must be a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// File names an exported key pair is written under.
pub fn key_file_names(name: &str) -> (String, String) {
    (
        format!("{}{}", name, PRIVATE_KEY_SUFFIX),
        format!("{}{}", name, PUBLIC_KEY_SUFFIX),
    )
}

/// Look up a key pair, turning absence into `NotFound`.
pub(crate) fn require_key_pair<C: CatalogStore + ?Sized>(
    catalog: &C,
    name: &str,
) -> Result<KeyPairRecord> {
    catalog
        .key_pair(name)?
        .ok_or_else(|| Error::NotFound(format!("Key pair does not exist: {}", name)))
}

/// Generates, imports and exports key pairs.
pub struct KeyStore<'a, C: CatalogStore + ?Sized> {
    catalog: &'a C,
    key_bits: usize,
}

impl<'a, C: CatalogStore + ?Sized> KeyStore<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self {
            catalog,
            key_bits: DEFAULT_KEY_BITS,
        }
    }

    /// Set the modulus size used by [`KeyStore::generate`].
    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }

    /// Generate and persist a new key pair.
    ///
    /// When a password is given it is checked against the password policy
    /// first, and the private key is wrapped under it. A policy
    /// recommendation is returned as an advisory.
    ///
    /// # Errors
    /// - `InvalidInput` if the name is unusable or the policy rejects the password
    /// - `Conflict` if the name is taken; nothing is written
    pub fn generate(
        &self,
        name: &str,
        hint: Option<&str>,
        password: Option<&str>,
    ) -> Result<Outcome<KeyPairRecord>> {
        check_name(name)?;
        let password = effective(password);

        let mut advisory = String::new();
        let meta = match password {
            Some(password) => {
                let verdict = PasswordPolicy::evaluate(password);
                if !verdict.accepted {
                    return Err(Error::InvalidInput(verdict.message));
                }
                let strong = verdict.is_strong();
                advisory = verdict.message;
                Some(PasswordMeta {
                    hint: hint.unwrap_or_default().to_string(),
                    strong,
                })
            }
            None => None,
        };

        debug!(name, bits = self.key_bits, "Generating key pair");
        let (private, public) = generate_key_pair(self.key_bits)?;
        let new_pair = NewKeyPair {
            name: name.to_string(),
            public_key: encode_public_key(&public)?,
            private_key: encode_private_key(&private, password)?,
            password: meta,
        };

        let record = self.catalog.create_key_pair(new_pair).map_err(|e| match e {
            Error::Conflict(msg) if !advisory.is_empty() => {
                Error::Conflict(format!("{}\n\n{}", advisory, msg))
            }
            other => other,
        })?;

        info!(name, protected = record.is_protected(), "Key pair generated");
        Ok(Outcome::new(record).with_advisory(advisory))
    }

    /// Import a key pair from PEM files.
    ///
    /// Both keys must decode, the private key must open with `password`, and
    /// the public key must belong to the private key before anything is
    /// persisted.
    ///
    /// # Errors
    /// - `InvalidInput` if a path is not a file, a key is malformed, the keys
    ///   do not match, or the policy rejects the password
    /// - `AuthenticationFailure` if the private key does not open with `password`
    /// - `Conflict` if the name is taken
    pub fn import_pair(
        &self,
        name: &str,
        private_path: &Path,
        public_path: &Path,
        hint: Option<&str>,
        password: Option<&str>,
    ) -> Result<Outcome<KeyPairRecord>> {
        check_name(name)?;
        if !private_path.is_file() {
            return Err(Error::InvalidInput(
                "The private key must be a valid file.".to_string(),
            ));
        }
        if !public_path.is_file() {
            return Err(Error::InvalidInput(
                "The public key must be a valid file.".to_string(),
            ));
        }

        let password = effective(password);
        let verdict = password.map(PasswordPolicy::evaluate);
        if verdict.as_ref().is_some_and(|v| !v.accepted) {
            return Err(Error::InvalidInput(IMPORT_REJECTED.to_string()));
        }

        let private_key = fs::read(private_path)?;
        let public_key = fs::read(public_path)?;

        let private = decode_private_key(&private_key, password)?;
        let public = decode_public_key(&public_key)?;
        if RsaPublicKey::from(&private) != public {
            return Err(Error::InvalidInput(
                "The public key does not belong to the private key".to_string(),
            ));
        }

        let mut advisory = String::new();
        let meta = verdict.map(|verdict| {
            let strong = verdict.is_strong();
            advisory = verdict.message;
            PasswordMeta {
                hint: hint.unwrap_or_default().to_string(),
                strong,
            }
        });

        let record = self.catalog.create_key_pair(NewKeyPair {
            name: name.to_string(),
            public_key,
            private_key,
            password: meta,
        })?;

        info!(name, protected = record.is_protected(), "Key pair imported");
        Ok(Outcome::new(record).with_advisory(advisory))
    }

    /// Write a key pair's PEM files into `dest_dir`.
    ///
    /// Returns the private and public key paths, in that order.
    ///
    /// # Errors
    /// - `InvalidInput` if `dest_dir` is not a directory
    /// - `NotFound` if the key pair does not exist
    /// - `Conflict` if either file already exists; neither is left behind
    pub fn export_one(&self, name: &str, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        require_dir(dest_dir)?;
        let record = require_key_pair(self.catalog, name)?;

        let (private_name, public_name) = key_file_names(&record.name);
        let private_path = dest_dir.join(private_name);
        let public_path = dest_dir.join(public_name);

        let mut guard = OutputGuard::new();
        write_new_file(&private_path, &record.private_key)?;
        guard.track(&private_path);
        write_new_file(&public_path, &record.public_key)?;
        guard.commit();

        debug!(name, dest = %dest_dir.display(), "Key pair exported");
        Ok(vec![private_path, public_path])
    }

    /// Export every key pair into its own subdirectory of `dest_dir`.
    ///
    /// Stops at the first failure; pairs exported before it stay on disk.
    ///
    /// # Errors
    /// - `InvalidInput` if `dest_dir` is not a directory
    /// - `Conflict` if a subdirectory or key file already exists
    pub fn export_all(&self, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        require_dir(dest_dir)?;

        let mut exported = Vec::new();
        for record in self.catalog.key_pairs()? {
            let subdir = dest_dir.join(&record.name);
            fs::create_dir(&subdir)
                .map_err(|e| Error::from_exclusive_create(e, subdir.display()))?;
            self.export_one(&record.name, &subdir)?;
            exported.push(subdir);
        }

        info!(count = exported.len(), dest = %dest_dir.display(), "Key pairs exported");
        Ok(exported)
    }

    /// Fetch one key pair.
    ///
    /// # Errors
    /// - `NotFound` if it does not exist
    pub fn get(&self, name: &str) -> Result<KeyPairRecord> {
        require_key_pair(self.catalog, name)
    }

    /// All key pairs, newest first.
    pub fn list(&self) -> Result<Vec<KeyPairRecord>> {
        self.catalog.key_pairs()
    }

    /// All key pair names, newest first.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.list()?.into_iter().map(|k| k.name).collect())
    }
}
