//! Hybrid encryption of files and directories into self-contained bundles.
//!
//! An encrypted bundle `<name>.zip` holds two entries:
//! - `<name>_ENCRYPTED.zip`: the authenticated ciphertext of an intermediate
//!   zip of the source
//! - `<name>_KEY.key`: the one-off symmetric key, wrapped with the key pair's
//!   public key
//!
//! All intermediate files live in a per-operation [`Workspace`] inside the
//! destination directory and are removed on every exit path.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{BUNDLE_EXTENSION, ENCRYPTED_SUFFIX, KEY_SUFFIX, UNENCRYPTED_SUFFIX};
use crate::keystore::{effective, require_key_pair};
use crate::workspace::{write_new_file, OutputGuard, Workspace};
use keycrypt_archive::{bundle_directory, bundle_files, extract};
use keycrypt_catalog::{ArchiveRecord, CatalogStore, KeyPairRecord, NewArchive};
use keycrypt_common::{Error, Result, SensitiveBytes};
use keycrypt_crypto::{
    asymmetric_decrypt, asymmetric_encrypt, decode_private_key, decode_public_key, decrypt,
    encrypt, SymmetricKey,
};

/// Result of a successful encrypt.
#[derive(Debug, Clone, Serialize)]
pub struct EncryptedArchive {
    /// Path of the encrypted bundle.
    pub bundle: PathBuf,
    /// Catalog record of the bundle.
    pub record: ArchiveRecord,
}

/// A bundle written to its destination but not yet committed.
pub(crate) struct Sealed {
    pub bundle: PathBuf,
    pub name: String,
    pub source: PathBuf,
    pub dest_dir: PathBuf,
    pub key_pair_id: i64,
    pub guard: OutputGuard,
}

fn file_name_str(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("Invalid file name: {}", path.display())))
}

/// Strip the bundle extension and any encrypted marker from a bundle's name.
pub(crate) fn bundle_stem(bundle: &Path) -> Result<String> {
    let file_name = file_name_str(bundle)?;
    let stem = file_name.strip_suffix(BUNDLE_EXTENSION).unwrap_or(file_name);
    let marker = ENCRYPTED_SUFFIX.trim_end_matches(BUNDLE_EXTENSION);
    Ok(stem.strip_suffix(marker).unwrap_or(stem).to_string())
}

/// Find `<stem><suffix>` in `dir`, or failing that the only entry with `suffix`.
fn locate_entry(dir: &Path, stem: &str, suffix: &str) -> Result<PathBuf> {
    let exact = dir.join(format!("{}{}", stem, suffix));
    if exact.is_file() {
        return Ok(exact);
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(suffix));
        if matches && entry.file_type()?.is_file() {
            candidates.push(entry.path());
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(Error::InvalidInput(format!(
            "Bundle has no entry ending in {}",
            suffix
        ))),
        n => Err(Error::InvalidInput(format!(
            "Bundle has {} entries ending in {}",
            n, suffix
        ))),
    }
}

/// Decrypt an unpacked encrypted bundle and extract its content into `dest_dir`.
///
/// Returns the paths of the extracted files.
///
/// # Errors
/// - `AuthenticationFailure` if the private key does not open with `password`
/// - `Integrity` if the wrapped key or ciphertext was tampered with
/// - `InvalidInput` if the expected entries are missing
pub(crate) fn decrypt_core(
    workspace: &Workspace,
    unpacked: &Path,
    stem: &str,
    private_key: &[u8],
    password: Option<&str>,
    dest_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let ciphertext_path = locate_entry(unpacked, stem, ENCRYPTED_SUFFIX)?;
    let wrapped_key_path = locate_entry(unpacked, stem, KEY_SUFFIX)?;

    let private = decode_private_key(private_key, effective(password))?;
    let unwrapped = SensitiveBytes::new(asymmetric_decrypt(&private, &fs::read(wrapped_key_path)?)?);
    let key = SymmetricKey::from_slice(unwrapped.as_bytes())?;

    let plaintext = SensitiveBytes::new(decrypt(key.as_bytes(), &fs::read(ciphertext_path)?)?);
    let intermediate = workspace.join(format!("{}{}", stem, UNENCRYPTED_SUFFIX));
    write_new_file(&intermediate, plaintext.as_bytes())?;
    debug!(stem, "Bundle decrypted");

    extract(&intermediate, dest_dir)
}

/// Turns sources into encrypted bundles and back.
pub struct EncryptionPipeline<'a, C: CatalogStore + ?Sized> {
    catalog: &'a C,
}

impl<'a, C: CatalogStore + ?Sized> EncryptionPipeline<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self { catalog }
    }

    /// Encrypt a file or directory into `<dest_dir>/<name>.zip` and record it.
    ///
    /// # Errors
    /// - `InvalidInput` if the source is neither a file nor a directory, the
    ///   destination is not a directory or lies inside the source
    /// - `NotFound` if the key pair does not exist
    /// - `Conflict` if the bundle already exists at the destination
    pub fn encrypt(
        &self,
        source: &Path,
        dest_dir: &Path,
        key_pair_name: &str,
    ) -> Result<EncryptedArchive> {
        let sealed = self.seal(source, dest_dir, key_pair_name, |_, _| Ok(()))?;
        let record = self.catalog.record_archive(NewArchive {
            name: sealed.name.clone(),
            src_path: sealed.source.display().to_string(),
            dst_path: sealed.dest_dir.display().to_string(),
            key_pair_id: sealed.key_pair_id,
        })?;
        sealed.guard.commit();

        info!(name = %record.name, key_pair = key_pair_name, "Encrypted");
        Ok(EncryptedArchive {
            bundle: sealed.bundle,
            record,
        })
    }

    /// Build the encrypted bundle, letting `finish` extend it before returning.
    ///
    /// The bundle is removed again unless the caller commits the guard.
    pub(crate) fn seal<F>(
        &self,
        source: &Path,
        dest_dir: &Path,
        key_pair_name: &str,
        finish: F,
    ) -> Result<Sealed>
    where
        F: FnOnce(&Workspace, &Path) -> Result<()>,
    {
        let is_dir = source.is_dir();
        if !is_dir && !source.is_file() {
            return Err(Error::InvalidInput(format!(
                "Source is invalid: {}",
                source.display()
            )));
        }
        if !dest_dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "The destination must be a directory: {}",
                dest_dir.display()
            )));
        }

        let source = fs::canonicalize(source)?;
        let dest_dir = fs::canonicalize(dest_dir)?;
        if is_dir && dest_dir.starts_with(&source) {
            return Err(Error::InvalidInput(
                "The destination must not be inside the source directory".to_string(),
            ));
        }
        let name = file_name_str(&source)?.to_string();
        let key_pair = require_key_pair(self.catalog, key_pair_name)?;

        let workspace = Workspace::create_in(&dest_dir)?;
        let intermediate_name = format!("{}{}", name, UNENCRYPTED_SUFFIX);
        let intermediate = if is_dir {
            bundle_directory(&intermediate_name, &source, workspace.path())?
        } else {
            bundle_files(&intermediate_name, &[&source], workspace.path())?
        };

        let (ciphertext_path, wrapped_key_path) =
            encrypt_intermediate(&workspace, &name, &intermediate, &key_pair)?;

        let bundle = bundle_files(
            &format!("{}{}", name, BUNDLE_EXTENSION),
            &[ciphertext_path, wrapped_key_path],
            &dest_dir,
        )?;
        let mut guard = OutputGuard::new();
        guard.track(&bundle);

        finish(&workspace, &bundle)?;
        debug!(bundle = %bundle.display(), "Bundle sealed");

        Ok(Sealed {
            bundle,
            name,
            source,
            dest_dir,
            key_pair_id: key_pair.id,
            guard,
        })
    }

    /// Decrypt a bundle into `dest_dir`, reproducing the original file or tree.
    ///
    /// Returns the paths of the extracted files. Existing files with the same
    /// names are replaced. No catalog record is written.
    ///
    /// # Errors
    /// - `InvalidInput` if the destination is not a directory or the source
    ///   is not a valid bundle file
    /// - `NotFound` if the key pair does not exist
    /// - `AuthenticationFailure` on a missing or wrong password
    /// - `Integrity` if the bundle was tampered with
    pub fn decrypt(
        &self,
        source_bundle: &Path,
        dest_dir: &Path,
        key_pair_name: &str,
        password: Option<&str>,
    ) -> Result<Vec<PathBuf>> {
        if !dest_dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "The destination must be a directory: {}",
                dest_dir.display()
            )));
        }
        if !source_bundle.is_file() {
            return Err(Error::InvalidInput(format!(
                "The source must be a file: {}",
                source_bundle.display()
            )));
        }

        let stem = bundle_stem(source_bundle)?;
        let key_pair = require_key_pair(self.catalog, key_pair_name)?;

        let workspace = Workspace::create_in(dest_dir)?;
        let unpacked = workspace.subdir("bundle")?;
        extract(source_bundle, &unpacked)?;

        let written = decrypt_core(
            &workspace,
            &unpacked,
            &stem,
            &key_pair.private_key,
            password,
            dest_dir,
        )?;

        info!(name = %stem, key_pair = key_pair_name, files = written.len(), "Decrypted");
        Ok(written)
    }
}

/// Encrypt the intermediate bundle and wrap its key; returns both file paths.
fn encrypt_intermediate(
    workspace: &Workspace,
    name: &str,
    intermediate: &Path,
    key_pair: &KeyPairRecord,
) -> Result<(PathBuf, PathBuf)> {
    let plaintext = SensitiveBytes::new(fs::read(intermediate)?);
    let key = SymmetricKey::generate();

    let ciphertext_path = workspace.join(format!("{}{}", name, ENCRYPTED_SUFFIX));
    write_new_file(&ciphertext_path, &encrypt(key.as_bytes(), plaintext.as_bytes())?)?;

    let public = decode_public_key(&key_pair.public_key)?;
    let wrapped_key_path = workspace.join(format!("{}{}", name, KEY_SUFFIX));
    write_new_file(&wrapped_key_path, &asymmetric_encrypt(&public, key.as_bytes())?)?;

    Ok((ciphertext_path, wrapped_key_path))
}
