//! Encrypted backups of the catalog file and their restoration.
//!
//! A backup is an ordinary encrypted bundle of the catalog file with the key
//! pair's PEM files appended, so it can be restored with nothing but the
//! bundle and the key pair's password.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{PRIVATE_KEY_SUFFIX, ROLLOVER_MARKER};
use crate::keystore::{require_key_pair, KeyStore};
use crate::pipeline::{bundle_stem, decrypt_core, EncryptionPipeline};
use crate::workspace::Workspace;
use keycrypt_archive::{append_files, entry_names, extract};
use keycrypt_catalog::CatalogStore;
use keycrypt_common::{Error, Outcome, Result};

pub const MSG_UNPROTECTED: &str = "A password protected key pair must be used for database backups";
pub const MSG_WEAK: &str = "Using a key pair with a weak password";

/// A backup bundle written by [`BackupRestorePipeline::backup`].
#[derive(Debug, Clone, Serialize)]
pub struct Backup {
    pub bundle: PathBuf,
    pub key_pair: String,
}

/// Files touched by [`BackupRestorePipeline::restore`].
#[derive(Debug, Clone, Serialize)]
pub struct Restored {
    /// The catalog file now holding the restored content.
    pub catalog: PathBuf,
    /// Copy of the catalog as it was before the restore.
    pub rollover: PathBuf,
}

fn rollover_candidate(catalog_path: &Path, n: u32) -> Result<PathBuf> {
    let file_name = catalog_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            Error::InvalidInput(format!("Invalid catalog path: {}", catalog_path.display()))
        })?;
    Ok(catalog_path.with_file_name(format!("{}{}{}", file_name, ROLLOVER_MARKER, n)))
}

/// First `<catalog>.back_N` that does not exist yet.
pub fn next_rollover_path(catalog_path: &Path) -> Result<PathBuf> {
    let mut n = 1;
    loop {
        let candidate = rollover_candidate(catalog_path, n)?;
        if !candidate.exists() {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Copy the catalog to the first free rollover slot.
///
/// Slots are claimed with an exclusive create, so an existing rollover is
/// never overwritten even if another process takes a slot concurrently.
fn create_rollover(catalog_path: &Path) -> Result<PathBuf> {
    let mut source = File::open(catalog_path)?;
    loop {
        let candidate = next_rollover_path(catalog_path)?;
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut target) => {
                io::copy(&mut source, &mut target)?;
                target.sync_all()?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn catalog_dir(catalog_path: &Path) -> &Path {
    match catalog_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Backs up and restores the catalog file.
pub struct BackupRestorePipeline<'a, C: CatalogStore + ?Sized> {
    catalog: &'a C,
}

impl<'a, C: CatalogStore + ?Sized> BackupRestorePipeline<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self { catalog }
    }

    fn catalog_path(&self) -> Result<&Path> {
        self.catalog
            .path()
            .ok_or_else(|| Error::InvalidInput("The catalog is not backed by a file".to_string()))
    }

    /// Encrypt the catalog file into `dest_dir` under a password-protected key pair.
    ///
    /// The key pair's PEM files are added to the bundle. A key pair with a
    /// weak password is allowed with an advisory. No archive record is written.
    ///
    /// # Errors
    /// - `InvalidInput` if `dest_dir` is not a directory
    /// - `NotFound` if the key pair does not exist
    /// - `PolicyViolation` if the key pair has no password; nothing is written
    /// - `Conflict` if the bundle already exists
    pub fn backup(&self, dest_dir: &Path, key_pair_name: &str) -> Result<Outcome<Backup>> {
        let catalog_path = self.catalog_path()?;
        if !dest_dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "The destination must be a directory: {}",
                dest_dir.display()
            )));
        }

        let key_pair = require_key_pair(self.catalog, key_pair_name)?;
        let mut outcome = Outcome::new(());
        match &key_pair.password {
            None => return Err(Error::PolicyViolation(MSG_UNPROTECTED.to_string())),
            Some(meta) if !meta.strong => {
                warn!(key_pair = key_pair_name, "Backup uses a key pair with a weak password");
                outcome.push_advisory(MSG_WEAK);
            }
            Some(_) => {}
        }

        let keys = KeyStore::new(self.catalog);
        let sealed = EncryptionPipeline::new(self.catalog).seal(
            catalog_path,
            dest_dir,
            key_pair_name,
            |workspace, bundle| {
                let key_dir = workspace.subdir("keys")?;
                let key_files = keys.export_one(key_pair_name, &key_dir)?;
                append_files(bundle, &key_files)
            },
        )?;
        sealed.guard.commit();

        info!(bundle = %sealed.bundle.display(), key_pair = key_pair_name, "Catalog backed up");
        Ok(outcome.map(|()| Backup {
            bundle: sealed.bundle,
            key_pair: key_pair.name,
        }))
    }

    /// Replace the catalog file with the content of a backup bundle.
    ///
    /// Once the backup has decrypted, the current catalog is copied to the
    /// next free `<catalog>.back_N` and the restored file is renamed over
    /// it. A failed restore leaves no rollover behind. The restored bytes are
    /// not checked for being a well-formed catalog. The live catalog handle
    /// still refers to the old file afterwards and must be reopened by the
    /// caller.
    ///
    /// # Errors
    /// - `InvalidInput` if the source is not a backup bundle
    /// - `AuthenticationFailure` on a wrong password
    /// - `Integrity` if the bundle was tampered with
    pub fn restore(&self, source_bundle: &Path, password: &str) -> Result<Outcome<Restored>> {
        let catalog_path = self.catalog_path()?;
        if !source_bundle.is_file() {
            return Err(Error::InvalidInput(format!(
                "The source must be a file: {}",
                source_bundle.display()
            )));
        }
        let stem = bundle_stem(source_bundle)?;
        let dir = catalog_dir(catalog_path);

        let workspace = Workspace::create_in(dir)?;
        let unpacked = workspace.subdir("bundle")?;
        extract(source_bundle, &unpacked)?;

        let private_entry = entry_names(source_bundle)?
            .into_iter()
            .find(|name| name.ends_with(PRIVATE_KEY_SUFFIX))
            .ok_or_else(|| {
                Error::InvalidInput("The backup does not contain a private key".to_string())
            })?;
        let private_key = fs::read(unpacked.join(&private_entry))?;

        let restored_dir = workspace.subdir("restored")?;
        let mut restored = decrypt_core(
            &workspace,
            &unpacked,
            &stem,
            &private_key,
            Some(password),
            &restored_dir,
        )?;
        let restored_file = match restored.len() {
            1 => restored.remove(0),
            n => {
                return Err(Error::InvalidInput(format!(
                    "A backup must hold exactly one catalog file, found {}",
                    n
                )))
            }
        };

        let rollover = create_rollover(catalog_path)?;

        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        io::copy(&mut File::open(&restored_file)?, staged.as_file_mut())?;
        staged.as_file().sync_all()?;
        staged
            .persist(catalog_path)
            .map_err(|e| Error::Io(e.error))?;

        info!(
            catalog = %catalog_path.display(),
            rollover = %rollover.display(),
            "Catalog restored"
        );
        Ok(Outcome::new(Restored {
            catalog: catalog_path.to_path_buf(),
            rollover,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::STRONG;
    use keycrypt_catalog::SqliteCatalog;
    use keycrypt_common::ErrorKind;
    use keycrypt_crypto::asymmetric::MIN_KEY_BITS;
    use tempfile::{tempdir, TempDir};

    fn catalog_in(dir: &TempDir) -> SqliteCatalog {
        let catalog = SqliteCatalog::open(dir.path().join("catalog.db")).unwrap();
        let keys = KeyStore::new(&catalog).with_key_bits(MIN_KEY_BITS);
        keys.generate("plain", None, None).unwrap();
        keys.generate("weak", Some("usual"), Some("password")).unwrap();
        keys.generate("strong", None, Some(STRONG)).unwrap();
        catalog
    }

    #[test]
    fn test_backup_requires_protected_key_pair() {
        let home = tempdir().unwrap();
        let catalog = catalog_in(&home);
        let out = tempdir().unwrap();

        let err = BackupRestorePipeline::new(&catalog)
            .backup(out.path(), "plain")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);

        let err = BackupRestorePipeline::new(&catalog)
            .backup(out.path(), "missing")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(catalog.archives().unwrap().is_empty());
    }

    #[test]
    fn test_backup_bundle_is_self_contained() {
        let home = tempdir().unwrap();
        let catalog = catalog_in(&home);
        let out = tempdir().unwrap();

        let outcome = BackupRestorePipeline::new(&catalog)
            .backup(out.path(), "strong")
            .unwrap();
        assert!(outcome.is_clean());

        let mut entries = entry_names(&outcome.value().bundle).unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                "catalog.db_ENCRYPTED.zip",
                "catalog.db_KEY.key",
                "strong_PRIVATE.key",
                "strong_public.key",
            ]
        );
        assert!(catalog.archives().unwrap().is_empty());
    }

    #[test]
    fn test_backup_with_weak_password_is_advisory() {
        let home = tempdir().unwrap();
        let catalog = catalog_in(&home);
        let out = tempdir().unwrap();

        let outcome = BackupRestorePipeline::new(&catalog)
            .backup(out.path(), "weak")
            .unwrap();
        assert_eq!(outcome.message(), MSG_WEAK);
        assert!(outcome.value().bundle.is_file());
    }

    #[test]
    fn test_restore_rolls_over_and_replaces_catalog() {
        let home = tempdir().unwrap();
        let catalog = catalog_in(&home);
        let catalog_path = home.path().join("catalog.db");
        let out = tempdir().unwrap();

        let snapshot = fs::read(&catalog_path).unwrap();
        let backup = BackupRestorePipeline::new(&catalog)
            .backup(out.path(), "strong")
            .unwrap()
            .into_value();

        KeyStore::new(&catalog)
            .with_key_bits(MIN_KEY_BITS)
            .generate("later", None, None)
            .unwrap();
        let before_first = fs::read(&catalog_path).unwrap();
        assert_ne!(before_first, snapshot);

        let first = BackupRestorePipeline::new(&catalog)
            .restore(&backup.bundle, STRONG)
            .unwrap()
            .into_value();
        assert_eq!(first.rollover, home.path().join("catalog.db.back_1"));
        assert_eq!(fs::read(&first.rollover).unwrap(), before_first);
        assert_eq!(fs::read(&catalog_path).unwrap(), snapshot);

        let second = BackupRestorePipeline::new(&catalog)
            .restore(&backup.bundle, STRONG)
            .unwrap()
            .into_value();
        assert_eq!(second.rollover, home.path().join("catalog.db.back_2"));
        assert_eq!(fs::read(&first.rollover).unwrap(), before_first);
        assert_eq!(fs::read(&second.rollover).unwrap(), snapshot);

        let reopened = SqliteCatalog::open(&catalog_path).unwrap();
        assert!(reopened.key_pair("strong").unwrap().is_some());
        assert!(reopened.key_pair("later").unwrap().is_none());
    }

    #[test]
    fn test_restore_wrong_password_leaves_catalog_alone() {
        let home = tempdir().unwrap();
        let catalog = catalog_in(&home);
        let catalog_path = home.path().join("catalog.db");
        let out = tempdir().unwrap();
        let backup = BackupRestorePipeline::new(&catalog)
            .backup(out.path(), "strong")
            .unwrap()
            .into_value();
        let before = fs::read(&catalog_path).unwrap();

        let err = BackupRestorePipeline::new(&catalog)
            .restore(&backup.bundle, "not the password")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
        assert_eq!(fs::read(&catalog_path).unwrap(), before);
        assert!(!home.path().join("catalog.db.back_1").exists());
    }

    #[test]
    fn test_restore_rejects_bundle_without_private_key() {
        let home = tempdir().unwrap();
        let catalog = catalog_in(&home);
        let input = tempdir().unwrap();
        let source = input.path().join("doc.txt");
        fs::write(&source, b"doc").unwrap();
        let out = tempdir().unwrap();
        let archive = EncryptionPipeline::new(&catalog)
            .encrypt(&source, out.path(), "strong")
            .unwrap();

        let err = BackupRestorePipeline::new(&catalog)
            .restore(&archive.bundle, STRONG)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_restore_corrupted_bundle_is_integrity_error() {
        use std::io::Write;
        use zip::write::SimpleFileOptions;
        use zip::{CompressionMethod, ZipWriter};

        let home = tempdir().unwrap();
        let catalog = catalog_in(&home);
        let catalog_path = home.path().join("catalog.db");
        let before = fs::read(&catalog_path).unwrap();

        let out = tempdir().unwrap();
        let bundle = out.path().join("catalog.db.zip");
        let payload: &[u8] = b"sealed catalog bytes";
        let mut writer = ZipWriter::new(File::create(&bundle).unwrap());
        writer
            .start_file(
                "catalog.db_ENCRYPTED.zip",
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
            )
            .unwrap();
        writer.write_all(payload).unwrap();
        writer.finish().unwrap();

        let mut bytes = fs::read(&bundle).unwrap();
        let at = bytes.windows(payload.len()).position(|w| w == payload).unwrap();
        bytes[at] ^= 0x01;
        fs::write(&bundle, bytes).unwrap();

        let err = BackupRestorePipeline::new(&catalog)
            .restore(&bundle, STRONG)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(fs::read(&catalog_path).unwrap(), before);
        assert!(!home.path().join("catalog.db.back_1").exists());
    }

    #[test]
    fn test_next_rollover_path_skips_existing() {
        let dir = tempdir().unwrap();
        let catalog_path = dir.path().join("k.db");
        assert_eq!(
            next_rollover_path(&catalog_path).unwrap(),
            dir.path().join("k.db.back_1")
        );

        fs::write(dir.path().join("k.db.back_1"), b"").unwrap();
        fs::write(dir.path().join("k.db.back_2"), b"").unwrap();
        assert_eq!(
            next_rollover_path(&catalog_path).unwrap(),
            dir.path().join("k.db.back_3")
        );
    }

    #[test]
    fn test_in_memory_catalog_cannot_back_up() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let out = tempdir().unwrap();
        let err = BackupRestorePipeline::new(&catalog)
            .backup(out.path(), "any")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
