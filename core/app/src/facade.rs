//! Single entry point over the catalog and the vault operations.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use keycrypt_catalog::{ArchiveRecord, CatalogStore, KeyPairRecord, SqliteCatalog};
use keycrypt_common::{Error, Outcome, Result};
use keycrypt_vault::{
    Backup, BackupRestorePipeline, EncryptedArchive, EncryptionPipeline, KeyStore,
    KeycryptConfig, Restored,
};

/// An open catalog plus the configuration it was opened with.
pub struct Keycrypt {
    config: KeycryptConfig,
    catalog: SqliteCatalog,
}

impl Keycrypt {
    /// Open the configured catalog, creating it and its directory if missing.
    ///
    /// # Errors
    /// - `InvalidInput` if the configuration is out of range
    /// - `Catalog` if the database cannot be opened
    pub fn open(config: KeycryptConfig) -> Result<Self> {
        config.validate()?;
        if let Some(parent) = config.catalog_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let catalog = SqliteCatalog::open(&config.catalog_path)?;
        info!(catalog = %config.catalog_path.display(), "Keycrypt ready");
        Ok(Self { config, catalog })
    }

    pub fn config(&self) -> &KeycryptConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SqliteCatalog {
        &self.catalog
    }

    fn keys(&self) -> KeyStore<'_, SqliteCatalog> {
        KeyStore::new(&self.catalog).with_key_bits(self.config.key_bits)
    }

    pub fn generate_key_pair(
        &self,
        name: &str,
        hint: Option<&str>,
        password: Option<&str>,
    ) -> Result<Outcome<KeyPairRecord>> {
        self.keys().generate(name, hint, password)
    }

    pub fn import_key_pair(
        &self,
        name: &str,
        private_path: &Path,
        public_path: &Path,
        hint: Option<&str>,
        password: Option<&str>,
    ) -> Result<Outcome<KeyPairRecord>> {
        self.keys()
            .import_pair(name, private_path, public_path, hint, password)
    }

    pub fn export_key_pair(&self, name: &str, dest_dir: &Path) -> Result<Outcome<Vec<PathBuf>>> {
        self.keys().export_one(name, dest_dir).map(Outcome::new)
    }

    pub fn export_all_key_pairs(&self, dest_dir: &Path) -> Result<Outcome<Vec<PathBuf>>> {
        self.keys().export_all(dest_dir).map(Outcome::new)
    }

    pub fn encrypt(
        &self,
        source: &Path,
        dest_dir: &Path,
        key_pair_name: &str,
    ) -> Result<Outcome<EncryptedArchive>> {
        EncryptionPipeline::new(&self.catalog)
            .encrypt(source, dest_dir, key_pair_name)
            .map(Outcome::new)
    }

    pub fn decrypt(
        &self,
        source_bundle: &Path,
        dest_dir: &Path,
        key_pair_name: &str,
        password: Option<&str>,
    ) -> Result<Outcome<Vec<PathBuf>>> {
        EncryptionPipeline::new(&self.catalog)
            .decrypt(source_bundle, dest_dir, key_pair_name, password)
            .map(Outcome::new)
    }

    pub fn backup(&self, dest_dir: &Path, key_pair_name: &str) -> Result<Outcome<Backup>> {
        BackupRestorePipeline::new(&self.catalog).backup(dest_dir, key_pair_name)
    }

    /// Restore the catalog from a backup and reopen it.
    pub fn restore(&mut self, source_bundle: &Path, password: &str) -> Result<Outcome<Restored>> {
        let outcome = BackupRestorePipeline::new(&self.catalog).restore(source_bundle, password)?;
        self.catalog = SqliteCatalog::open(&self.config.catalog_path)?;
        Ok(outcome)
    }

    /// All key pairs, newest first.
    pub fn key_pairs(&self) -> Result<Vec<KeyPairRecord>> {
        self.keys().list()
    }

    /// One key pair by name.
    ///
    /// # Errors
    /// - `NotFound` if it does not exist
    pub fn key_pair(&self, name: &str) -> Result<KeyPairRecord> {
        self.keys().get(name)
    }

    /// All key pair names, newest first.
    pub fn key_pair_names(&self) -> Result<Vec<String>> {
        self.keys().names()
    }

    /// All archive records, newest first.
    pub fn archives(&self) -> Result<Vec<ArchiveRecord>> {
        self.catalog.archives()
    }

    /// The most recent archive record with `name`.
    ///
    /// # Errors
    /// - `NotFound` if no archive has that name
    pub fn archive(&self, name: &str) -> Result<ArchiveRecord> {
        self.catalog
            .archive(name)?
            .ok_or_else(|| Error::NotFound(format!("Archive does not exist: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keycrypt_common::ErrorKind;
    use tempfile::tempdir;

    const STRONG: &str = "PASSWORDpassword12#$";

    fn open_in(dir: &Path) -> Keycrypt {
        let config = KeycryptConfig::new(dir.join("data").join("keycrypt.db")).with_key_bits(2048);
        Keycrypt::open(config).unwrap()
    }

    #[test]
    fn test_open_creates_catalog() {
        let home = tempdir().unwrap();
        let app = open_in(home.path());
        assert!(home.path().join("data/keycrypt.db").is_file());
        assert!(app.key_pairs().unwrap().is_empty());

        let err = Keycrypt::open(KeycryptConfig::new(home.path().join("x.db")).with_key_bits(512))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_encrypt_then_show_archive() {
        let home = tempdir().unwrap();
        let app = open_in(home.path());
        app.generate_key_pair("alice", None, None).unwrap();

        let input = tempdir().unwrap();
        let source = input.path().join("plan.txt");
        fs::write(&source, b"the plan").unwrap();
        let out = tempdir().unwrap();

        app.encrypt(&source, out.path(), "alice").unwrap();
        let record = app.archive("plan.txt").unwrap();
        assert_eq!(record.key_pair_name, "alice");
        assert_eq!(app.archives().unwrap().len(), 1);

        let err = app.archive("other.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let restored = tempdir().unwrap();
        app.decrypt(&out.path().join("plan.txt.zip"), restored.path(), "alice", None)
            .unwrap();
        assert_eq!(fs::read(restored.path().join("plan.txt")).unwrap(), b"the plan");
    }

    #[test]
    fn test_restore_reopens_catalog() {
        let home = tempdir().unwrap();
        let mut app = open_in(home.path());
        app.generate_key_pair("guard", None, Some(STRONG)).unwrap();
        let out = tempdir().unwrap();
        let backup = app.backup(out.path(), "guard").unwrap().into_value();

        app.generate_key_pair("after", None, None).unwrap();
        assert_eq!(app.key_pair_names().unwrap(), vec!["after", "guard"]);

        app.restore(&backup.bundle, STRONG).unwrap();
        assert_eq!(app.key_pair_names().unwrap(), vec!["guard"]);
        assert!(home.path().join("data/keycrypt.db.back_1").is_file());
    }
}
