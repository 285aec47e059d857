//! Catalog repository trait.

use std::path::Path;

use crate::models::{ArchiveRecord, KeyPairRecord, NewArchive, NewKeyPair};
use keycrypt_common::Result;

/// Typed access to the three catalog entities.
///
/// Lookups return `Ok(None)` for absent rows; errors are reserved for store
/// failures and constraint violations.
pub trait CatalogStore: Send {
    /// Persist a key pair together with its password metadata.
    ///
    /// Both rows are written in one transaction.
    ///
    /// # Errors
    /// - `Conflict` if a key pair with the same name exists; nothing is written
    fn create_key_pair(&self, key_pair: NewKeyPair) -> Result<KeyPairRecord>;

    /// Fetch a key pair by name.
    fn key_pair(&self, name: &str) -> Result<Option<KeyPairRecord>>;

    /// All key pairs, newest first.
    fn key_pairs(&self) -> Result<Vec<KeyPairRecord>>;

    /// Append an archive record.
    ///
    /// # Errors
    /// - `NotFound` if the referenced key pair does not exist
    fn record_archive(&self, archive: NewArchive) -> Result<ArchiveRecord>;

    /// The most recent archive record with the given name.
    fn archive(&self, name: &str) -> Result<Option<ArchiveRecord>>;

    /// All archive records, newest first.
    fn archives(&self) -> Result<Vec<ArchiveRecord>>;

    /// Location of the backing file, if the store is file based.
    fn path(&self) -> Option<&Path>;
}
