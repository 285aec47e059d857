//! Metadata catalog for Keycrypt.
//!
//! The catalog records key pairs, their optional password metadata, and a
//! log of every bundle produced by an encrypt operation. Access goes through
//! the [`CatalogStore`] repository trait; [`SqliteCatalog`] is the file-backed
//! implementation.

pub mod models;
pub mod sqlite;
pub mod store;

pub use models::{ArchiveRecord, KeyPairRecord, NewArchive, NewKeyPair, PasswordMeta};
pub use sqlite::SqliteCatalog;
pub use store::CatalogStore;
