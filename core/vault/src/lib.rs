//! Key management and hybrid encryption for Keycrypt.
//!
//! This module provides:
//! - The password strength policy
//! - Key pair generation, import and export
//! - Encryption of files and directories into self-contained bundles
//! - Encrypted backups of the catalog and their restoration
//!
//! # Architecture
//! Every operation borrows a [`keycrypt_catalog::CatalogStore`] and runs to
//! completion synchronously. Scratch files live in a per-operation
//! [`Workspace`] that is removed on every exit path.

pub mod backup;
pub mod config;
pub mod keystore;
pub mod pipeline;
pub mod policy;
pub mod workspace;

pub use backup::{next_rollover_path, Backup, BackupRestorePipeline, Restored};
pub use config::KeycryptConfig;
pub use keystore::KeyStore;
pub use pipeline::{EncryptedArchive, EncryptionPipeline};
pub use policy::{PasswordPolicy, PasswordVerdict};
pub use workspace::{OutputGuard, Workspace};
