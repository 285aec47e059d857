//! Zip containers for Keycrypt bundles.
//!
//! Every container is written with deflate at the maximum compression level
//! and created exclusively: an existing file at the target path is never
//! overwritten.

pub mod bundler;

pub use bundler::{append_files, bundle_directory, bundle_files, entry_names, extract};
