//! Common utilities and types shared across Keycrypt modules.
//!
//! This module provides the error taxonomy every operation reports through,
//! the advisory-carrying [`Outcome`] type, and a zeroizing byte buffer for
//! transient secrets.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{Outcome, SensitiveBytes};
