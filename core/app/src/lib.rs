//! Application layer for Keycrypt front ends.
//!
//! [`Keycrypt`] bundles the configuration and the open catalog behind one
//! facade. [`OperationRunner`] runs facade operations on a blocking task,
//! allowing at most one in flight at a time.

pub mod facade;
pub mod runner;

pub use facade::Keycrypt;
pub use runner::{OperationId, OperationRunner, PendingOperation};
