//! Common types used throughout Keycrypt.

use std::fmt;
use zeroize::Zeroize;

/// Result of an operation that succeeded, possibly with advisories.
///
/// Advisories are non-fatal messages the user should see, such as a weak
/// password warning. Hard failures are reported through [`crate::Error`]
/// instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    value: T,
    advisories: Vec<String>,
}

impl<T> Outcome<T> {
    /// Create a clean outcome with no advisories.
    pub fn new(value: T) -> Self {
        Self {
            value,
            advisories: Vec::new(),
        }
    }

    /// Attach an advisory message. Empty messages are ignored.
    pub fn with_advisory(mut self, advisory: impl Into<String>) -> Self {
        self.push_advisory(advisory);
        self
    }

    /// Append an advisory message. Empty messages are ignored.
    pub fn push_advisory(&mut self, advisory: impl Into<String>) {
        let advisory = advisory.into();
        if !advisory.is_empty() {
            self.advisories.push(advisory);
        }
    }

    /// Advisory messages in the order they were raised.
    pub fn advisories(&self) -> &[String] {
        &self.advisories
    }

    /// Whether the operation finished without advisories.
    pub fn is_clean(&self) -> bool {
        self.advisories.is_empty()
    }

    /// All advisories joined into a single user-facing message.
    pub fn message(&self) -> String {
        self.advisories.join("\n\n")
    }

    /// Borrow the produced value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume the outcome, returning the produced value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Transform the value, keeping the advisories.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            advisories: self.advisories,
        }
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}
