//! In-memory secret holder

use std::fmt;

/// A credential that must never be logged or placed on a command line
///
/// `Debug` is redacted and the buffer is overwritten when the value is
/// cleared or dropped.
#[derive(Clone, Default)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext; only for writing to a child's stdin
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True once cleared (or if created empty)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrite and release the plaintext
    pub fn clear(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes();
        bytes.fill(0);
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.clear();
    }
}
