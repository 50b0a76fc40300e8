//! # Store Error Types
//!
//! ## Design Principles
//!
//! 1. **Stable Codes**: Each contract-facing variant has a fixed negative
//!    numeric code so the REPL (or any other caller) can surface the exact
//!    sentinel the specification promises, without re-deriving it.
//! 2. **Three Classes**: Contract errors (returned, expected), I/O errors
//!    (surfaced by the codec), and `Unknown` (an internal-invariant guard).
//! 3. **Low Overhead**: The enum is `Copy`-free but cheap to clone; no
//!    variant carries more than a `String` for context.

use thiserror::Error;

/// Result type used across the store's library crates.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error kinds returned by the storage contract, the codec, and the
/// dispatcher/TTL manager.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum StoreError {
    /// `set` was called with a key that already exists.
    #[error("key already exists")]
    KeyAlreadyExists,

    /// The key is absent from the engine.
    #[error("key not found")]
    KeyNotFound,

    /// `ttl` was called on a key that exists but carries no deadline.
    #[error("key has no ttl")]
    HasNoTtl,

    /// The codec could not open the target path.
    #[error("cannot open file")]
    CannotOpenFile,

    /// The codec rejected the file's contents.
    #[error("corrupted file: {reason}")]
    CorruptedFile {
        /// Human-readable detail describing the specific parse failure.
        reason: String,
    },

    /// An internal invariant was violated; callers should treat this as a bug.
    #[error("unknown error")]
    Unknown,
}

impl StoreError {
    /// Builds a [`StoreError::CorruptedFile`] with the given detail.
    pub fn corrupted(reason: impl Into<String>) -> Self {
        StoreError::CorruptedFile {
            reason: reason.into(),
        }
    }

    /// Returns the stable negative sentinel from the external interface
    /// contract (see the command-surface spec: `KeyNotFound = -2`,
    /// `HasNoTtl = -3`, `CannotOpenFile = -4`, `CorruptedFile = -5`,
    /// `Unknown = -10`). `KeyAlreadyExists` has no externally-sentineled
    /// code; it is reported as a message, not a numeric code.
    pub const fn code(&self) -> i64 {
        match self {
            StoreError::KeyAlreadyExists => -1,
            StoreError::KeyNotFound => -2,
            StoreError::HasNoTtl => -3,
            StoreError::CannotOpenFile => -4,
            StoreError::CorruptedFile { .. } => -5,
            StoreError::Unknown => -10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_codes_match_contract() {
        assert_eq!(StoreError::KeyNotFound.code(), -2);
        assert_eq!(StoreError::HasNoTtl.code(), -3);
        assert_eq!(StoreError::CannotOpenFile.code(), -4);
        assert_eq!(StoreError::corrupted("short line").code(), -5);
        assert_eq!(StoreError::Unknown.code(), -10);
    }
}
