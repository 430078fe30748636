//! Error types for the Delune storage engine.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`DeluneError`] enum. Messages carry enough context (generation, term,
//! file, operation) to diagnose a failure without opening the binary files.
//!
//! # Examples
//!
//! ```
//! use delune::error::{DeluneError, Result};
//!
//! fn lookup() -> Result<u32> {
//!     Err(DeluneError::not_found("term 'dog' in generation 3"))
//! }
//!
//! match lookup() {
//!     Ok(df) => println!("df = {df}"),
//!     Err(e) if e.is_not_found() => println!("absent"),
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Delune operations.
#[derive(Error, Debug)]
pub enum DeluneError {
    /// A term, segment or file is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed or truncated binary data.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A segment operation was attempted while the segment is closed.
    #[error("Segment not opened: {0}")]
    NotOpened(String),

    /// A segment was opened twice.
    #[error("Segment already opened: {0}")]
    AlreadyOpened(String),

    /// The memory pool has no free handle left.
    #[error("Memory pool exhausted: {0}")]
    PoolExhausted(String),

    /// The handle for a thread slot is already checked out.
    #[error("Memory handle in use: slot {0}")]
    HandleInUse(usize),

    /// A posting list or file exceeded the configured byte ceiling.
    #[error("Segment too large: {0}")]
    SegmentTooLarge(String),

    /// I/O errors from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid caller input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization of metadata, snapshots or caches failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for operations that may fail with DeluneError.
pub type Result<T> = std::result::Result<T, DeluneError>;

impl DeluneError {
    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        DeluneError::NotFound(msg.into())
    }

    /// Create a new codec error.
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        DeluneError::Codec(msg.into())
    }

    /// Create a new not opened error.
    pub fn not_opened<S: Into<String>>(msg: S) -> Self {
        DeluneError::NotOpened(msg.into())
    }

    /// Create a new already opened error.
    pub fn already_opened<S: Into<String>>(msg: S) -> Self {
        DeluneError::AlreadyOpened(msg.into())
    }

    /// Create a new pool exhausted error.
    pub fn pool_exhausted<S: Into<String>>(msg: S) -> Self {
        DeluneError::PoolExhausted(msg.into())
    }

    /// Create a new segment too large error.
    pub fn segment_too_large<S: Into<String>>(msg: S) -> Self {
        DeluneError::SegmentTooLarge(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        DeluneError::Storage(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        DeluneError::InvalidArgument(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        DeluneError::Serialization(msg.into())
    }

    /// Whether this error only signals absence.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeluneError::NotFound(_))
    }

    /// Prefix the message with the operation that failed.
    ///
    /// I/O errors keep their kind; every other variant keeps its variant.
    pub fn context<S: AsRef<str>>(self, what: S) -> Self {
        let what = what.as_ref();
        match self {
            DeluneError::NotFound(m) => DeluneError::NotFound(format!("{what}: {m}")),
            DeluneError::Codec(m) => DeluneError::Codec(format!("{what}: {m}")),
            DeluneError::NotOpened(m) => DeluneError::NotOpened(format!("{what}: {m}")),
            DeluneError::AlreadyOpened(m) => DeluneError::AlreadyOpened(format!("{what}: {m}")),
            DeluneError::PoolExhausted(m) => DeluneError::PoolExhausted(format!("{what}: {m}")),
            DeluneError::SegmentTooLarge(m) => {
                DeluneError::SegmentTooLarge(format!("{what}: {m}"))
            }
            DeluneError::Io(e) => DeluneError::Io(io::Error::new(e.kind(), format!("{what}: {e}"))),
            DeluneError::Storage(m) => DeluneError::Storage(format!("{what}: {m}")),
            DeluneError::InvalidArgument(m) => {
                DeluneError::InvalidArgument(format!("{what}: {m}"))
            }
            DeluneError::Serialization(m) => DeluneError::Serialization(format!("{what}: {m}")),
            other @ DeluneError::HandleInUse(_) => other,
        }
    }
}

impl From<serde_json::Error> for DeluneError {
    fn from(err: serde_json::Error) -> Self {
        DeluneError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for DeluneError {
    fn from(err: bincode::Error) -> Self {
        DeluneError::Serialization(err.to_string())
    }
}
