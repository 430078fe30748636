//! Storage abstraction trait and common types.

use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

use crate::error::{DeluneError, Result};

/// A trait for storage backends holding segment files.
///
/// Segments only ever address files by name; the backend decides where the
/// bytes live.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open a file for reading. The handle is read-only.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create (or truncate) a file for writing.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files in the storage, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a file, replacing the destination if it exists.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Try to take the exclusive lock `name`.
    ///
    /// Returns `None` while another holder has it, in this process or any
    /// other sharing the storage. The lock is held until the guard is
    /// released or dropped.
    fn try_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>>;
}

/// An exclusive lock on a named resource in storage.
pub trait StorageLock: Send + std::fmt::Debug {
    /// Get the name of the lock.
    fn name(&self) -> &str;

    /// Release the lock. Releasing twice is a no-op.
    fn release(&mut self) -> Result<()>;

    /// Check if the lock is still held.
    fn is_valid(&self) -> bool;
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// A read past the end of the file is reported as a codec error, since
    /// callers only compute offsets from dictionary records.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let size = self.size()?;
        let end = offset.checked_add(buf.len() as u64);
        if end.is_none_or(|end| end > size) {
            return Err(DeluneError::codec(format!(
                "read of {} bytes at offset {offset} exceeds file size {size}",
                buf.len()
            )));
        }
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                DeluneError::codec(format!("short read at offset {offset}"))
            }
            _ => DeluneError::Io(e),
        })
    }

    /// Close the input stream.
    fn close(&mut self) -> Result<()>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Seek + Send + Sync + std::fmt::Debug {
    /// Flush buffered bytes and fsync the file.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Get the current position in the output stream.
    fn position(&self) -> Result<u64>;

    /// Close the output stream.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> Result<u64> {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.as_mut().read_at(offset, buf)
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

/// Configuration for storage backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Buffer size for I/O operations.
    pub buffer_size: usize,

    /// Whether to flush after every write.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            buffer_size: 65536,
            sync_writes: false,
        }
    }
}

/// Error types specific to storage operations.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// File not found.
    FileNotFound(String),

    /// I/O error.
    IoError(String),

    /// Invalid operation.
    InvalidOperation(String),

    /// Lock acquisition failed.
    LockFailed(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::InvalidOperation(msg) => write!(f, "Invalid operation: {msg}"),
            StorageError::LockFailed(name) => write!(f, "Failed to acquire lock: {name}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for DeluneError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FileNotFound(name) => DeluneError::not_found(format!("file {name}")),
            other => DeluneError::storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();

        assert_eq!(config.buffer_size, 65536);
        assert!(!config.sync_writes);
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::FileNotFound("3.fis".to_string());
        assert_eq!(err.to_string(), "File not found: 3.fis");

        let err = StorageError::InvalidOperation("write to read-only input".to_string());
        assert_eq!(err.to_string(), "Invalid operation: write to read-only input");

        let err = StorageError::LockFailed("segments".to_string());
        assert_eq!(err.to_string(), "Failed to acquire lock: segments");
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let err: DeluneError = StorageError::FileNotFound("7.cfq".to_string()).into();
        assert!(err.is_not_found());

        let err: DeluneError = StorageError::IoError("boom".to_string()).into();
        assert!(!err.is_not_found());
    }
}
