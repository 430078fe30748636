//! In-memory storage implementation for testing.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DeluneError, Result};
use crate::storage::traits::{Storage, StorageError, StorageInput, StorageLock, StorageOutput};

type FileMap = Arc<Mutex<HashMap<String, Arc<[u8]>>>>;
type LockSet = Arc<Mutex<HashSet<String>>>;

/// An in-memory storage implementation.
///
/// Output bytes become visible to readers when the output is synced or
/// closed, which mirrors the durability point of [`crate::storage::FileStorage`].
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    files: FileMap,
    /// File-name suffixes whose creation fails, for exercising abort paths.
    failing: Arc<Mutex<Vec<String>>>,
    /// Names of the locks currently held. Shared by every clone.
    locks: LockSet,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Make every later `create_output` for a name ending in `suffix` fail.
    pub fn fail_outputs_ending_with<S: Into<String>>(&self, suffix: S) {
        self.failing.lock().push(suffix.into());
    }

    /// Undo every `fail_outputs_ending_with`.
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Overwrite a file's bytes directly.
    pub fn put_bytes(&self, name: &str, data: Vec<u8>) {
        self.files.lock().insert(name.to_string(), Arc::from(data));
    }

    /// Copy a file's bytes out.
    pub fn get_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|data| data.to_vec())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        Ok(Box::new(MemoryInput::new(Arc::clone(data))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        if self.failing.lock().iter().any(|suffix| name.ends_with(suffix.as_str())) {
            return Err(DeluneError::Io(std::io::Error::other(format!(
                "injected failure creating {name}"
            ))));
        }

        self.files.lock().insert(name.to_string(), Arc::from(Vec::new()));
        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        Ok(data.len() as u64)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn try_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>> {
        if !self.locks.lock().insert(name.to_string()) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLock {
            name: name.to_string(),
            locks: Arc::clone(&self.locks),
            released: false,
        })))
    }
}

/// A lock held in the storage's shared lock set.
#[derive(Debug)]
struct MemoryLock {
    name: String,
    locks: LockSet,
    released: bool,
}

impl StorageLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.locks.lock().remove(&self.name);
            self.released = true;
        }
        Ok(())
    }

    fn is_valid(&self) -> bool {
        !self.released
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        if !self.released {
            self.locks.lock().remove(&self.name);
        }
    }
}

/// A memory-based input implementation.
#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Arc<[u8]>>,
    size: u64,
}

impl MemoryInput {
    fn new(data: Arc<[u8]>) -> Self {
        let size = data.len() as u64;
        MemoryInput {
            cursor: Cursor::new(data),
            size,
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A memory-based output implementation.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Cursor<Vec<u8>>,
    files: FileMap,
}

impl MemoryOutput {
    fn new(name: String, files: FileMap) -> Self {
        MemoryOutput {
            name,
            buffer: Cursor::new(Vec::new()),
            files,
        }
    }

    fn publish(&self) {
        self.files
            .lock()
            .insert(self.name.clone(), Arc::from(self.buffer.get_ref().as_slice()));
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryOutput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.buffer.seek(pos)
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.buffer.position())
    }

    fn close(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }
}
