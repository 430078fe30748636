//! Registry of committed segment generations (`segments.json`).
//!
//! Every change re-reads the file under the exclusive `segments` storage
//! lock before applying itself, so registries loaded by separate writers
//! over the same storage never hand out the same generation or drop each
//! other's registrations.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeluneError, Result};
use crate::storage::{Storage, StorageError, StorageLock};

/// Name of the registry file.
pub const REGISTRY_FILE: &str = "segments.json";

const REGISTRY_TEMP_FILE: &str = "segments.json.tmp";

/// Name of the storage lock guarding registry changes.
pub const REGISTRY_LOCK: &str = "segments";

const LOCK_ATTEMPTS: u32 = 200;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Every extension a generation may own.
pub const SEGMENT_EXTENSIONS: [&str; 7] = ["fis", "fii", "cfq", "cof", "coi", "cfi", "cps"];

/// File name of one generation's companion file.
pub fn segment_file_name(generation: u64, extension: &str) -> String {
    format!("{generation}.{extension}")
}

/// Best-effort removal of every file a generation may have created.
pub fn discard_generation(storage: &dyn Storage, generation: u64) {
    for extension in SEGMENT_EXTENSIONS {
        let name = segment_file_name(generation, extension);
        if storage.file_exists(&name)
            && let Err(e) = storage.delete_file(&name)
        {
            log::warn!("could not delete {name} of discarded generation {generation}: {e}");
        }
    }
}

/// What a generation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Per-document postings written by the segment builder.
    Documents,
    /// Per-pool term statistics written by the training writer.
    Training,
}

/// Metadata of one committed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub generation: u64,
    pub kind: SegmentKind,
    /// Documents indexed (document segments) or scanned (training segments).
    pub doc_count: u64,
    /// Pool names in pool-number order.
    #[serde(default)]
    pub pools: Vec<String>,
    #[serde(default)]
    pub numpool: usize,
    #[serde(default)]
    pub numvoca: usize,
    /// Corpus size used for IDF.
    #[serde(rename = "N", default)]
    pub n: u64,
    /// Terms kept by the last feature selection, empty when none ran.
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub has_cooccurrence: bool,
    /// Document segment a training segment was computed from.
    #[serde(default)]
    pub source_generation: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl SegmentInfo {
    /// Metadata for a fresh generation; callers fill in the rest.
    pub fn new(generation: u64, kind: SegmentKind) -> Self {
        SegmentInfo {
            generation,
            kind,
            doc_count: 0,
            pools: Vec::new(),
            numpool: 0,
            numvoca: 0,
            n: 0,
            features: Vec::new(),
            parameters: BTreeMap::new(),
            has_cooccurrence: false,
            source_generation: None,
            created_at: Utc::now(),
        }
    }

    /// Corpus size used for IDF: `N` when recorded, the document count otherwise.
    pub fn corpus_size(&self) -> u64 {
        if self.n > 0 { self.n } else { self.doc_count }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    next_generation: u64,
    segments: Vec<SegmentInfo>,
}

/// Tracks committed generations and hands out new generation numbers.
#[derive(Debug)]
pub struct SegmentRegistry {
    storage: Arc<dyn Storage>,
    state: RegistryFile,
}

impl SegmentRegistry {
    /// Load `segments.json`, or start empty when it does not exist.
    pub fn load(storage: Arc<dyn Storage>) -> Result<Self> {
        let state = read_state(storage.as_ref())?;
        Ok(SegmentRegistry { storage, state })
    }

    /// Re-read `segments.json` to pick up other writers' commits.
    pub fn refresh(&mut self) -> Result<()> {
        self.state = read_state(self.storage.as_ref())?;
        Ok(())
    }

    /// Allocate a generation number. The allocation is persisted before it
    /// is returned, so a number is never handed out twice.
    pub fn next_generation(&mut self) -> Result<u64> {
        self.locked(|state| {
            let generation = state.next_generation;
            state.next_generation += 1;
            Ok(generation)
        })
    }

    /// Record a committed generation.
    pub fn register(&mut self, info: SegmentInfo) -> Result<()> {
        let generation = info.generation;
        self.locked(|state| {
            if state.segments.iter().any(|s| s.generation == generation) {
                return Err(DeluneError::invalid_argument(format!(
                    "generation {generation} is already registered"
                )));
            }
            state.segments.push(info);
            state.segments.sort_by_key(|s| s.generation);
            state.next_generation = state.next_generation.max(generation + 1);
            Ok(())
        })?;
        log::info!("registered segment generation {generation}");
        Ok(())
    }

    /// Metadata of one generation.
    pub fn get(&self, generation: u64) -> Option<&SegmentInfo> {
        self.state
            .segments
            .iter()
            .find(|s| s.generation == generation)
    }

    /// All registered generations, oldest first.
    pub fn segments(&self) -> &[SegmentInfo] {
        &self.state.segments
    }

    /// Registered generations of one kind, oldest first.
    pub fn segments_of(&self, kind: SegmentKind) -> Vec<&SegmentInfo> {
        self.state
            .segments
            .iter()
            .filter(|s| s.kind == kind)
            .collect()
    }

    /// Newest generation of one kind.
    pub fn latest(&self, kind: SegmentKind) -> Option<&SegmentInfo> {
        self.state.segments.iter().rev().find(|s| s.kind == kind)
    }

    /// The storage the registry lives in.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Apply `change` to the on-disk state under the registry lock.
    ///
    /// The in-memory view is replaced only once the changed state is saved.
    fn locked<T>(&mut self, change: impl FnOnce(&mut RegistryFile) -> Result<T>) -> Result<T> {
        let mut lock = self.acquire_lock()?;
        let mut state = read_state(self.storage.as_ref())?;
        let value = change(&mut state)?;
        save_state(self.storage.as_ref(), &state)?;
        self.state = state;
        lock.release()?;
        Ok(value)
    }

    fn acquire_lock(&self) -> Result<Box<dyn StorageLock>> {
        for attempt in 0..LOCK_ATTEMPTS {
            if let Some(lock) = self.storage.try_lock(REGISTRY_LOCK)? {
                if attempt > 0 {
                    log::debug!("registry lock taken after {attempt} retries");
                }
                return Ok(lock);
            }
            std::thread::sleep(LOCK_RETRY_INTERVAL);
        }
        log::warn!("registry lock still held after {LOCK_ATTEMPTS} attempts");
        Err(StorageError::LockFailed(REGISTRY_LOCK.to_string()).into())
    }
}

fn read_state(storage: &dyn Storage) -> Result<RegistryFile> {
    if !storage.file_exists(REGISTRY_FILE) {
        return Ok(RegistryFile {
            next_generation: 1,
            segments: Vec::new(),
        });
    }

    let mut input = storage.open_input(REGISTRY_FILE)?;
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;
    let mut state: RegistryFile = serde_json::from_slice(&data).map_err(|e| {
        DeluneError::serialization(format!("failed to parse {REGISTRY_FILE}: {e}"))
    })?;

    // A hand-edited or older file may lag behind its own segments.
    let floor = state
        .segments
        .iter()
        .map(|s| s.generation + 1)
        .max()
        .unwrap_or(1);
    state.next_generation = state.next_generation.max(floor);
    Ok(state)
}

fn save_state(storage: &dyn Storage, state: &RegistryFile) -> Result<()> {
    let data = serde_json::to_vec_pretty(state).map_err(|e| {
        DeluneError::serialization(format!("failed to serialize {REGISTRY_FILE}: {e}"))
    })?;

    let mut output = storage.create_output(REGISTRY_TEMP_FILE)?;
    output.write_all(&data)?;
    output.flush_and_sync()?;
    output.close()?;
    storage.rename_file(REGISTRY_TEMP_FILE, REGISTRY_FILE)
}
