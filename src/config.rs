//! Engine configuration.
//!
//! Every section has a `Default` and deserializes with missing fields
//! filled from it, so a JSON file only needs the values it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeluneError, Result};
use crate::selector::ScoringConfig;
use crate::storage::StorageConfig;

/// Field number of document text terms in a document segment.
pub const DEFAULT_TEXT_FIELD: u32 = 0;

/// Field number of label (pool) terms in a document segment.
pub const DEFAULT_LABEL_FIELD: u32 = 1;

/// Sizing of the scratch-buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPoolConfig {
    /// Maximum number of handles checked out at once.
    pub max_handles: usize,
    /// Initial byte capacity of each handle's read buffer.
    pub buffer_bytes: usize,
    /// Number of thread slots a handle can be bound to.
    pub slot_count: usize,
}

impl Default for MemoryPoolConfig {
    fn default() -> Self {
        MemoryPoolConfig {
            max_handles: 8,
            buffer_bytes: 64 * 1024,
            slot_count: 8,
        }
    }
}

/// Segment layout limits and field numbering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Byte ceiling of any single segment payload file.
    pub max_segment_bytes: u64,
    /// Field number holding document terms.
    pub text_field: u32,
    /// Field number holding labels.
    pub label_field: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            max_segment_bytes: 1 << 31,
            text_field: DEFAULT_TEXT_FIELD,
            label_field: DEFAULT_LABEL_FIELD,
        }
    }
}

/// Training writer behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Log co-occurrence progress every this many vocabulary terms.
    pub progress_interval: usize,
    /// Whether commits write the term x term co-occurrence files.
    pub with_cooccurrence: bool,
    /// Scoring method recorded with each committed segment.
    pub scoring: ScoringConfig,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            progress_interval: 100,
            with_cooccurrence: true,
            scoring: ScoringConfig::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeluneConfig {
    pub storage: StorageConfig,
    pub memory: MemoryPoolConfig,
    pub segment: SegmentConfig,
    pub writer: WriterConfig,
}

impl DeluneConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DeluneConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let memory = &self.memory;
        if memory.max_handles == 0 || memory.slot_count == 0 {
            return Err(DeluneError::invalid_argument(
                "memory pool needs at least one handle and one slot",
            ));
        }
        if memory.max_handles > memory.slot_count {
            return Err(DeluneError::invalid_argument(format!(
                "max_handles ({}) exceeds slot_count ({})",
                memory.max_handles, memory.slot_count
            )));
        }
        if self.writer.progress_interval == 0 {
            return Err(DeluneError::invalid_argument(
                "progress_interval must be positive",
            ));
        }
        if self.segment.text_field == self.segment.label_field {
            return Err(DeluneError::invalid_argument(
                "text and label fields must differ",
            ));
        }
        Ok(())
    }
}
