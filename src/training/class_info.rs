//! Durable per-term feature-class cache (`cfi`).
//!
//! Layout: `"DLCF"`, a `u32` format version, the bincode-encoded
//! [`FeatureClassInfo`], and a CRC32 footer. The cache remembers which
//! document segment and which pool order it was computed against; a cache
//! that does not match the current writer is discarded instead of reused.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{DeluneError, Result};
use crate::selector::PoolStats;
use crate::storage::{Storage, StorageInput, StorageOutput, StructReader, StructWriter};

const CLASS_INFO_MAGIC: &[u8; 4] = b"DLCF";
const CLASS_INFO_VERSION: u32 = 1;

/// A term's document frequency and its per-pool breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermClassInfo {
    /// Sum of the per-pool document frequencies.
    pub df: u64,
    /// `(df, tf)` per pool, in pool-number order.
    pub pools: Vec<PoolStats>,
}

impl TermClassInfo {
    pub fn new(pools: Vec<PoolStats>) -> Self {
        TermClassInfo {
            df: pools.iter().map(|p| p.df).sum(),
            pools,
        }
    }

    /// A term observed in no pool.
    pub fn empty(pool_count: usize) -> Self {
        Self::new(vec![PoolStats::default(); pool_count])
    }
}

/// Cached [`TermClassInfo`] keyed by term.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureClassInfo {
    source_generation: Option<u64>,
    pools: Vec<String>,
    entries: HashMap<String, TermClassInfo>,
}

impl FeatureClassInfo {
    pub fn new(source_generation: Option<u64>, pools: Vec<String>) -> Self {
        FeatureClassInfo {
            source_generation,
            pools,
            entries: HashMap::new(),
        }
    }

    pub fn source_generation(&self) -> Option<u64> {
        self.source_generation
    }

    /// Pool names the cached breakdowns are ordered by.
    pub fn pools(&self) -> &[String] {
        &self.pools
    }

    /// Whether the cache was computed against this source and pool order.
    pub fn matches(&self, source_generation: Option<u64>, pools: &[String]) -> bool {
        self.source_generation == source_generation && self.pools == pools
    }

    pub fn get(&self, term: &str) -> Option<&TermClassInfo> {
        self.entries.get(term)
    }

    pub fn insert(&mut self, term: String, info: TermClassInfo) {
        self.entries.insert(term, info);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let payload = bincode::serialize(self)?;

        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_raw(CLASS_INFO_MAGIC)?;
        writer.write_u32(CLASS_INFO_VERSION)?;
        writer.write_raw(&payload)?;
        let mut output = writer.finish()?;
        output.flush_and_sync()?;
        output.close()
    }

    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut input = storage.open_input(name)?;
        let mut bytes = vec![0u8; input.size()? as usize];
        input.read_at(0, &mut bytes)?;

        let mut reader = StructReader::verified(&bytes, name)?;
        if reader.read_raw(CLASS_INFO_MAGIC.len())? != CLASS_INFO_MAGIC {
            return Err(DeluneError::codec(format!("{name}: not a feature-class file")));
        }
        let version = reader.read_u32()?;
        if version != CLASS_INFO_VERSION {
            return Err(DeluneError::codec(format!(
                "{name}: unsupported feature-class version {version}"
            )));
        }
        bincode::deserialize(reader.read_raw(reader.remaining())?)
            .map_err(|e| DeluneError::codec(format!("{name}: corrupt feature-class payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_term_class_info_totals() {
        let info = TermClassInfo::new(vec![PoolStats::new(10, 15), PoolStats::new(5, 5)]);
        assert_eq!(info.df, 15);
        assert_eq!(TermClassInfo::empty(3).df, 0);
    }

    #[test]
    fn test_save_load_and_match() {
        let storage = MemoryStorage::new();
        let pools = vec!["neg".to_string(), "pos".to_string()];
        let mut cache = FeatureClassInfo::new(Some(1), pools.clone());
        cache.insert(
            "dog".to_string(),
            TermClassInfo::new(vec![PoolStats::new(5, 5), PoolStats::new(10, 15)]),
        );
        cache.save(&storage, "2.cfi").unwrap();

        let loaded = FeatureClassInfo::load(&storage, "2.cfi").unwrap();
        assert_eq!(loaded, cache);
        assert!(loaded.matches(Some(1), &pools));
        assert!(!loaded.matches(Some(3), &pools));
        assert!(!loaded.matches(Some(1), &pools[..1]));
    }

    #[test]
    fn test_truncated_file() {
        let storage = MemoryStorage::new();
        FeatureClassInfo::new(None, Vec::new()).save(&storage, "2.cfi").unwrap();
        let bytes = storage.get_bytes("2.cfi").unwrap();
        storage.put_bytes("2.cfi", bytes[..bytes.len() - 2].to_vec());
        assert!(matches!(
            FeatureClassInfo::load(&storage, "2.cfi"),
            Err(DeluneError::Codec(_))
        ));
    }
}
