//! Corpus and pool aggregates built during a training scan.
//!
//! A corpus snapshot (`cps`) is `"DLCP"`, a little-endian `u32` format
//! version, the bincode-encoded [`Corpus`], and a CRC32 footer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::{ReadFlags, TermKey};
use crate::config::SegmentConfig;
use crate::error::{DeluneError, Result};
use crate::memory::MemHandle;
use crate::segment::{DOC_LENGTH_RECORD, RESERVED_FDNO, SegmentReader};
use crate::selector::PoolStats;
use crate::storage::{Storage, StorageInput, StorageOutput, StructReader, StructWriter};

const SNAPSHOT_MAGIC: &[u8; 4] = b"DLCP";
const SNAPSHOT_VERSION: u32 = 1;

/// A named training partition and its accumulated totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    /// Documents in the pool.
    pub df: u64,
    /// Tokens in the pool's documents.
    pub tf: u64,
}

/// Pool and vocabulary statistics of one training scan.
///
/// Pool numbers are positions in [`Corpus::pools`]; vocabulary indexes are
/// positions in the sorted [`Corpus::terms`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    n: u64,
    pools: Vec<Pool>,
    terms: Vec<String>,
    poolno: BTreeMap<String, u32>,
    source_generation: Option<u64>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a corpus from a document segment.
    ///
    /// `N` comes from the document-length record, pools from the label
    /// field (sorted label order assigns pool numbers), and the vocabulary
    /// from the text field, keeping terms whose document frequency exceeds
    /// `min_df`.
    pub fn scan(
        reader: &SegmentReader,
        mem: &mut MemHandle,
        fields: &SegmentConfig,
        min_df: u32,
    ) -> Result<Self> {
        let mut corpus = Corpus {
            source_generation: Some(reader.generation()),
            ..Corpus::default()
        };

        let lengths = reader
            .read_term(mem, &DOC_LENGTH_RECORD, RESERVED_FDNO, ReadFlags::empty())?
            .to_vec();
        corpus.n = lengths.len() as u64;

        for (key, info) in reader.terms(mem, fields.label_field)? {
            let TermKey::Text(label) = key else {
                continue;
            };
            let poolno = corpus.add_pool(&label);
            let docs = reader.read_posting(mem, &info, None, ReadFlags::DOCS_ONLY)?;
            let pool = &mut corpus.pools[poolno as usize];
            for doc in docs {
                let length = lengths
                    .binary_search_by_key(&doc.id, |p| p.id)
                    .map(|i| lengths[i].tf as u64)
                    .map_err(|_| {
                        DeluneError::codec(format!(
                            "label '{label}' names document {} without a length record",
                            doc.id
                        ))
                    })?;
                pool.df += 1;
                pool.tf += length;
            }
        }

        for (key, info) in reader.terms(mem, fields.text_field)? {
            if let TermKey::Text(term) = key
                && info.df > min_df
            {
                corpus.terms.push(term);
            }
        }

        log::info!(
            "scanned generation {}: N={}, {} pools, {} terms (min_df {min_df})",
            reader.generation(),
            corpus.n,
            corpus.pools.len(),
            corpus.terms.len()
        );
        Ok(corpus)
    }

    /// Total documents.
    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Pool names in pool-number order.
    pub fn pool_names(&self) -> Vec<String> {
        self.pools.iter().map(|p| p.name.clone()).collect()
    }

    /// Pool totals in pool-number order.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools
            .iter()
            .map(|p| PoolStats::new(p.df, p.tf))
            .collect()
    }

    /// Sorted vocabulary.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn vocabulary_size(&self) -> usize {
        self.terms.len()
    }

    /// Document segment the corpus was scanned from.
    pub fn source_generation(&self) -> Option<u64> {
        self.source_generation
    }

    /// Pool number of `name`.
    pub fn poolno(&self, name: &str) -> Option<u32> {
        self.poolno.get(name).copied()
    }

    /// Vocabulary index of `term`.
    pub fn term_index(&self, term: &str) -> Option<u32> {
        self.terms
            .binary_search_by(|t| t.as_str().cmp(term))
            .ok()
            .map(|i| i as u32)
    }

    /// Register a pool, returning its number. Existing pools keep theirs.
    pub fn add_pool(&mut self, name: &str) -> u32 {
        if let Some(poolno) = self.poolno(name) {
            return poolno;
        }
        let poolno = self.pools.len() as u32;
        self.pools.push(Pool {
            name: name.to_string(),
            df: 0,
            tf: 0,
        });
        self.poolno.insert(name.to_string(), poolno);
        poolno
    }

    /// Count one document of `length` tokens belonging to `pools`.
    pub fn add_document(&mut self, pools: &[u32], length: u64) -> Result<()> {
        if let Some(&bad) = pools.iter().find(|&&p| p as usize >= self.pools.len()) {
            return Err(DeluneError::invalid_argument(format!(
                "pool {bad} out of range ({} pools)",
                self.pools.len()
            )));
        }
        self.n += 1;
        for &poolno in pools {
            let pool = &mut self.pools[poolno as usize];
            pool.df += 1;
            pool.tf += length;
        }
        Ok(())
    }

    /// Add a vocabulary term, keeping the vocabulary sorted.
    pub fn add_term(&mut self, term: &str) {
        if let Err(position) = self.terms.binary_search_by(|t| t.as_str().cmp(term)) {
            self.terms.insert(position, term.to_string());
        }
    }

    /// Replace the vocabulary. Indexes are reassigned in sorted order.
    pub fn set_terms(&mut self, mut terms: Vec<String>) {
        terms.sort();
        terms.dedup();
        self.terms = terms;
    }

    /// Write a snapshot to `name`.
    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let payload = bincode::serialize(self)?;

        let output = storage.create_output(name)?;
        let mut writer = StructWriter::new(output);
        writer.write_raw(SNAPSHOT_MAGIC)?;
        writer.write_u32(SNAPSHOT_VERSION)?;
        writer.write_raw(&payload)?;
        let mut output = writer.finish()?;
        output.flush_and_sync()?;
        output.close()
    }

    /// Load a snapshot written by [`Corpus::save`].
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut input = storage.open_input(name)?;
        let mut bytes = vec![0u8; input.size()? as usize];
        input.read_at(0, &mut bytes)?;

        let mut reader = StructReader::verified(&bytes, name)?;
        if reader.read_raw(SNAPSHOT_MAGIC.len())? != SNAPSHOT_MAGIC {
            return Err(DeluneError::codec(format!("{name}: not a corpus snapshot")));
        }
        let version = reader.read_u32()?;
        if version != SNAPSHOT_VERSION {
            return Err(DeluneError::codec(format!(
                "{name}: unsupported corpus snapshot version {version}"
            )));
        }
        let payload = reader.read_raw(reader.remaining())?;
        bincode::deserialize(payload)
            .map_err(|e| DeluneError::codec(format!("{name}: corrupt corpus payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn sample() -> Corpus {
        let mut corpus = Corpus::new();
        let pos = corpus.add_pool("pos");
        let neg = corpus.add_pool("neg");
        assert_eq!(corpus.add_pool("pos"), pos);

        corpus.add_document(&[pos], 10).unwrap();
        corpus.add_document(&[neg], 4).unwrap();
        corpus.add_document(&[pos, neg], 6).unwrap();
        for term in ["dog", "cat", "bird", "cat"] {
            corpus.add_term(term);
        }
        corpus
    }

    #[test]
    fn test_incremental_counts() {
        let corpus = sample();
        assert_eq!(corpus.n(), 3);
        assert_eq!(corpus.pool_stats(), vec![PoolStats::new(2, 16), PoolStats::new(2, 10)]);
        assert_eq!(corpus.terms(), &["bird", "cat", "dog"]);
        assert_eq!(corpus.term_index("dog"), Some(2));
        assert_eq!(corpus.term_index("emu"), None);
        assert_eq!(corpus.poolno("neg"), Some(1));
        assert!(corpus.clone().add_document(&[7], 1).is_err());
    }

    #[test]
    fn test_set_terms_reindexes() {
        let mut corpus = sample();
        corpus.set_terms(vec!["dog".to_string(), "ant".to_string(), "dog".to_string()]);
        assert_eq!(corpus.terms(), &["ant", "dog"]);
        assert_eq!(corpus.term_index("dog"), Some(1));
    }

    #[test]
    fn test_snapshot_round_trip_and_versioning() {
        let storage = MemoryStorage::new();
        let corpus = sample();
        corpus.save(&storage, "7.cps").unwrap();
        assert_eq!(Corpus::load(&storage, "7.cps").unwrap(), corpus);

        // Bump the version field and re-checksum: still rejected.
        let bytes = storage.get_bytes("7.cps").unwrap();
        let mut payload = bytes[..bytes.len() - 4].to_vec();
        payload[4..8].copy_from_slice(&2u32.to_le_bytes());
        let crc = crc32fast::hash(&payload);
        payload.extend_from_slice(&crc.to_le_bytes());
        storage.put_bytes("7.cps", payload);

        let err = Corpus::load(&storage, "7.cps").unwrap_err();
        assert!(matches!(err, DeluneError::Codec(_)));
        assert!(err.to_string().contains("version 2"));
    }
}
