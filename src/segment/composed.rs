//! Statistical lookups over a stack of segment generations.
//!
//! A [`ComposedSegmentReader`] owns one reader per generation plus the
//! caches that make repeated classification and training lookups cheap:
//! document frequency per term, IDF for small document frequencies, and the
//! classifier score per term. Statistics always come from the most recent
//! generation.

use std::sync::{Arc, OnceLock};

use crate::codec::{ReadFlags, TermKey};
use crate::error::{DeluneError, Result};
use crate::memory::MemHandle;
use crate::segment::cache::{CacheStats, ValueCache};
use crate::segment::reader::SegmentReader;
use crate::segment::registry::{SegmentInfo, SegmentKind, SegmentRegistry};
use crate::segment::segment::{CORPUS_RECORD, RESERVED_FDNO};
use crate::selector::{FeatureScorer, PoolStats, ScoringConfig};
use crate::storage::Storage;

/// Document frequencies below this have their IDF precomputed.
const IDF_TABLE_SIZE: usize = 128;

/// Cache hit counters of one composed reader.
#[derive(Debug, Clone, Copy)]
pub struct ComposedCacheStats {
    pub df: CacheStats,
    pub score: CacheStats,
}

/// Readers over several generations with per-instance lookup caches.
#[derive(Debug)]
pub struct ComposedSegmentReader {
    readers: Vec<SegmentReader>,
    infos: Vec<SegmentInfo>,
    text_field: u32,
    scoring: ScoringConfig,
    df_cache: ValueCache<String, u32>,
    idf_table: OnceLock<Vec<f64>>,
    score_cache: ValueCache<(String, usize), f64>,
    corpus_stats: OnceLock<Vec<PoolStats>>,
}

impl ComposedSegmentReader {
    /// Open every generation in `infos`, oldest first.
    pub fn open(
        storage: Arc<dyn Storage>,
        infos: &[SegmentInfo],
        text_field: u32,
        scoring: ScoringConfig,
    ) -> Result<Self> {
        if infos.is_empty() {
            return Err(DeluneError::invalid_argument(
                "composed reader needs at least one segment",
            ));
        }
        let mut infos = infos.to_vec();
        infos.sort_by_key(|info| info.generation);

        let readers = infos
            .iter()
            .map(|info| SegmentReader::open(Arc::clone(&storage), info.generation))
            .collect::<Result<Vec<_>>>()?;

        Ok(ComposedSegmentReader {
            readers,
            infos,
            text_field,
            scoring,
            df_cache: ValueCache::new("df"),
            idf_table: OnceLock::new(),
            score_cache: ValueCache::new("feature score"),
            corpus_stats: OnceLock::new(),
        })
    }

    /// Open every registered generation of `kind`.
    pub fn from_registry(
        registry: &SegmentRegistry,
        kind: SegmentKind,
        text_field: u32,
        scoring: ScoringConfig,
    ) -> Result<Self> {
        let infos: Vec<SegmentInfo> = registry.segments_of(kind).into_iter().cloned().collect();
        if infos.is_empty() {
            return Err(DeluneError::not_found(format!("no {kind:?} segments registered")));
        }
        Self::open(Arc::clone(registry.storage()), &infos, text_field, scoring)
    }

    /// The most recent generation's reader.
    pub fn last(&self) -> &SegmentReader {
        &self.readers[self.readers.len() - 1]
    }

    /// The most recent generation's metadata.
    pub fn last_info(&self) -> &SegmentInfo {
        &self.infos[self.infos.len() - 1]
    }

    pub fn readers(&self) -> &[SegmentReader] {
        &self.readers
    }

    /// Corpus size `N` of the most recent generation.
    pub fn corpus_size(&self) -> u64 {
        self.last_info().corpus_size()
    }

    /// Document frequency of `term` in the most recent generation.
    ///
    /// A term the generation never saw has a document frequency of 0.
    pub fn get_df(&self, mem: &mut MemHandle, term: &str) -> Result<u32> {
        if let Some(df) = self.df_cache.get(term) {
            return Ok(df);
        }

        let key = TermKey::from(term);
        let reader = self.last();
        // Training dictionaries store the aggregate df, not the pool count.
        let df = match reader.get_term_info(mem, &key, self.text_field) {
            Ok(info) => info.df,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };

        self.df_cache.insert(term.to_string(), df);
        Ok(df)
    }

    /// `ln(N / df)`. Values for `df < 128` come from a table built on first use.
    pub fn get_idf(&self, df: u32) -> Result<f64> {
        if df == 0 {
            return Err(DeluneError::invalid_argument("IDF of a zero document frequency"));
        }
        let n = self.corpus_size() as f64;
        let table = self.idf_table.get_or_init(|| {
            log::debug!("building IDF table for N={n}");
            (0..IDF_TABLE_SIZE)
                .map(|df| if df == 0 { 0.0 } else { (n / df as f64).ln() })
                .collect()
        });
        Ok(match table.get(df as usize) {
            Some(idf) => *idf,
            None => (n / df as f64).ln(),
        })
    }

    /// Per-pool `(df, tf)` of `term` in the most recent training generation,
    /// or `None` when the term is absent.
    pub fn get_term_pools(&self, mem: &mut MemHandle, term: &str) -> Result<Option<Vec<PoolStats>>> {
        let info = self.training_info()?;
        let reader = self.last();
        let term_info = match reader.get_term_info(mem, &TermKey::from(term), self.text_field) {
            Ok(term_info) => term_info,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut pools = vec![PoolStats::default(); info.numpool];
        for posting in reader.read_posting(mem, &term_info, None, ReadFlags::empty())? {
            let slot = pools.get_mut(posting.id as usize).ok_or_else(|| {
                DeluneError::codec(format!(
                    "term '{term}' names pool {} of {} in generation {}",
                    posting.id, info.numpool, info.generation
                ))
            })?;
            *slot = PoolStats::new(posting.score.unwrap_or_default() as u64, posting.tf as u64);
        }
        let pooled: u64 = pools.iter().map(|stats| stats.df).sum();
        if pooled > term_info.df as u64 {
            return Err(DeluneError::codec(format!(
                "term '{term}' pools {pooled} documents above its df {} in generation {}",
                term_info.df, info.generation
            )));
        }
        Ok(Some(pools))
    }

    /// Rank `terms` for classification.
    ///
    /// With `top_k == 0` every `(term, tf)` whose document frequency is
    /// non-zero is returned in input order. Otherwise the terms are scored
    /// against the pools, sorted by descending score (ties keep input order)
    /// and the best `top_k` returned. Unknown terms are skipped.
    pub fn get_features<T: AsRef<str>>(
        &self,
        mem: &mut MemHandle,
        terms: &[(T, u32)],
        vocab_size: usize,
        top_k: usize,
    ) -> Result<Vec<(String, u32)>> {
        if top_k == 0 {
            let mut features = Vec::with_capacity(terms.len());
            for (term, tf) in terms {
                if self.get_df(mem, term.as_ref())? > 0 {
                    features.push((term.as_ref().to_string(), *tf));
                }
            }
            return Ok(features);
        }

        let info = self.training_info()?;
        let corpus = self.corpus_stats(mem)?.to_vec();
        let mut scorer = FeatureScorer::new(self.scoring, info.numpool, info.n, vocab_size)?;
        scorer.add_corpus(&corpus)?;

        let mut scored: Vec<(String, u32, f64)> = Vec::with_capacity(terms.len());
        for (term, tf) in terms {
            let term = term.as_ref();
            let key = (term.to_string(), vocab_size);
            let score = match self.score_cache.get(&key) {
                Some(score) => score,
                None => {
                    let Some(pools) = self.get_term_pools(mem, term)? else {
                        continue;
                    };
                    let score = scorer.add(&pools)?;
                    self.score_cache.insert(key, score);
                    score
                }
            };
            scored.push((term.to_string(), *tf, score));
        }
        scorer.close();

        scored.sort_by(|a, b| b.2.total_cmp(&a.2));
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(term, tf, _)| (term, tf)).collect())
    }

    /// Co-occurrence document frequency of two vocabulary indexes in the
    /// most recent generation.
    pub fn get_co_occurrence(&self, mem: &mut MemHandle, a: u32, b: u32) -> Result<u32> {
        self.last().get_co_occurrence(mem, a, b)
    }

    /// Drop every cached value.
    pub fn clear_caches(&mut self) {
        self.df_cache.clear();
        self.score_cache.clear();
        self.idf_table = OnceLock::new();
        self.corpus_stats = OnceLock::new();
    }

    pub fn cache_stats(&self) -> ComposedCacheStats {
        ComposedCacheStats {
            df: self.df_cache.stats(),
            score: self.score_cache.stats(),
        }
    }

    /// Release every generation's files.
    pub fn close(self) -> Result<()> {
        for reader in self.readers {
            reader.close()?;
        }
        Ok(())
    }

    fn training_info(&self) -> Result<&SegmentInfo> {
        let info = self.last_info();
        if info.kind != SegmentKind::Training {
            return Err(DeluneError::invalid_argument(format!(
                "generation {} holds no pool statistics",
                info.generation
            )));
        }
        Ok(info)
    }

    fn corpus_stats(&self, mem: &mut MemHandle) -> Result<&[PoolStats]> {
        if let Some(stats) = self.corpus_stats.get() {
            return Ok(stats.as_slice());
        }

        let info = self.training_info()?;
        let mut pools = vec![PoolStats::default(); info.numpool];
        let record = self
            .last()
            .read_term(mem, &CORPUS_RECORD, RESERVED_FDNO, ReadFlags::empty())?;
        for posting in record {
            if let Some(slot) = pools.get_mut(posting.id as usize) {
                *slot = PoolStats::new(posting.score.unwrap_or_default() as u64, posting.tf as u64);
            }
        }
        // A racing thread may have stored the same record first.
        Ok(self.corpus_stats.get_or_init(|| pools).as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Posting;
    use crate::config::MemoryPoolConfig;
    use crate::memory::MemoryPool;
    use crate::segment::segment::{Segment, SegmentMode};
    use crate::storage::MemoryStorage;

    /// A two-pool training generation over 1000 documents. "alpha" and
    /// "beta" share their pool statistics; "gamma" only occurs in pool 1.
    fn training_reader() -> ComposedSegmentReader {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut segment = Segment::new(Arc::clone(&storage), 1, SegmentMode::Write);
        segment.open().unwrap();
        let corpus = [Posting::with_score(0, 4000, 400), Posting::with_score(1, 6000, 600)];
        segment.write_corpus_record(&corpus).unwrap();
        for term in ["beta", "alpha"] {
            let pools = [Posting::with_score(0, 90, 30), Posting::with_score(1, 12, 6)];
            segment.add_pooled_term(&term.into(), 0, &pools, 36).unwrap();
        }
        segment
            .add_pooled_term(&"gamma".into(), 0, &[Posting::with_score(1, 3, 2)], 2)
            .unwrap();
        segment.close().unwrap();

        let mut info = SegmentInfo::new(1, SegmentKind::Training);
        info.pools = vec!["pos".to_string(), "neg".to_string()];
        info.numpool = 2;
        info.n = 1000;
        ComposedSegmentReader::open(storage, &[info], 0, ScoringConfig::default()).unwrap()
    }

    fn handle() -> MemHandle {
        MemoryPool::new(MemoryPoolConfig::default())
            .unwrap()
            .acquire(0)
            .unwrap()
    }

    #[test]
    fn test_idf_table_boundary() {
        let reader = training_reader();
        assert!(reader.idf_table.get().is_none());

        let below = reader.get_idf(IDF_TABLE_SIZE as u32 - 1).unwrap();
        let table = reader.idf_table.get().unwrap();
        assert_eq!(table.len(), IDF_TABLE_SIZE);
        assert_eq!(below, table[IDF_TABLE_SIZE - 1]);
        assert!((below - (1000.0f64 / 127.0).ln()).abs() < 1e-12);

        let above = reader.get_idf(IDF_TABLE_SIZE as u32).unwrap();
        assert!((above - (1000.0f64 / 128.0).ln()).abs() < 1e-12);
        assert!(above < below);
        assert_eq!(reader.get_idf(1000).unwrap(), 0.0);
    }

    #[test]
    fn test_training_df_comes_from_dictionary() {
        let reader = training_reader();
        let mut mem = handle();

        assert_eq!(reader.get_df(&mut mem, "alpha").unwrap(), 36);
        assert_eq!(reader.get_df(&mut mem, "gamma").unwrap(), 2);
        assert_eq!(reader.get_df(&mut mem, "delta").unwrap(), 0);
        assert_eq!(
            reader.get_term_pools(&mut mem, "gamma").unwrap(),
            Some(vec![PoolStats::default(), PoolStats::new(2, 3)])
        );
    }

    #[test]
    fn test_tied_scores_keep_input_order() {
        let reader = training_reader();
        let mut mem = handle();

        let forward = reader
            .get_features(&mut mem, &[("alpha", 1), ("beta", 2)], 3, 2)
            .unwrap();
        assert_eq!(forward, vec![("alpha".to_string(), 1), ("beta".to_string(), 2)]);

        let backward = reader
            .get_features(&mut mem, &[("beta", 2), ("alpha", 1)], 3, 2)
            .unwrap();
        assert_eq!(backward, vec![("beta".to_string(), 2), ("alpha".to_string(), 1)]);

        let best = reader
            .get_features(&mut mem, &[("beta", 2), ("alpha", 1)], 3, 1)
            .unwrap();
        assert_eq!(best, vec![("beta".to_string(), 2)]);
    }

    #[test]
    fn test_corpus_stats_loaded_once() {
        let reader = training_reader();
        let mut mem = handle();

        let first = reader.corpus_stats(&mut mem).unwrap().to_vec();
        assert_eq!(first, vec![PoolStats::new(400, 4000), PoolStats::new(600, 6000)]);
        let again = reader.corpus_stats(&mut mem).unwrap();
        assert_eq!(again, first.as_slice());
        assert!(std::ptr::eq(again, reader.corpus_stats.get().unwrap().as_slice()));
    }
}
