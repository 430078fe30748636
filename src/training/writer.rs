//! Turns a [`Corpus`] into a new training segment generation.
//!
//! The writer reads a committed document segment. Per-pool term statistics
//! come from intersecting a term's postings with each label's postings,
//! and term x term co-occurrence from intersecting term postings pairwise.
//! A commit always writes a fresh generation: either every file lands and
//! the generation is registered, or the files are deleted and the number
//! is abandoned.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::{Posting, ReadFlags, TermKey};
use crate::config::{DeluneConfig, SegmentConfig, WriterConfig};
use crate::error::{DeluneError, Result};
use crate::memory::MemHandle;
use crate::segment::{
    Segment, SegmentInfo, SegmentKind, SegmentMode, SegmentReader, SegmentRegistry,
    discard_generation, intersect_count, intersect_saved, segment_file_name,
};
use crate::selector::{FeatureScorer, PoolStats, SelectionConfig, select_top};
use crate::storage::Storage;
use crate::training::class_info::{FeatureClassInfo, TermClassInfo};
use crate::training::corpus::Corpus;

/// Builds training segments from one document segment.
pub struct SegmentWriter {
    storage: Arc<dyn Storage>,
    source: SegmentReader,
    segment_config: SegmentConfig,
    writer_config: WriterConfig,
    class_info: FeatureClassInfo,
    features: Vec<String>,
    selection: Option<SelectionConfig>,
    dirty: bool,
}

impl SegmentWriter {
    /// Open a writer over the document segment `source_generation`.
    ///
    /// The feature-class cache of the newest training segment is reused
    /// when it was computed from the same document segment.
    pub fn open(
        registry: &SegmentRegistry,
        source_generation: u64,
        config: &DeluneConfig,
    ) -> Result<Self> {
        let storage = Arc::clone(registry.storage());
        match registry.get(source_generation) {
            Some(info) if info.kind == SegmentKind::Documents => {}
            Some(_) => {
                return Err(DeluneError::invalid_argument(format!(
                    "generation {source_generation} is not a document segment"
                )));
            }
            None => {
                return Err(DeluneError::not_found(format!(
                    "document segment generation {source_generation}"
                )));
            }
        }
        let source = SegmentReader::open(Arc::clone(&storage), source_generation)?;
        let class_info = Self::load_class_info(storage.as_ref(), registry, source_generation);

        Ok(SegmentWriter {
            storage,
            source,
            segment_config: config.segment.clone(),
            writer_config: config.writer.clone(),
            class_info,
            features: Vec::new(),
            selection: None,
            dirty: false,
        })
    }

    fn load_class_info(
        storage: &dyn Storage,
        registry: &SegmentRegistry,
        source_generation: u64,
    ) -> FeatureClassInfo {
        let fresh = FeatureClassInfo::new(Some(source_generation), Vec::new());
        let Some(latest) = registry.latest(SegmentKind::Training) else {
            return fresh;
        };

        let name = segment_file_name(latest.generation, "cfi");
        if !storage.file_exists(&name) {
            return fresh;
        }
        match FeatureClassInfo::load(storage, &name) {
            Ok(cached) if cached.source_generation() == Some(source_generation) => {
                log::info!("reusing {} cached class entries from {name}", cached.len());
                cached
            }
            Ok(cached) => {
                log::info!(
                    "discarding {name}: computed from generation {:?}, writer reads {source_generation}",
                    cached.source_generation()
                );
                fresh
            }
            Err(e) => {
                log::warn!("ignoring unreadable {name}: {e}");
                fresh
            }
        }
    }

    /// The document segment this writer reads.
    pub fn source_generation(&self) -> u64 {
        self.source.generation()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Make the next commit write a generation.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Number of terms whose class info is cached.
    pub fn cached_terms(&self) -> usize {
        self.class_info.len()
    }

    /// Terms kept by the last feature selection.
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Total document frequency of `term` and its per-pool `(df, tf)`.
    ///
    /// Intersects the term's postings with every pool's label postings and
    /// sums the term's frequency over the shared documents. A term the
    /// source never saw yields zeros.
    pub fn term_class_info(
        &self,
        mem: &mut MemHandle,
        term: &str,
        corpus: &Corpus,
    ) -> Result<TermClassInfo> {
        let key = TermKey::from(term);
        let info = match self.source.get_term_info(mem, &key, self.segment_config.text_field) {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(TermClassInfo::empty(corpus.pool_count())),
            Err(e) => return Err(e),
        };
        self.source.read_posting(mem, &info, None, ReadFlags::empty())?;

        mem.push();
        let pools = self.pool_overlaps(mem, corpus);
        mem.clear_saved();

        pools
            .map(TermClassInfo::new)
            .map_err(|e| e.context(format!("class info of '{term}'")))
    }

    /// Intersect the saved term postings with each pool's label postings.
    fn pool_overlaps(&self, mem: &mut MemHandle, corpus: &Corpus) -> Result<Vec<PoolStats>> {
        let label_field = self.segment_config.label_field;
        let mut pools = Vec::with_capacity(corpus.pool_count());

        for pool in corpus.pools() {
            let key = TermKey::from(pool.name.as_str());
            match self.source.get_term_info(mem, &key, label_field) {
                Ok(label) => {
                    self.source.read_posting(mem, &label, None, ReadFlags::DOCS_ONLY)?;
                    let overlap = intersect_saved(mem).unwrap_or_default();
                    pools.push(PoolStats::new(overlap.df as u64, overlap.tf));
                }
                Err(e) if e.is_not_found() => pools.push(PoolStats::default()),
                Err(e) => return Err(e),
            }
        }
        Ok(pools)
    }

    /// Memoized [`SegmentWriter::term_class_info`].
    pub fn feature_class_info(
        &mut self,
        mem: &mut MemHandle,
        term: &str,
        corpus: &Corpus,
    ) -> Result<TermClassInfo> {
        let pools = corpus.pool_names();
        let source = corpus.source_generation().or(Some(self.source_generation()));
        if !self.class_info.matches(source, &pools) {
            if !self.class_info.is_empty() {
                log::info!(
                    "resetting class cache: {} entries computed for another pool layout",
                    self.class_info.len()
                );
            }
            self.class_info = FeatureClassInfo::new(source, pools);
        }

        if let Some(info) = self.class_info.get(term) {
            return Ok(info.clone());
        }
        let info = self.term_class_info(mem, term, corpus)?;
        self.class_info.insert(term.to_string(), info.clone());
        Ok(info)
    }

    /// Write co-occurrence rows for every pair `i < j` of `terms` that
    /// shares at least one document. Returns the number of pairs written.
    pub fn write_term_term_info(
        &self,
        mem: &mut MemHandle,
        segment: &mut Segment,
        terms: &[String],
    ) -> Result<u64> {
        let interval = self.writer_config.progress_interval.max(1);
        let mut pairs = 0u64;

        for (i, term) in terms.iter().enumerate() {
            let row = if self.read_term_ids(mem, term)? {
                mem.push();
                let row = self.cooccurrence_row(mem, i, terms);
                mem.clear_saved();
                row?
            } else {
                Vec::new()
            };

            if !row.is_empty() {
                pairs += row.len() as u64;
                segment.cooccurrence_writer()?.write_row(i as u32, &row)?;
            }
            if (i + 1) % interval == 0 {
                log::info!(
                    "co-occurrence: {} of {} terms, {pairs} pairs",
                    i + 1,
                    terms.len()
                );
            }
        }

        segment.cooccurrence_writer()?.pad_to(terms.len())?;
        Ok(pairs)
    }

    fn cooccurrence_row(
        &self,
        mem: &mut MemHandle,
        row: usize,
        terms: &[String],
    ) -> Result<Vec<Posting>> {
        let mut entries = Vec::new();
        for (column, other) in terms.iter().enumerate().skip(row + 1) {
            if !self.read_term_ids(mem, other)? {
                continue;
            }
            let df = mem
                .saved_and_current()
                .map(|(saved, current)| intersect_count(saved, current))
                .unwrap_or(0);
            if df > 0 {
                entries.push(Posting::new(column as u32, df));
            }
        }
        Ok(entries)
    }

    /// Load `term`'s document ids into `mem`; false when the source lacks it.
    fn read_term_ids(&self, mem: &mut MemHandle, term: &str) -> Result<bool> {
        let key = TermKey::from(term);
        match self.source.get_term_info(mem, &key, self.segment_config.text_field) {
            Ok(info) => {
                self.source.read_posting(mem, &info, None, ReadFlags::DOCS_ONLY)?;
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Prune, score and select the vocabulary of `corpus`.
    ///
    /// Terms outside `[min_df, max_df]` are dropped before they are scored.
    /// The corpus vocabulary is replaced by the selection and the writer is
    /// marked dirty. Returns the kept terms, best first.
    pub fn select_features(
        &mut self,
        mem: &mut MemHandle,
        corpus: &mut Corpus,
        selection: &SelectionConfig,
    ) -> Result<Vec<String>> {
        selection.validate()?;
        let mut scorer = FeatureScorer::new(
            self.writer_config.scoring,
            corpus.pool_count(),
            corpus.n(),
            corpus.vocabulary_size(),
        )?;
        scorer.add_corpus(&corpus.pool_stats())?;

        let text_field = self.segment_config.text_field;
        let candidates = corpus.terms().to_vec();
        let mut scored = Vec::with_capacity(candidates.len());
        let mut pruned = 0usize;

        for term in candidates {
            let df = match self.source.get_term_info(mem, &TermKey::from(term.as_str()), text_field) {
                Ok(info) => info.df as u64,
                Err(e) if e.is_not_found() => 0,
                Err(e) => return Err(e),
            };
            if !selection.admits(df) {
                pruned += 1;
                continue;
            }
            let class = self.feature_class_info(mem, &term, corpus)?;
            if !selection.admits(class.df) {
                pruned += 1;
                continue;
            }
            let score = scorer.add(&class.pools)?;
            scored.push((term, score));
        }
        scorer.close();

        let kept: Vec<String> = select_top(scored, selection.selection)?
            .into_iter()
            .map(|(term, _)| term)
            .collect();
        log::info!(
            "selected {} of {} terms ({pruned} pruned by df, method {})",
            kept.len(),
            corpus.vocabulary_size(),
            self.writer_config.scoring.method
        );

        corpus.set_terms(kept.clone());
        self.features = corpus.terms().to_vec();
        self.selection = Some(*selection);
        self.dirty = true;
        Ok(kept)
    }

    /// Write `corpus` as a new training generation and register it.
    ///
    /// Returns `None` when the writer is not dirty. On failure every file
    /// of the attempted generation is deleted, the generation number is
    /// abandoned and the writer stays dirty so the commit can be retried.
    pub fn commit(
        &mut self,
        mem: &mut MemHandle,
        corpus: &Corpus,
        registry: &mut SegmentRegistry,
    ) -> Result<Option<u64>> {
        if !self.dirty {
            return Ok(None);
        }
        if corpus.pool_count() == 0 {
            return Err(DeluneError::invalid_argument("cannot commit a corpus without pools"));
        }

        let generation = registry.next_generation()?;
        log::info!(
            "writing training segment generation {generation} (N={}, {} pools, {} terms)",
            corpus.n(),
            corpus.pool_count(),
            corpus.vocabulary_size()
        );

        let result = self
            .write_generation(mem, corpus, generation)
            .and_then(|info| registry.register(info));
        if let Err(e) = result {
            log::warn!("aborting training segment generation {generation}: {e}");
            discard_generation(self.storage.as_ref(), generation);
            return Err(e.context(format!("commit generation {generation}")));
        }

        self.dirty = false;
        Ok(Some(generation))
    }

    fn write_generation(
        &mut self,
        mem: &mut MemHandle,
        corpus: &Corpus,
        generation: u64,
    ) -> Result<SegmentInfo> {
        let with_cooccurrence = self.writer_config.with_cooccurrence;
        let mut segment = Segment::new(Arc::clone(&self.storage), generation, SegmentMode::Write)
            .with_cooccurrence(with_cooccurrence)
            .with_max_bytes(self.segment_config.max_segment_bytes);
        segment.open()?;

        let record = corpus
            .pools()
            .iter()
            .enumerate()
            .map(|(poolno, pool)| {
                Ok(Posting::with_score(
                    poolno as u32,
                    to_u32(pool.tf, "pool tf")?,
                    to_u32(pool.df, "pool df")?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let end = segment.write_corpus_record(&record)?;
        log::debug!("corpus record of generation {generation} ends at {end}");

        let text_field = self.segment_config.text_field;
        let mut written = 0usize;
        for term in corpus.terms() {
            let class = self.feature_class_info(mem, term, corpus)?;
            if class.df == 0 {
                continue;
            }
            let entries = class
                .pools
                .iter()
                .enumerate()
                .filter(|(_, stats)| stats.df > 0)
                .map(|(poolno, stats)| {
                    Ok(Posting::with_score(
                        poolno as u32,
                        to_u32(stats.tf, "term tf")?,
                        to_u32(stats.df, "pool df")?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            let df = to_u32(class.df, "term df")?;
            segment
                .add_pooled_term(&TermKey::from(term.as_str()), text_field, &entries, df)
                .map_err(|e| e.context(format!("term '{term}'")))?;
            written += 1;
        }

        self.class_info
            .save(self.storage.as_ref(), &segment_file_name(generation, "cfi"))?;

        if with_cooccurrence {
            let pairs = self.write_term_term_info(mem, &mut segment, corpus.terms())?;
            log::info!("generation {generation}: {pairs} co-occurring pairs");
        }
        segment.close()?;

        corpus.save(self.storage.as_ref(), &segment_file_name(generation, "cps"))?;

        let mut info = SegmentInfo::new(generation, SegmentKind::Training);
        info.doc_count = corpus.n();
        info.n = corpus.n();
        info.pools = corpus.pool_names();
        info.numpool = corpus.pool_count();
        info.numvoca = corpus.vocabulary_size();
        info.features = self.features.clone();
        info.parameters = self.parameters();
        info.has_cooccurrence = with_cooccurrence;
        info.source_generation = Some(self.source_generation());
        log::debug!("generation {generation}: {written} of {} terms written", corpus.vocabulary_size());
        Ok(info)
    }

    fn parameters(&self) -> BTreeMap<String, serde_json::Value> {
        let scoring = self.writer_config.scoring;
        let mut parameters = BTreeMap::new();
        parameters.insert("method".to_string(), scoring.method.as_str().into());
        parameters.insert("aggregation".to_string(), scoring.aggregation.as_str().into());
        if let Some(selection) = &self.selection {
            parameters.insert("min_df".to_string(), selection.min_df.into());
            parameters.insert("max_df".to_string(), selection.max_df.into());
            if let Ok(value) = serde_json::to_value(selection.selection) {
                parameters.insert("selection".to_string(), value);
            }
        }
        parameters
    }
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DeluneError::segment_too_large(format!("{what} {value} overflows u32")))
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("source_generation", &self.source_generation())
            .field("cached_terms", &self.class_info.len())
            .field("features", &self.features.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}
