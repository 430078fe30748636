//! Builds document segments from analyzed documents.
//!
//! A document segment is the upstream of training: the text field maps each
//! term to `(doc, tf)` postings, the label field maps each label to
//! `(doc, 1)` postings, and the reserved document-length record lists
//! `(doc, length)` for every document. Documents must arrive in strictly
//! increasing id order so every list is id-sorted.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::{Posting, TermKey};
use crate::config::SegmentConfig;
use crate::error::{DeluneError, Result};
use crate::segment::registry::{SegmentInfo, SegmentKind, SegmentRegistry, discard_generation};
use crate::segment::segment::{DOC_LENGTH_RECORD, RESERVED_FDNO, Segment, SegmentMode};
use crate::storage::Storage;

/// Accumulates documents in memory and flushes them as one generation.
#[derive(Debug)]
pub struct SegmentBuilder {
    storage: Arc<dyn Storage>,
    config: SegmentConfig,
    text: BTreeMap<String, Vec<Posting>>,
    labels: BTreeMap<String, Vec<Posting>>,
    lengths: Vec<Posting>,
}

impl SegmentBuilder {
    pub fn new(storage: Arc<dyn Storage>, config: SegmentConfig) -> Self {
        SegmentBuilder {
            storage,
            config,
            text: BTreeMap::new(),
            labels: BTreeMap::new(),
            lengths: Vec::new(),
        }
    }

    /// Add one analyzed document.
    ///
    /// Repeated terms are summed, repeated labels counted once. Terms with a
    /// zero frequency are ignored.
    pub fn add_document<T, L>(&mut self, doc: u32, terms: &[(T, u32)], labels: &[L]) -> Result<()>
    where
        T: AsRef<str>,
        L: AsRef<str>,
    {
        if let Some(last) = self.lengths.last()
            && doc <= last.id
        {
            return Err(DeluneError::invalid_argument(format!(
                "document {doc} added after document {}",
                last.id
            )));
        }

        let mut length = 0u32;
        for (term, tf) in terms {
            if *tf == 0 {
                continue;
            }
            length = length.checked_add(*tf).ok_or_else(|| {
                DeluneError::invalid_argument(format!("document {doc} length overflows u32"))
            })?;
            let postings = self.text.entry(term.as_ref().to_string()).or_default();
            match postings.last_mut() {
                Some(last) if last.id == doc => last.tf = last.tf.saturating_add(*tf),
                _ => postings.push(Posting::new(doc, *tf)),
            }
        }

        for label in labels {
            let postings = self.labels.entry(label.as_ref().to_string()).or_default();
            if postings.last().is_none_or(|last| last.id != doc) {
                postings.push(Posting::new(doc, 1));
            }
        }

        self.lengths.push(Posting::new(doc, length));
        Ok(())
    }

    /// Number of buffered documents.
    pub fn doc_count(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Flush the buffered documents as a new generation and register it.
    ///
    /// Returns `None` when nothing was buffered. On failure the generation's
    /// files are removed and the buffered documents are kept for a retry.
    pub fn commit(&mut self, registry: &mut SegmentRegistry) -> Result<Option<u64>> {
        if self.is_empty() {
            return Ok(None);
        }

        let generation = registry.next_generation()?;
        log::info!(
            "writing document segment generation {generation} ({} documents, {} terms)",
            self.doc_count(),
            self.text.len()
        );

        let result = self
            .write_generation(generation)
            .and_then(|info| registry.register(info));
        if let Err(e) = result {
            log::warn!("aborting document segment generation {generation}: {e}");
            discard_generation(self.storage.as_ref(), generation);
            return Err(e.context(format!("commit generation {generation}")));
        }

        self.text.clear();
        self.labels.clear();
        self.lengths.clear();
        Ok(Some(generation))
    }

    fn write_generation(&self, generation: u64) -> Result<SegmentInfo> {
        let mut segment = Segment::new(Arc::clone(&self.storage), generation, SegmentMode::Write)
            .with_max_bytes(self.config.max_segment_bytes);
        segment.open()?;

        segment.add_term(&DOC_LENGTH_RECORD, RESERVED_FDNO, &self.lengths)?;
        for (term, postings) in &self.text {
            segment.add_term(&TermKey::Text(term.clone()), self.config.text_field, postings)?;
        }
        for (label, postings) in &self.labels {
            segment.add_term(&TermKey::Text(label.clone()), self.config.label_field, postings)?;
        }
        segment.close()?;

        let mut info = SegmentInfo::new(generation, SegmentKind::Documents);
        info.doc_count = self.lengths.len() as u64;
        info.n = info.doc_count;
        info.pools = self.labels.keys().cloned().collect();
        info.numpool = info.pools.len();
        info.numvoca = self.text.len();
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ReadFlags;
    use crate::config::MemoryPoolConfig;
    use crate::memory::MemoryPool;
    use crate::segment::SegmentReader;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_build_and_read_back() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut registry = SegmentRegistry::load(Arc::clone(&storage)).unwrap();
        let mut builder = SegmentBuilder::new(Arc::clone(&storage), SegmentConfig::default());

        builder.add_document(0, &[("dog", 2), ("cat", 1), ("dog", 1)], &["pos"]).unwrap();
        builder.add_document(3, &[("cat", 4)], &["neg", "neg"]).unwrap();
        builder.add_document(5, &[("bird", 0)], &["pos"]).unwrap();
        assert!(builder.add_document(5, &[("dog", 1)], &["pos"]).is_err());

        let generation = builder.commit(&mut registry).unwrap().unwrap();
        assert!(builder.is_empty());
        assert_eq!(builder.commit(&mut registry).unwrap(), None);

        let info = registry.get(generation).unwrap();
        assert_eq!(info.kind, SegmentKind::Documents);
        assert_eq!(info.doc_count, 3);
        assert_eq!(info.pools, vec!["neg".to_string(), "pos".to_string()]);
        assert_eq!(info.numvoca, 2);

        let reader = SegmentReader::open(storage, generation).unwrap();
        let mut mem = MemoryPool::new(MemoryPoolConfig::default())
            .unwrap()
            .acquire(0)
            .unwrap();
        let dog = reader
            .read_term(&mut mem, &"dog".into(), 0, ReadFlags::empty())
            .unwrap();
        assert_eq!(dog, &[Posting::new(0, 3)]);
        let neg = reader
            .read_term(&mut mem, &"neg".into(), 1, ReadFlags::empty())
            .unwrap();
        assert_eq!(neg, &[Posting::new(3, 1)]);
        let lengths = reader
            .read_term(&mut mem, &DOC_LENGTH_RECORD, RESERVED_FDNO, ReadFlags::empty())
            .unwrap();
        assert_eq!(
            lengths,
            &[Posting::new(0, 4), Posting::new(3, 4), Posting::new(5, 0)]
        );
    }

    #[test]
    fn test_failed_commit_keeps_documents() {
        let memory = MemoryStorage::new();
        let storage: Arc<dyn Storage> = Arc::new(memory.clone());
        let mut registry = SegmentRegistry::load(Arc::clone(&storage)).unwrap();
        let mut builder = SegmentBuilder::new(Arc::clone(&storage), SegmentConfig::default());
        builder.add_document(1, &[("dog", 1)], &["pos"]).unwrap();

        memory.fail_outputs_ending_with(".cfq");
        assert!(builder.commit(&mut registry).is_err());
        assert_eq!(builder.doc_count(), 1);
        assert!(!memory.file_exists("1.fis"));
        assert!(registry.segments().is_empty());

        memory.clear_failures();
        assert_eq!(builder.commit(&mut registry).unwrap(), Some(2));
    }
}
