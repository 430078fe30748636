//! Read-only view over one committed segment generation.

use std::ops::Range;
use std::sync::Arc;

use crate::codec::{Posting, PostingCodec, ReadFlags, TermInfo, TermKey};
use crate::error::{DeluneError, Result};
use crate::memory::MemHandle;
use crate::segment::segment::{Segment, SegmentMode};
use crate::storage::{Storage, StorageInput};

/// A reader bound to exactly one generation for its lifetime.
#[derive(Debug)]
pub struct SegmentReader {
    segment: Segment,
}

impl SegmentReader {
    /// Open generation `generation` read-only.
    pub fn open(storage: Arc<dyn Storage>, generation: u64) -> Result<Self> {
        let mut segment = Segment::new(storage, generation, SegmentMode::Read);
        segment.open()?;
        Ok(SegmentReader { segment })
    }

    pub fn generation(&self) -> u64 {
        self.segment.generation()
    }

    /// Whether this generation carries co-occurrence data.
    pub fn has_cooccurrence(&self) -> bool {
        self.segment.has_cooccurrence()
    }

    /// Dictionary entry of `key` in field `fdno`.
    pub fn get_term_info(&self, mem: &mut MemHandle, key: &TermKey, fdno: u32) -> Result<TermInfo> {
        self.segment
            .reading()?
            .dictionary
            .get(mem, key, fdno)
            .map_err(|e| e.context(format!("generation {}", self.generation())))
    }

    /// Every dictionary entry of field `fdno`, in key order.
    pub fn terms(&self, mem: &mut MemHandle, fdno: u32) -> Result<Vec<(TermKey, TermInfo)>> {
        self.segment.reading()?.dictionary.entries(mem, fdno)
    }

    /// Decode the posting list described by `info` into `mem`.
    ///
    /// `limit` keeps only entries whose index falls in the range.
    /// [`ReadFlags::DOCS_ONLY`] reads just the id section. The returned
    /// slice lives in `mem` and is replaced by the next read on it.
    pub fn read_posting<'m>(
        &self,
        mem: &'m mut MemHandle,
        info: &TermInfo,
        limit: Option<Range<usize>>,
        flags: ReadFlags,
    ) -> Result<&'m [Posting]> {
        let files = self.segment.reading()?;
        let generation = self.generation();

        let len = if info.entries == 0 {
            0
        } else if flags.contains(ReadFlags::DOCS_ONLY) {
            info.skip
        } else {
            info.length
        };
        let buffer = mem.read_buffer(len as usize);
        if len > 0 {
            files
                .postings
                .lock()
                .read_at(info.doc_offset, buffer)
                .map_err(|e| {
                    e.context(format!(
                        "posting at offset {} of generation {generation}",
                        info.doc_offset
                    ))
                })?;
        }

        let (data, out) = mem.decode_parts();
        PostingCodec::decode(data, info.entries, info.skip, limit, flags, out).map_err(|e| {
            e.context(format!(
                "posting at offset {} of generation {generation}",
                info.doc_offset
            ))
        })?;
        Ok(mem.postings())
    }

    /// Look up `key` and decode its posting list.
    pub fn read_term<'m>(
        &self,
        mem: &'m mut MemHandle,
        key: &TermKey,
        fdno: u32,
        flags: ReadFlags,
    ) -> Result<&'m [Posting]> {
        let info = self.get_term_info(mem, key, fdno)?;
        self.read_posting(mem, &info, None, flags)
    }

    /// Number of documents both vocabulary terms `a` and `b` occur in.
    ///
    /// The pair is unordered; `a == b` is rejected. A pair never written is
    /// 0, a term index outside the vocabulary is `NotFound`.
    pub fn get_co_occurrence(&self, mem: &mut MemHandle, a: u32, b: u32) -> Result<u32> {
        let files = self.segment.reading()?;
        let store = files.cooccurrence.as_ref().ok_or_else(|| {
            DeluneError::not_found(format!(
                "co-occurrence data in generation {}",
                self.generation()
            ))
        })?;
        store.get(mem, a, b)
    }

    /// Release the generation's files.
    pub fn close(mut self) -> Result<()> {
        self.segment.close()
    }
}
