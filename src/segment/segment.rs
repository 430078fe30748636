//! One generation of on-disk segment files.
//!
//! A [`Segment`] moves through `Closed -> Open(mode) -> Closed`. In read
//! mode every file is opened read-only; the co-occurrence pair (`cof`,
//! `coi`) is optional and its absence only disables co-occurrence lookups.
//! In write mode the files are created fresh, and [`Segment::close`] commits
//! the dictionary, then the postings, then the co-occurrence store, fsyncing
//! each before any handle is released.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::{
    DictionaryReader, DictionaryWriter, Posting, PostingWriter, TermInfo, TermKey, WriteMode,
};
use crate::error::{DeluneError, Result};
use crate::segment::cooccurrence::{CoOccurrenceReader, CoOccurrenceWriter};
use crate::segment::registry::segment_file_name;
use crate::storage::{Storage, StorageInput};

/// Field number reserved for engine records.
pub const RESERVED_FDNO: u32 = u32::MAX;

/// Key of the corpus-level pool record in training segments.
pub const CORPUS_RECORD: TermKey = TermKey::Id(0);

/// Key of the per-document length record in document segments.
pub const DOC_LENGTH_RECORD: TermKey = TermKey::Id(1);

/// How a segment's files are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMode {
    Read,
    Write,
}

pub(crate) struct ReadFiles {
    pub(crate) dictionary: DictionaryReader,
    pub(crate) postings: Mutex<Box<dyn StorageInput>>,
    pub(crate) cooccurrence: Option<CoOccurrenceReader>,
}

struct WriteFiles {
    dictionary: DictionaryWriter,
    postings: PostingWriter,
    cooccurrence: Option<CoOccurrenceWriter>,
}

enum SegmentState {
    Closed,
    Reading(ReadFiles),
    Writing(WriteFiles),
}

/// The file set of one generation.
pub struct Segment {
    storage: Arc<dyn Storage>,
    generation: u64,
    mode: SegmentMode,
    with_cooccurrence: bool,
    max_bytes: u64,
    state: SegmentState,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            SegmentState::Closed => "closed",
            SegmentState::Reading(_) => "reading",
            SegmentState::Writing(_) => "writing",
        };
        f.debug_struct("Segment")
            .field("generation", &self.generation)
            .field("mode", &self.mode)
            .field("state", &state)
            .finish()
    }
}

impl Segment {
    /// A closed segment bound to `generation`.
    pub fn new(storage: Arc<dyn Storage>, generation: u64, mode: SegmentMode) -> Self {
        Segment {
            storage,
            generation,
            mode,
            with_cooccurrence: false,
            max_bytes: u64::MAX,
            state: SegmentState::Closed,
        }
    }

    /// Also create the co-occurrence files when opened for writing.
    pub fn with_cooccurrence(mut self, enabled: bool) -> Self {
        self.with_cooccurrence = enabled;
        self
    }

    /// Byte ceiling of each payload file when writing.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn mode(&self) -> SegmentMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, SegmentState::Closed)
    }

    /// Whether this generation carries co-occurrence data.
    pub fn has_cooccurrence(&self) -> bool {
        match &self.state {
            SegmentState::Reading(files) => files.cooccurrence.is_some(),
            SegmentState::Writing(files) => files.cooccurrence.is_some(),
            SegmentState::Closed => false,
        }
    }

    fn file_name(&self, extension: &str) -> String {
        segment_file_name(self.generation, extension)
    }

    /// Open the generation's files according to the segment's mode.
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(DeluneError::already_opened(format!(
                "segment generation {}",
                self.generation
            )));
        }

        self.state = match self.mode {
            SegmentMode::Read => SegmentState::Reading(self.open_read()?),
            SegmentMode::Write => SegmentState::Writing(self.open_write()?),
        };
        log::debug!("opened segment generation {} ({:?})", self.generation, self.mode);
        Ok(())
    }

    fn open_read(&self) -> Result<ReadFiles> {
        let name = self.generation.to_string();
        let storage = &self.storage;
        let open = |extension: &str| {
            storage
                .open_input(&self.file_name(extension))
                .map_err(|e| e.context(format!("open segment generation {}", self.generation)))
        };

        let dictionary = DictionaryReader::open(open("fis")?, open("fii")?, name.clone())?;
        let postings = Mutex::new(open("cfq")?);

        let cooccurrence = if storage.file_exists(&self.file_name("cof"))
            && storage.file_exists(&self.file_name("coi"))
        {
            Some(CoOccurrenceReader::open(open("cof")?, open("coi")?, name)?)
        } else {
            None
        };

        Ok(ReadFiles {
            dictionary,
            postings,
            cooccurrence,
        })
    }

    fn open_write(&self) -> Result<WriteFiles> {
        let name = self.generation.to_string();
        let storage = &self.storage;
        let create = |extension: &str| {
            storage
                .create_output(&self.file_name(extension))
                .map_err(|e| e.context(format!("create segment generation {}", self.generation)))
        };

        let dictionary = DictionaryWriter::new(create("fis")?, create("fii")?, name.clone());
        let postings = PostingWriter::new(create("cfq")?, self.file_name("cfq"), self.max_bytes);
        let cooccurrence = if self.with_cooccurrence {
            Some(CoOccurrenceWriter::new(
                create("cof")?,
                create("coi")?,
                name,
                self.max_bytes,
            ))
        } else {
            None
        };

        Ok(WriteFiles {
            dictionary,
            postings,
            cooccurrence,
        })
    }

    fn writing(&mut self) -> Result<&mut WriteFiles> {
        match &mut self.state {
            SegmentState::Writing(files) => Ok(files),
            _ => Err(DeluneError::not_opened(format!(
                "segment generation {} is not open for writing",
                self.generation
            ))),
        }
    }

    pub(crate) fn reading(&self) -> Result<&ReadFiles> {
        match &self.state {
            SegmentState::Reading(files) => Ok(files),
            _ => Err(DeluneError::not_opened(format!(
                "segment generation {} is not open for reading",
                self.generation
            ))),
        }
    }

    /// Write one per-document posting list and its dictionary entry.
    ///
    /// The term's document frequency is the number of entries.
    pub fn add_term(&mut self, key: &TermKey, fdno: u32, entries: &[Posting]) -> Result<TermInfo> {
        self.write_term(key, fdno, entries, None)
    }

    /// Write one per-pool posting list whose entries aggregate `df`
    /// documents. `df` must cover the per-pool document frequencies held
    /// in the score column.
    pub fn add_pooled_term(
        &mut self,
        key: &TermKey,
        fdno: u32,
        entries: &[Posting],
        df: u32,
    ) -> Result<TermInfo> {
        let pooled: u64 = entries.iter().map(|p| p.score.unwrap_or_default() as u64).sum();
        if pooled > df as u64 {
            return Err(DeluneError::invalid_argument(format!(
                "term {key}: per-pool document frequencies sum to {pooled}, above df {df}"
            )));
        }
        self.write_term(key, fdno, entries, Some(df))
    }

    fn write_term(
        &mut self,
        key: &TermKey,
        fdno: u32,
        entries: &[Posting],
        df: Option<u32>,
    ) -> Result<TermInfo> {
        let generation = self.generation;
        let files = self.writing()?;

        let doc_offset = files.postings.offset();
        let (count, skip) = files
            .postings
            .write(entries, WriteMode::Term)
            .map_err(|e| e.context(format!("term {key} of generation {generation}")))?;
        let info = TermInfo {
            df: df.unwrap_or(count),
            entries: count,
            doc_offset,
            pos_offset: 0,
            skip: skip as u32,
            length: (files.postings.offset() - doc_offset) as u32,
        };

        files.dictionary.add(key, fdno, &info)?;
        Ok(info)
    }

    /// Write the corpus-level pool record under the reserved key.
    ///
    /// Returns the payload end offset after the record.
    pub fn write_corpus_record(&mut self, entries: &[Posting]) -> Result<u64> {
        let files = self.writing()?;
        let written = files.postings.write_list(entries)?;
        let info = TermInfo {
            df: written.df,
            entries: written.df,
            doc_offset: written.offset,
            pos_offset: 0,
            skip: written.skip,
            length: written.length,
        };
        files.dictionary.add(&CORPUS_RECORD, RESERVED_FDNO, &info)?;
        Ok(written.offset + written.length as u64)
    }

    /// The co-occurrence writer of a segment opened for writing with
    /// co-occurrence enabled.
    pub fn cooccurrence_writer(&mut self) -> Result<&mut CoOccurrenceWriter> {
        let generation = self.generation;
        self.writing()?.cooccurrence.as_mut().ok_or_else(|| {
            DeluneError::invalid_argument(format!(
                "segment generation {generation} was opened without co-occurrence"
            ))
        })
    }

    /// Commit (in write mode) and release every file handle.
    pub fn close(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, SegmentState::Closed);
        match state {
            SegmentState::Closed => Err(DeluneError::not_opened(format!(
                "segment generation {} is already closed",
                self.generation
            ))),
            SegmentState::Reading(files) => {
                let mut postings = files.postings.into_inner();
                postings.close()?;
                log::debug!("closed segment generation {}", self.generation);
                Ok(())
            }
            SegmentState::Writing(mut files) => {
                let generation = self.generation;
                let context = |e: DeluneError| e.context(format!("close generation {generation}"));

                files.dictionary.commit().map_err(context)?;
                files.postings.commit().map_err(context)?;
                if let Some(cooccurrence) = files.cooccurrence.as_mut() {
                    cooccurrence.commit().map_err(context)?;
                }

                files.dictionary.close()?;
                files.postings.close()?;
                if let Some(cooccurrence) = files.cooccurrence {
                    cooccurrence.close()?;
                }
                log::debug!("committed segment generation {generation}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn storage() -> (MemoryStorage, Arc<dyn Storage>) {
        let memory = MemoryStorage::new();
        let shared: Arc<dyn Storage> = Arc::new(memory.clone());
        (memory, shared)
    }

    #[test]
    fn test_state_machine() {
        let (_, storage) = storage();
        let mut segment = Segment::new(Arc::clone(&storage), 1, SegmentMode::Write);
        assert!(matches!(segment.close(), Err(DeluneError::NotOpened(_))));

        segment.open().unwrap();
        assert!(matches!(segment.open(), Err(DeluneError::AlreadyOpened(_))));
        segment
            .add_term(&"dog".into(), 0, &[Posting::new(0, 2)])
            .unwrap();
        segment.close().unwrap();
        assert!(matches!(segment.close(), Err(DeluneError::NotOpened(_))));
        assert!(segment.add_term(&"cat".into(), 0, &[]).is_err());
    }

    #[test]
    fn test_pooled_term_keeps_aggregate_df() {
        let (_, storage) = storage();
        let mut segment = Segment::new(storage, 4, SegmentMode::Write);
        segment.open().unwrap();
        let pools = [Posting::with_score(0, 30, 10), Posting::with_score(1, 9, 5)];

        let info = segment.add_pooled_term(&"dog".into(), 0, &pools, 15).unwrap();
        assert_eq!(info.df, 15);
        assert_eq!(info.entries, 2);
        let info = segment.add_term(&"cat".into(), 0, &[Posting::new(3, 1)]).unwrap();
        assert_eq!(info.df, info.entries);

        assert!(matches!(
            segment.add_pooled_term(&"eel".into(), 0, &pools, 14),
            Err(DeluneError::InvalidArgument(_))
        ));
        segment.close().unwrap();
    }

    #[test]
    fn test_cooccurrence_files_are_optional() {
        let (memory, storage) = storage();
        let mut segment = Segment::new(Arc::clone(&storage), 3, SegmentMode::Write);
        segment.open().unwrap();
        assert!(segment.cooccurrence_writer().is_err());
        segment.close().unwrap();
        assert!(!memory.file_exists("3.coi"));

        let mut reader = Segment::new(storage, 3, SegmentMode::Read);
        reader.open().unwrap();
        assert!(!reader.has_cooccurrence());
        reader.close().unwrap();
    }

    #[test]
    fn test_read_mode_rejects_writes() {
        let (_, storage) = storage();
        let mut writer = Segment::new(Arc::clone(&storage), 2, SegmentMode::Write)
            .with_cooccurrence(true);
        writer.open().unwrap();
        assert!(writer.has_cooccurrence());
        writer.cooccurrence_writer().unwrap().pad_to(0).unwrap();
        writer.close().unwrap();

        let mut reader = Segment::new(storage, 2, SegmentMode::Read);
        reader.open().unwrap();
        assert!(reader.has_cooccurrence());
        assert!(matches!(
            reader.add_term(&"dog".into(), 0, &[]),
            Err(DeluneError::NotOpened(_))
        ));
    }

    #[test]
    fn test_missing_generation_is_not_found() {
        let (_, storage) = storage();
        let mut segment = Segment::new(storage, 9, SegmentMode::Read);
        assert!(segment.open().unwrap_err().is_not_found());
        assert!(!segment.is_open());
    }
}
