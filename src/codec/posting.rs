//! Posting payload codec.
//!
//! A posting list is stored as one contiguous record in the `cfq` (or `cof`)
//! file:
//!
//! ```text
//! flags: u8                 HAS_SCORE | DELTA_IDS
//! ids:   varint * df        plain, or gaps when ids never decrease
//! tfs:   varint * df
//! score: varint * df        only with HAS_SCORE
//! ```
//!
//! The dictionary record's `skip` is the byte length of `flags + ids`, so a
//! docs-only read never touches the frequency sections. Entries come back in
//! exactly the order they were written.

use std::io::Write;
use std::ops::Range;

use bitflags::bitflags;

use crate::error::{DeluneError, Result};
use crate::storage::{StorageOutput, StructReader};
use crate::util::varint::encode_u64_into;

/// One entry of a posting list.
///
/// `id` is a document id in document segments and a pool number in
/// training segments. `score` is the optional third column (pool df in
/// training segments, pair df in co-occurrence rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Posting {
    pub id: u32,
    pub tf: u32,
    pub score: Option<u32>,
}

impl Posting {
    /// Create a posting without a score column.
    pub fn new(id: u32, tf: u32) -> Self {
        Posting { id, tf, score: None }
    }

    /// Create a posting with a score column.
    pub fn with_score(id: u32, tf: u32, score: u32) -> Self {
        Posting {
            id,
            tf,
            score: Some(score),
        }
    }
}

bitflags! {
    /// Layout flags stored in the first byte of every posting record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ListFlags: u8 {
        const HAS_SCORE = 0b0000_0001;
        const DELTA_IDS = 0b0000_0010;
    }
}

bitflags! {
    /// Decode options for [`PostingCodec::decode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReadFlags: u8 {
        /// Decode ids only; `tf` is reported as 0 and `score` as `None`.
        const DOCS_ONLY = 0b0000_0001;
    }
}

/// What [`PostingWriter::write`] reports back for a written list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// A term list: the writer returns the skip distance.
    Term,
    /// The initial corpus-level record: the writer returns the end offset.
    Corpus,
}

/// Where a list landed in the payload file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenList {
    pub df: u32,
    pub offset: u64,
    pub skip: u32,
    pub length: u32,
}

/// Encoding and decoding of single posting records.
pub struct PostingCodec;

impl PostingCodec {
    /// Encode `entries` into `out`, returning `(skip, length)`.
    ///
    /// Either every entry carries a score or none does.
    pub fn encode(entries: &[Posting], out: &mut Vec<u8>) -> Result<(u32, u32)> {
        let start = out.len();
        let has_score = entries.first().is_some_and(|p| p.score.is_some());
        if entries.iter().any(|p| p.score.is_some() != has_score) {
            return Err(DeluneError::invalid_argument(
                "posting list mixes scored and unscored entries",
            ));
        }
        let ascending = entries.windows(2).all(|w| w[0].id <= w[1].id);

        let mut flags = ListFlags::empty();
        if has_score {
            flags |= ListFlags::HAS_SCORE;
        }
        if ascending {
            flags |= ListFlags::DELTA_IDS;
        }
        out.push(flags.bits());

        let mut previous = 0u32;
        for posting in entries {
            let value = if ascending { posting.id - previous } else { posting.id };
            encode_u64_into(value as u64, out);
            previous = posting.id;
        }
        let skip = out.len() - start;

        for posting in entries {
            encode_u64_into(posting.tf as u64, out);
        }
        if has_score {
            for posting in entries {
                encode_u64_into(posting.score.unwrap_or_default() as u64, out);
            }
        }

        let length = out.len() - start;
        let to_u32 = |n: usize| {
            u32::try_from(n).map_err(|_| {
                DeluneError::segment_too_large(format!("posting record of {n} bytes"))
            })
        };
        Ok((to_u32(skip)?, to_u32(length)?))
    }

    /// Decode a record of `df` entries into `out` (cleared first).
    ///
    /// `data` holds the whole record, or only its first `skip` bytes when
    /// `flags` contains `DOCS_ONLY`. `range` limits which entry indexes are
    /// kept; entries outside it are still parsed but dropped.
    pub fn decode(
        data: &[u8],
        df: u32,
        skip: u32,
        range: Option<Range<usize>>,
        flags: ReadFlags,
        out: &mut Vec<Posting>,
    ) -> Result<()> {
        out.clear();
        if df == 0 {
            return Ok(());
        }

        let df = df as usize;
        let range = range.unwrap_or(0..df);
        let keep = range.start.min(df)..range.end.min(df);

        let mut reader = StructReader::new(data);
        let list_flags = ListFlags::from_bits(reader.read_u8()?)
            .ok_or_else(|| DeluneError::codec("unknown posting flags"))?;

        let mut id = 0u32;
        for i in 0..df {
            let value = reader.read_varint_u32()?;
            id = if list_flags.contains(ListFlags::DELTA_IDS) {
                id.checked_add(value)
                    .ok_or_else(|| DeluneError::codec("posting id overflows u32"))?
            } else {
                value
            };
            if keep.contains(&i) {
                out.push(Posting::new(id, 0));
            }
        }
        if reader.position() != skip as usize {
            return Err(DeluneError::codec(format!(
                "id section ends at {} but skip is {skip}",
                reader.position()
            )));
        }
        if flags.contains(ReadFlags::DOCS_ONLY) {
            return Ok(());
        }

        for i in 0..df {
            let tf = reader.read_varint_u32()?;
            if keep.contains(&i) {
                out[i - keep.start].tf = tf;
            }
        }
        if list_flags.contains(ListFlags::HAS_SCORE) {
            for i in 0..df {
                let score = reader.read_varint_u32()?;
                if keep.contains(&i) {
                    out[i - keep.start].score = Some(score);
                }
            }
        }
        if !reader.is_eof() {
            return Err(DeluneError::codec(format!(
                "{} trailing bytes after posting record",
                reader.remaining()
            )));
        }
        Ok(())
    }
}

/// Append-only writer of posting records into one payload file.
pub struct PostingWriter {
    output: Box<dyn StorageOutput>,
    name: String,
    offset: u64,
    max_bytes: u64,
    scratch: Vec<u8>,
}

impl PostingWriter {
    /// Wrap a freshly created payload file.
    pub fn new(output: Box<dyn StorageOutput>, name: String, max_bytes: u64) -> Self {
        PostingWriter {
            output,
            name,
            offset: 0,
            max_bytes,
            scratch: Vec::new(),
        }
    }

    /// Serialize one list.
    ///
    /// Returns `(df, skip)` in [`WriteMode::Term`] and `(df, end offset)` in
    /// [`WriteMode::Corpus`]; [`PostingWriter::write_list`] returns both.
    pub fn write(&mut self, entries: &[Posting], mode: WriteMode) -> Result<(u32, u64)> {
        let written = self.write_list(entries)?;
        Ok(match mode {
            WriteMode::Term => (written.df, written.skip as u64),
            WriteMode::Corpus => (written.df, written.offset + written.length as u64),
        })
    }

    /// Serialize one list and report where it landed.
    pub fn write_list(&mut self, entries: &[Posting]) -> Result<WrittenList> {
        let df = u32::try_from(entries.len()).map_err(|_| {
            DeluneError::segment_too_large(format!("{} entries in one list", entries.len()))
        })?;
        if df == 0 {
            return Ok(WrittenList {
                df: 0,
                offset: self.offset,
                skip: 0,
                length: 0,
            });
        }

        self.scratch.clear();
        let (skip, length) = PostingCodec::encode(entries, &mut self.scratch)?;
        let end = self.offset + length as u64;
        if end > self.max_bytes {
            return Err(DeluneError::segment_too_large(format!(
                "{} would grow to {end} bytes, ceiling is {}",
                self.name, self.max_bytes
            )));
        }

        self.output.write_all(&self.scratch)?;
        let written = WrittenList {
            df,
            offset: self.offset,
            skip,
            length,
        };
        self.offset = end;
        Ok(written)
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Flush and fsync the payload file.
    pub fn commit(&mut self) -> Result<()> {
        self.output
            .flush_and_sync()
            .map_err(|e| e.context(format!("commit {}", self.name)))
    }

    /// Close the payload file.
    pub fn close(mut self) -> Result<()> {
        self.output.close()
    }
}
