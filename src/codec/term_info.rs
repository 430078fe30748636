//! Term dictionary codec.
//!
//! The dictionary of one segment spans two files:
//!
//! - `fis` holds one variable-size record per entry, in the order entries
//!   were added: `fdno, key, df, entries, doc_offset, pos_offset, skip,
//!   length`.
//! - `fii` is written at commit: a header, then one fixed-size slot
//!   `(fdno: u32, record offset: u64, record length: u32)` per entry sorted by
//!   `(fdno, key)`, then a CRC32 footer.
//!
//! Readers keep the small `fii` slots in memory and binary-search them,
//! reading one `fis` record per probe into the caller's memory handle.

use std::cmp::Ordering;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{DeluneError, Result};
use crate::memory::MemHandle;
use crate::storage::{StorageInput, StorageOutput, StructReader, StructWriter};

const INDEX_MAGIC: u32 = 0x4446_4C44; // "DLFD"
const INDEX_VERSION: u32 = 2;
const INDEX_HEADER_BYTES: usize = 16;
const INDEX_SLOT_BYTES: usize = 16;
const KEY_TAG_ID: u8 = 0;
const KEY_TAG_TEXT: u8 = 1;

/// A dictionary key: a term or a small numeric id.
///
/// Ids order before text, text orders bytewise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TermKey {
    Id(u32),
    Text(String),
}

impl TermKey {
    /// The text of a text key.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TermKey::Text(text) => Some(text),
            TermKey::Id(_) => None,
        }
    }

    fn cmp_encoded(&self, tag: u8, payload: &[u8], id: u32) -> Ordering {
        match (self, tag) {
            (TermKey::Id(mine), KEY_TAG_ID) => mine.cmp(&id),
            (TermKey::Id(_), _) => Ordering::Less,
            (TermKey::Text(_), KEY_TAG_ID) => Ordering::Greater,
            (TermKey::Text(mine), _) => mine.as_bytes().cmp(payload),
        }
    }
}

impl fmt::Display for TermKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermKey::Id(id) => write!(f, "#{id}"),
            TermKey::Text(text) => write!(f, "'{text}'"),
        }
    }
}

impl From<&str> for TermKey {
    fn from(text: &str) -> Self {
        TermKey::Text(text.to_string())
    }
}

impl From<String> for TermKey {
    fn from(text: String) -> Self {
        TermKey::Text(text)
    }
}

impl From<u32> for TermKey {
    fn from(id: u32) -> Self {
        TermKey::Id(id)
    }
}

/// Where a term's posting list lives and how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TermInfo {
    /// Documents the term occurs in. Equal to `entries` for per-document
    /// postings; the sum of the per-pool document frequencies for
    /// per-pool postings.
    pub df: u32,
    /// Number of entries in the posting list.
    pub entries: u32,
    /// Byte offset of the list in the payload file.
    pub doc_offset: u64,
    /// Byte offset of positional data; this engine stores none and writes 0.
    pub pos_offset: u64,
    /// Byte length of the flags byte plus the id section.
    pub skip: u32,
    /// Total byte length of the list.
    pub length: u32,
}

impl TermInfo {
    /// Check the record's internal invariants.
    pub fn validate(&self) -> Result<()> {
        if self.skip > self.length {
            return Err(DeluneError::codec(format!(
                "skip {} exceeds posting length {}",
                self.skip, self.length
            )));
        }
        if self.entries > 0 && self.length == 0 {
            return Err(DeluneError::codec(format!(
                "{} entries with an empty posting record",
                self.entries
            )));
        }
        if self.df == 0 && self.entries > 0 {
            return Err(DeluneError::codec(format!(
                "{} entries for a term of document frequency 0",
                self.entries
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexSlot {
    fdno: u32,
    offset: u64,
    length: u32,
}

/// Writes `fis` records as entries arrive and the sorted `fii` at commit.
pub struct DictionaryWriter {
    records: StructWriter<Box<dyn StorageOutput>>,
    index: Box<dyn StorageOutput>,
    name: String,
    pending: Vec<(u32, TermKey, IndexSlot)>,
}

impl DictionaryWriter {
    /// Wrap freshly created `fis` and `fii` outputs.
    pub fn new(records: Box<dyn StorageOutput>, index: Box<dyn StorageOutput>, name: String) -> Self {
        DictionaryWriter {
            records: StructWriter::new(records),
            index,
            name,
            pending: Vec::new(),
        }
    }

    /// Append one entry.
    pub fn add(&mut self, key: &TermKey, fdno: u32, info: &TermInfo) -> Result<()> {
        info.validate()?;
        let offset = self.records.position();

        self.records.write_varint(fdno as u64)?;
        match key {
            TermKey::Id(id) => {
                self.records.write_u8(KEY_TAG_ID)?;
                self.records.write_varint(*id as u64)?;
            }
            TermKey::Text(text) => {
                self.records.write_u8(KEY_TAG_TEXT)?;
                self.records.write_bytes(text.as_bytes())?;
            }
        }
        self.records.write_u32(info.df)?;
        self.records.write_u32(info.entries)?;
        self.records.write_u64(info.doc_offset)?;
        self.records.write_u64(info.pos_offset)?;
        self.records.write_u32(info.skip)?;
        self.records.write_u32(info.length)?;

        let length = (self.records.position() - offset) as u32;
        self.pending.push((
            fdno,
            key.clone(),
            IndexSlot {
                fdno,
                offset,
                length,
            },
        ));
        Ok(())
    }

    /// Number of entries added.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no entry was added.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Sort the index, write `fii`, and fsync both files.
    pub fn commit(&mut self) -> Result<()> {
        self.pending
            .sort_by(|(fa, ka, _), (fb, kb, _)| fa.cmp(fb).then_with(|| ka.cmp(kb)));
        if let Some(pair) = self
            .pending
            .windows(2)
            .find(|w| w[0].0 == w[1].0 && w[0].1 == w[1].1)
        {
            return Err(DeluneError::invalid_argument(format!(
                "{}: duplicate dictionary key {} in field {}",
                self.name, pair[0].1, pair[0].0
            )));
        }

        let mut index = StructWriter::new(&mut self.index);
        index.write_u32(INDEX_MAGIC)?;
        index.write_u32(INDEX_VERSION)?;
        index.write_u64(self.pending.len() as u64)?;
        for (_, _, slot) in &self.pending {
            index.write_u32(slot.fdno)?;
            index.write_u64(slot.offset)?;
            index.write_u32(slot.length)?;
        }
        index.finish()?;

        self.records
            .get_mut()
            .flush_and_sync()
            .map_err(|e| e.context(format!("commit {}.fis", self.name)))?;
        self.index
            .flush_and_sync()
            .map_err(|e| e.context(format!("commit {}.fii", self.name)))
    }

    /// Close both files.
    pub fn close(self) -> Result<()> {
        let mut records = self.records.into_inner();
        records.close()?;
        let mut index = self.index;
        index.close()
    }
}

/// Read side of the dictionary.
#[derive(Debug)]
pub struct DictionaryReader {
    records: Mutex<Box<dyn StorageInput>>,
    slots: Vec<IndexSlot>,
    name: String,
}

impl DictionaryReader {
    /// Load the `fii` index and keep `fis` open for record reads.
    pub fn open(
        records: Box<dyn StorageInput>,
        mut index: Box<dyn StorageInput>,
        name: String,
    ) -> Result<Self> {
        let size = index.size()? as usize;
        let mut bytes = vec![0u8; size];
        index.read_at(0, &mut bytes)?;

        let what = format!("{name}.fii");
        let mut reader = StructReader::verified(&bytes, &what)?;
        if reader.remaining() < INDEX_HEADER_BYTES {
            return Err(DeluneError::codec(format!("{what}: truncated header")));
        }
        let magic = reader.read_u32()?;
        if magic != INDEX_MAGIC {
            return Err(DeluneError::codec(format!("{what}: bad magic {magic:#010x}")));
        }
        let version = reader.read_u32()?;
        if version != INDEX_VERSION {
            return Err(DeluneError::codec(format!(
                "{what}: unsupported version {version}"
            )));
        }
        let count = reader.read_u64()? as usize;
        if reader.remaining() != count.saturating_mul(INDEX_SLOT_BYTES) {
            return Err(DeluneError::codec(format!(
                "{what}: {count} slots declared, {} bytes present",
                reader.remaining()
            )));
        }

        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(IndexSlot {
                fdno: reader.read_u32()?,
                offset: reader.read_u64()?,
                length: reader.read_u32()?,
            });
        }

        Ok(DictionaryReader {
            records: Mutex::new(records),
            slots,
            name,
        })
    }

    /// Number of entries in the dictionary.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Look up `key` in field `fdno`.
    ///
    /// Binary search over the in-memory slots; every probe reads one record.
    pub fn get(&self, mem: &mut MemHandle, key: &TermKey, fdno: u32) -> Result<TermInfo> {
        let field = self.field_range(fdno);
        let (mut lo, mut hi) = (field.start, field.end);

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let record = self.load(mem, mid)?;
            match record.compare(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(record.info),
            }
        }

        Err(DeluneError::not_found(format!(
            "{key} in field {fdno} of segment {}",
            self.name
        )))
    }

    /// Every entry of field `fdno`, in key order.
    pub fn entries(&self, mem: &mut MemHandle, fdno: u32) -> Result<Vec<(TermKey, TermInfo)>> {
        self.field_range(fdno)
            .map(|i| {
                let record = self.load(mem, i)?;
                Ok((record.key(), record.info))
            })
            .collect()
    }

    fn field_range(&self, fdno: u32) -> std::ops::Range<usize> {
        let start = self.slots.partition_point(|s| s.fdno < fdno);
        let end = self.slots.partition_point(|s| s.fdno <= fdno);
        start..end
    }

    fn load<'m>(&self, mem: &'m mut MemHandle, index: usize) -> Result<Record<'m>> {
        let slot = self.slots[index];
        let buffer = mem.read_buffer(slot.length as usize);
        self.records
            .lock()
            .read_at(slot.offset, buffer)
            .map_err(|e| e.context(format!("{}.fis record {index}", self.name)))?;

        let data: &'m [u8] = buffer;
        Record::parse(data, slot.fdno)
            .map_err(|e| e.context(format!("{}.fis record {index}", self.name)))
    }
}

struct Record<'a> {
    tag: u8,
    payload: &'a [u8],
    id: u32,
    info: TermInfo,
}

impl<'a> Record<'a> {
    fn parse(data: &'a [u8], expected_fdno: u32) -> Result<Self> {
        let mut reader = StructReader::new(data);
        let fdno = reader.read_varint_u32()?;
        if fdno != expected_fdno {
            return Err(DeluneError::codec(format!(
                "record field {fdno} disagrees with index field {expected_fdno}"
            )));
        }

        let tag = reader.read_u8()?;
        let (payload, id): (&'a [u8], u32) = match tag {
            KEY_TAG_ID => (&[], reader.read_varint_u32()?),
            KEY_TAG_TEXT => (reader.read_bytes()?, 0),
            other => return Err(DeluneError::codec(format!("unknown key tag {other}"))),
        };

        let info = TermInfo {
            df: reader.read_u32()?,
            entries: reader.read_u32()?,
            doc_offset: reader.read_u64()?,
            pos_offset: reader.read_u64()?,
            skip: reader.read_u32()?,
            length: reader.read_u32()?,
        };
        info.validate()?;

        Ok(Record {
            tag,
            payload,
            id,
            info,
        })
    }

    /// Ordering of this record relative to `key`.
    fn compare(&self, key: &TermKey) -> Ordering {
        key.cmp_encoded(self.tag, self.payload, self.id).reverse()
    }

    fn key(&self) -> TermKey {
        match self.tag {
            KEY_TAG_ID => TermKey::Id(self.id),
            _ => TermKey::Text(String::from_utf8_lossy(self.payload).into_owned()),
        }
    }
}
