//! Term x term co-occurrence store (`cof` payload, `coi` row index).
//!
//! Row `i` holds one entry `(j, df)` for every vocabulary index `j > i`
//! whose posting list shares `df > 0` documents with term `i`. Pairs are
//! stored once, under the smaller index, and rows are addressed by
//! position: the `coi` file is a dense array with one slot per vocabulary
//! term, so rows must be written in strictly increasing order.

use parking_lot::Mutex;

use crate::codec::{Posting, PostingCodec, PostingWriter, ReadFlags};
use crate::error::{DeluneError, Result};
use crate::memory::MemHandle;
use crate::storage::{StorageInput, StorageOutput, StructReader, StructWriter};

const INDEX_MAGIC: u32 = 0x4F43_4C44; // "DLCO"
const INDEX_VERSION: u32 = 1;
const ROW_SLOT_BYTES: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RowSlot {
    offset: u64,
    df: u32,
    skip: u32,
    length: u32,
}

/// Streams co-occurrence rows into a new segment.
pub struct CoOccurrenceWriter {
    payload: PostingWriter,
    index: Box<dyn StorageOutput>,
    name: String,
    rows: Vec<RowSlot>,
}

impl CoOccurrenceWriter {
    pub fn new(
        payload: Box<dyn StorageOutput>,
        index: Box<dyn StorageOutput>,
        name: String,
        max_bytes: u64,
    ) -> Self {
        CoOccurrenceWriter {
            payload: PostingWriter::new(payload, format!("{name}.cof"), max_bytes),
            index,
            name,
            rows: Vec::new(),
        }
    }

    /// Write row `row`. Rows skipped since the previous call are left empty.
    ///
    /// `entries` must be ordered by strictly increasing column index, every
    /// column greater than `row`, every count positive.
    pub fn write_row(&mut self, row: u32, entries: &[Posting]) -> Result<()> {
        let position = row as usize;
        if position < self.rows.len() {
            return Err(DeluneError::invalid_argument(format!(
                "{}: co-occurrence row {row} written after row {}",
                self.name,
                self.rows.len() - 1
            )));
        }
        let mut previous = row;
        for entry in entries {
            if entry.id <= previous || entry.tf == 0 {
                return Err(DeluneError::invalid_argument(format!(
                    "{}: row {row} has out-of-order or empty column {}",
                    self.name, entry.id
                )));
            }
            previous = entry.id;
        }

        self.rows.resize(position, RowSlot::default());
        let written = self.payload.write_list(entries)?;
        self.rows.push(RowSlot {
            offset: written.offset,
            df: written.df,
            skip: written.skip,
            length: written.length,
        });
        Ok(())
    }

    /// Extend the index with empty rows up to `rows` slots.
    pub fn pad_to(&mut self, rows: usize) -> Result<()> {
        if self.rows.len() > rows {
            return Err(DeluneError::invalid_argument(format!(
                "{}: {} rows written for a vocabulary of {rows}",
                self.name,
                self.rows.len()
            )));
        }
        self.rows.resize(rows, RowSlot::default());
        Ok(())
    }

    /// Number of row slots so far.
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Write the `coi` index and fsync both files.
    pub fn commit(&mut self) -> Result<()> {
        let mut index = StructWriter::new(&mut self.index);
        index.write_u32(INDEX_MAGIC)?;
        index.write_u32(INDEX_VERSION)?;
        index.write_u64(self.rows.len() as u64)?;
        for slot in &self.rows {
            index.write_u64(slot.offset)?;
            index.write_u32(slot.df)?;
            index.write_u32(slot.skip)?;
            index.write_u32(slot.length)?;
        }
        index.finish()?;

        self.payload.commit()?;
        self.index
            .flush_and_sync()
            .map_err(|e| e.context(format!("commit {}.coi", self.name)))
    }

    pub fn close(self) -> Result<()> {
        self.payload.close()?;
        let mut index = self.index;
        index.close()
    }
}

/// Positional lookups into a committed co-occurrence store.
#[derive(Debug)]
pub struct CoOccurrenceReader {
    payload: Mutex<Box<dyn StorageInput>>,
    rows: Vec<RowSlot>,
    name: String,
}

impl CoOccurrenceReader {
    pub fn open(
        payload: Box<dyn StorageInput>,
        mut index: Box<dyn StorageInput>,
        name: String,
    ) -> Result<Self> {
        let mut bytes = vec![0u8; index.size()? as usize];
        index.read_at(0, &mut bytes)?;

        let what = format!("{name}.coi");
        let mut reader = StructReader::verified(&bytes, &what)?;
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
        if reader.remaining() != count.saturating_mul(ROW_SLOT_BYTES) {
            return Err(DeluneError::codec(format!(
                "{what}: {count} rows declared, {} bytes present",
                reader.remaining()
            )));
        }

        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            rows.push(RowSlot {
                offset: reader.read_u64()?,
                df: reader.read_u32()?,
                skip: reader.read_u32()?,
                length: reader.read_u32()?,
            });
        }

        Ok(CoOccurrenceReader {
            payload: Mutex::new(payload),
            rows,
            name,
        })
    }

    /// Number of row slots, equal to the committed vocabulary size.
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Document frequency of the pair `(a, b)`.
    ///
    /// The pair is unordered. `a == b` is rejected, an index outside the
    /// vocabulary is `NotFound`, and an in-range pair with no entry is 0.
    pub fn get(&self, mem: &mut MemHandle, a: u32, b: u32) -> Result<u32> {
        if a == b {
            return Err(DeluneError::invalid_argument(format!(
                "co-occurrence of term {a} with itself"
            )));
        }
        let (low, high) = if a > b { (b, a) } else { (a, b) };
        if high as usize >= self.rows.len() {
            return Err(DeluneError::not_found(format!(
                "term index {high} in {}.coi ({} rows)",
                self.name,
                self.rows.len()
            )));
        }

        let row = self.row(mem, low)?;
        Ok(row
            .binary_search_by_key(&high, |p| p.id)
            .map(|i| row[i].tf)
            .unwrap_or(0))
    }

    /// Decode row `row` into `mem`.
    pub fn row<'m>(&self, mem: &'m mut MemHandle, row: u32) -> Result<&'m [Posting]> {
        let slot = self.rows.get(row as usize).copied().ok_or_else(|| {
            DeluneError::not_found(format!("row {row} in {}.coi", self.name))
        })?;

        let buffer = mem.read_buffer(slot.length as usize);
        if slot.df > 0 {
            self.payload
                .lock()
                .read_at(slot.offset, buffer)
                .map_err(|e| e.context(format!("{}.cof row {row}", self.name)))?;
        }
        let (data, out) = mem.decode_parts();
        PostingCodec::decode(data, slot.df, slot.skip, None, ReadFlags::empty(), out)
            .map_err(|e| e.context(format!("{}.cof row {row}", self.name)))?;
        Ok(mem.postings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryPoolConfig;
    use crate::memory::MemoryPool;
    use crate::storage::{MemoryStorage, Storage};

    fn writer(storage: &MemoryStorage) -> CoOccurrenceWriter {
        CoOccurrenceWriter::new(
            storage.create_output("2.cof").unwrap(),
            storage.create_output("2.coi").unwrap(),
            "2".to_string(),
            1 << 20,
        )
    }

    fn reader(storage: &MemoryStorage) -> Result<CoOccurrenceReader> {
        CoOccurrenceReader::open(
            storage.open_input("2.cof").unwrap(),
            storage.open_input("2.coi").unwrap(),
            "2".to_string(),
        )
    }

    #[test]
    fn test_rows_are_positional_and_symmetric() {
        let storage = MemoryStorage::new();
        let mut w = writer(&storage);
        w.write_row(0, &[Posting::new(2, 2), Posting::new(3, 1)]).unwrap();
        w.write_row(2, &[Posting::new(3, 4)]).unwrap();
        w.pad_to(4).unwrap();
        w.commit().unwrap();
        w.close().unwrap();

        let r = reader(&storage).unwrap();
        let mut mem = MemoryPool::new(MemoryPoolConfig::default())
            .unwrap()
            .acquire(0)
            .unwrap();
        assert_eq!(r.rows(), 4);
        assert_eq!(r.get(&mut mem, 0, 2).unwrap(), 2);
        assert_eq!(r.get(&mut mem, 2, 0).unwrap(), 2);
        assert_eq!(r.get(&mut mem, 3, 2).unwrap(), 4);
        assert_eq!(r.get(&mut mem, 0, 1).unwrap(), 0);
        assert_eq!(r.get(&mut mem, 1, 3).unwrap(), 0);
        assert!(r.get(&mut mem, 0, 4).unwrap_err().is_not_found());
        assert!(matches!(
            r.get(&mut mem, 1, 1),
            Err(DeluneError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rows_must_increase() {
        let storage = MemoryStorage::new();
        let mut w = writer(&storage);
        w.write_row(1, &[Posting::new(2, 1)]).unwrap();
        assert!(w.write_row(1, &[Posting::new(3, 1)]).is_err());
        assert!(w.write_row(0, &[]).is_err());
        assert!(w.write_row(2, &[Posting::new(2, 1)]).is_err());
        assert!(w.write_row(3, &[Posting::new(5, 1), Posting::new(4, 1)]).is_err());
        assert!(w.pad_to(1).is_err());
    }

    #[test]
    fn test_corrupt_index() {
        let storage = MemoryStorage::new();
        let mut w = writer(&storage);
        w.write_row(0, &[Posting::new(1, 1)]).unwrap();
        w.pad_to(2).unwrap();
        w.commit().unwrap();
        w.close().unwrap();

        let mut bytes = storage.get_bytes("2.coi").unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        storage.put_bytes("2.coi", bytes);
        assert!(matches!(reader(&storage), Err(DeluneError::Codec(_))));
    }
}
