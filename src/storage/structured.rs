//! Structured binary I/O for segment files.
//!
//! [`StructWriter`] streams little-endian integers, varints and length-prefixed
//! bytes into any writer while tracking position and a running CRC32.
//! [`StructReader`] decodes the same encoding from a byte slice (usually a
//! memory-pool buffer) and reports every short read as a codec error instead
//! of panicking.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{DeluneError, Result};
use crate::util::varint::{decode_u64, encode_u64};

/// A structured writer for binary data.
pub struct StructWriter<W: Write> {
    writer: W,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: Write> StructWriter<W> {
    /// Create a new structured writer starting at position 0.
    pub fn new(writer: W) -> Self {
        Self::at(writer, 0)
    }

    /// Create a structured writer whose stream already holds `position` bytes.
    pub fn at(writer: W, position: u64) -> Self {
        StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.track(&[value]);
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = encode_u64(value);
        self.writer.write_all(&encoded)?;
        self.track(&encoded);
        Ok(())
    }

    /// Write raw bytes with a varint length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.track(value);
        Ok(())
    }

    /// Get current stream position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// CRC32 of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Append the CRC32 footer and hand the writer back.
    pub fn finish(mut self) -> Result<W> {
        let checksum = self.checksum();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        Ok(self.writer)
    }

    /// Hand the writer back without a footer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Mutable access to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }
}

/// A bounds-checked reader over an in-memory byte slice.
#[derive(Debug, Clone)]
pub struct StructReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> StructReader<'a> {
    /// Create a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        StructReader { data, position: 0 }
    }

    /// Split off the trailing CRC32 footer and verify it.
    ///
    /// Returns a reader over the payload only.
    pub fn verified(data: &'a [u8], what: &str) -> Result<Self> {
        if data.len() < 4 {
            return Err(DeluneError::codec(format!("{what}: missing checksum footer")));
        }
        let (payload, footer) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let actual = crc32fast::hash(payload);
        if stored != actual {
            return Err(DeluneError::codec(format!(
                "{what}: checksum mismatch (stored {stored:#010x}, computed {actual:#010x})"
            )));
        }
        Ok(StructReader::new(payload))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                DeluneError::codec(format!(
                    "truncated data: need {len} bytes at {}, have {}",
                    self.position,
                    self.data.len()
                ))
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, used) = decode_u64(&self.data[self.position..])?;
        self.position += used;
        Ok(value)
    }

    /// Read a varint that must fit in a u32.
    pub fn read_varint_u32(&mut self) -> Result<u32> {
        let value = self.read_varint()?;
        u32::try_from(value)
            .map_err(|_| DeluneError::codec(format!("varint {value} overflows u32")))
    }

    /// Read bytes with a varint length prefix.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| DeluneError::codec(format!("byte length {len} overflows usize")))?;
        self.take(len)
    }

    /// Read exactly `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Current position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Check if every byte has been consumed.
    pub fn is_eof(&self) -> bool {
        self.position >= self.data.len()
    }
}
