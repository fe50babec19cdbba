//! SSTable binary format constants and footer/index record helpers.
//!
//! ## Index record (16 bytes)
//!
//! ```text
//! [key_offset: u64 LE][value_offset: u64 LE]
//! ```
//!
//! `value_offset` carries [`TOMBSTONE_FLAG`] in its high bit for deletions.
//!
//! ## Footer (48 bytes, last bytes of the index file)
//!
//! ```text
//! [entry_count: u64][data_len: u64][tombstones: u64][priority: u64]
//! [data_crc: u32][reserved: u32][magic: u32 = "TWI1"][version: u32]
//! ```

use anyhow::{bail, ensure, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Result as IoResult, Write};

/// Magic number identifying a Tidewater index file (ASCII "TWI1").
pub const INDEX_MAGIC: u32 = 0x5457_4931;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of one index record: `key_offset` + `value_offset`.
pub const INDEX_RECORD_BYTES: usize = 8 + 8;

/// Size of the index footer in bytes.
pub const FOOTER_BYTES: usize = 8 + 8 + 8 + 8 + 4 + 4 + 4 + 4;

/// High bit of `value_offset`: the entry is a tombstone and has no value bytes.
pub const TOMBSTONE_FLAG: u64 = 1 << 63;

/// One fixed-size index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub key_offset: u64,
    pub value_offset: u64,
}

impl IndexRecord {
    pub fn live(key_offset: u64, value_offset: u64) -> Self {
        Self {
            key_offset,
            value_offset,
        }
    }

    pub fn tombstone(key_offset: u64, key_end: u64) -> Self {
        Self {
            key_offset,
            value_offset: key_end | TOMBSTONE_FLAG,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value_offset & TOMBSTONE_FLAG != 0
    }

    /// Where the key ends and the value (if any) begins.
    #[must_use]
    pub fn value_start(&self) -> u64 {
        self.value_offset & !TOMBSTONE_FLAG
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        w.write_u64::<LittleEndian>(self.key_offset)?;
        w.write_u64::<LittleEndian>(self.value_offset)?;
        Ok(())
    }

    /// Decodes a record from exactly [`INDEX_RECORD_BYTES`] bytes.
    pub fn decode(mut bytes: &[u8]) -> IoResult<Self> {
        let key_offset = bytes.read_u64::<LittleEndian>()?;
        let value_offset = bytes.read_u64::<LittleEndian>()?;
        Ok(Self {
            key_offset,
            value_offset,
        })
    }
}

/// Parsed index footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub entry_count: u64,
    /// Total length of the data file; bounds the last entry.
    pub data_len: u64,
    pub tombstones: u64,
    /// Recency rank of the segment. Higher wins on key collisions.
    pub priority: u64,
    /// CRC32 over the whole data file.
    pub data_crc: u32,
}

impl Footer {
    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        w.write_u64::<LittleEndian>(self.entry_count)?;
        w.write_u64::<LittleEndian>(self.data_len)?;
        w.write_u64::<LittleEndian>(self.tombstones)?;
        w.write_u64::<LittleEndian>(self.priority)?;
        w.write_u32::<LittleEndian>(self.data_crc)?;
        w.write_u32::<LittleEndian>(0)?;
        w.write_u32::<LittleEndian>(INDEX_MAGIC)?;
        w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        Ok(())
    }

    /// Decodes and validates the footer from the tail of an index file.
    pub fn decode(index: &[u8]) -> Result<Self> {
        ensure!(
            index.len() >= FOOTER_BYTES,
            "index file too small for footer ({} bytes)",
            index.len()
        );

        let mut r = &index[index.len() - FOOTER_BYTES..];
        let entry_count = r.read_u64::<LittleEndian>()?;
        let data_len = r.read_u64::<LittleEndian>()?;
        let tombstones = r.read_u64::<LittleEndian>()?;
        let priority = r.read_u64::<LittleEndian>()?;
        let data_crc = r.read_u32::<LittleEndian>()?;
        let _reserved = r.read_u32::<LittleEndian>()?;
        let magic = r.read_u32::<LittleEndian>()?;
        let version = r.read_u32::<LittleEndian>()?;

        if magic != INDEX_MAGIC {
            bail!("unknown index magic: {:#x}", magic);
        }
        if version != FORMAT_VERSION {
            bail!("unsupported index format version {}", version);
        }

        Ok(Self {
            entry_count,
            data_len,
            tombstones,
            priority,
            data_crc,
        })
    }
}

/// The two halves of a segment on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFile {
    Data,
    Index,
}

/// `data_00000000000000000042`
pub fn data_file_name(id: u64) -> String {
    format!("data_{:020}", id)
}

/// `index_00000000000000000042`
pub fn index_file_name(id: u64) -> String {
    format!("index_{:020}", id)
}

/// Parses a committed segment file name back into its kind and id.
///
/// Temporary files (`*.tmp`) and anything else return `None`.
pub fn parse_segment_file_name(name: &str) -> Option<(SegmentFile, u64)> {
    let (kind, digits) = if let Some(rest) = name.strip_prefix("data_") {
        (SegmentFile::Data, rest)
    } else if let Some(rest) = name.strip_prefix("index_") {
        (SegmentFile::Index, rest)
    } else {
        return None;
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|id| (kind, id))
}
