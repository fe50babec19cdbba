//! # SSTable - Sorted String Table
//!
//! Immutable on-disk segments for the Tidewater storage engine.
//!
//! When the active [`memtable::Memtable`] crosses its size threshold the
//! engine flushes it as a new segment; compaction later merges many segments
//! into one. A segment is *write-once, read-many*: once published it is only
//! ever superseded and eventually deleted.
//!
//! ## File pair
//!
//! Each segment with id `N` is stored as two files:
//!
//! ```text
//! data_N   key0 | value0 | key1 | key2 | value2 | ...      (no length fields)
//!
//! index_N  ┌────────────────────────────────────────────────┐
//!          │ key_offset (u64 LE) | value_offset (u64 LE)    │ × entry_count
//!          ├────────────────────────────────────────────────┤
//!          │ FOOTER (48 bytes)                              │
//!          │ entry_count | data_len | tombstones | priority │
//!          │ data_crc32 | reserved | magic "TWI1" | version │
//!          └────────────────────────────────────────────────┘
//! ```
//!
//! The index records are fixed-size, so binary search walks the index file
//! without touching the data file; the data file is only read to compare a
//! candidate key or to decode a value once a position is resolved.
//!
//! A tombstone sets the high bit of `value_offset`. With the bit cleared the
//! offset still marks where the key ends. Every entry's extent ends at the
//! next record's `key_offset`, and the last entry ends at the footer's
//! `data_len`, so a trailing tombstone needs no special case.
//!
//! ## Lifetime
//!
//! Readers are shared as `Arc<SSTableReader>`. Cloning the `Arc` is what
//! "opening" a segment for a scan means; dropping it closes it. A segment
//! that compaction has replaced is [`retire`](SSTableReader::retire)d: its
//! files are unmapped and deleted when the last handle is dropped.

mod format;
mod merge;
mod reader;
mod writer;

pub use format::{
    data_file_name, index_file_name, parse_segment_file_name, Footer, IndexRecord, SegmentFile,
    FOOTER_BYTES, FORMAT_VERSION, INDEX_MAGIC, INDEX_RECORD_BYTES, TOMBSTONE_FLAG,
};
pub use merge::{MergeIterator, Source, TombstonePolicy};
pub use reader::{SSTableReader, TableRange};
pub use writer::{SSTableWriter, TableMeta};

#[cfg(test)]
mod tests;
