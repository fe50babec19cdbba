use anyhow::{bail, ensure, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use comparator::SharedComparator;
use memmap2::Mmap;
use memtable::Entry;
use std::cmp::Ordering;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::format::{data_file_name, index_file_name, Footer, IndexRecord, FOOTER_BYTES, INDEX_RECORD_BYTES};

/// Read-only view of one segment, memory-mapped.
///
/// Both files are mapped on [`open`](SSTableReader::open) and validated once:
/// footer magic and version, index length, data length, data CRC, and that
/// every record's offsets are monotone and in bounds. After that, lookups
/// never fail; they are pure slicing into the maps.
///
/// Point lookups binary-search the fixed-size index records, touching the
/// data file only to compare candidate keys.
pub struct SSTableReader {
    data: Mmap,
    index: Mmap,
    id: u64,
    footer: Footer,
    cmp: SharedComparator,
    // Declared after the maps: fields drop in order, so the files are
    // unmapped before `SegmentFiles` may delete them.
    files: SegmentFiles,
}

impl SSTableReader {
    /// Opens segment `id` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing, or if any structural check
    /// fails. Callers treat both cases as corruption of the store.
    pub fn open(dir: &Path, id: u64, cmp: SharedComparator) -> Result<Self> {
        let data_path = dir.join(data_file_name(id));
        let index_path = dir.join(index_file_name(id));

        let index = map_file(&index_path)?;
        let footer = Footer::decode(&index)
            .with_context(|| format!("bad footer in {}", index_path.display()))?;

        ensure!(footer.entry_count > 0, "segment {} has no entries", id);
        let expected_index = footer
            .entry_count
            .checked_mul(INDEX_RECORD_BYTES as u64)
            .and_then(|n| n.checked_add(FOOTER_BYTES as u64));
        ensure!(
            expected_index == Some(index.len() as u64),
            "segment {}: index length {} does not match {} entries",
            id,
            index.len(),
            footer.entry_count
        );

        let data = map_file(&data_path)?;
        ensure!(
            data.len() as u64 == footer.data_len,
            "segment {}: data length {} but footer says {}",
            id,
            data.len(),
            footer.data_len
        );
        let crc = crc32fast::hash(&data);
        ensure!(
            crc == footer.data_crc,
            "segment {}: data checksum mismatch (stored {:#010x}, computed {:#010x})",
            id,
            footer.data_crc,
            crc
        );

        let reader = Self {
            data,
            index,
            id,
            footer,
            cmp,
            files: SegmentFiles {
                data: data_path,
                index: index_path,
                retired: AtomicBool::new(false),
            },
        };
        reader.validate_records()?;
        tracing::debug!(id, entries = footer.entry_count, "opened segment");
        Ok(reader)
    }

    fn validate_records(&self) -> Result<()> {
        let mut tombstones = 0u64;
        let mut prev_end = 0u64;
        for i in 0..self.len() {
            let rec = self.record(i);
            let end = self.extent_end(i);
            if rec.key_offset != prev_end {
                bail!("segment {}: record {} does not start where the previous ended", self.id, i);
            }
            let value_start = rec.value_start();
            if rec.key_offset >= value_start || value_start > end {
                bail!("segment {}: record {} has bad offsets", self.id, i);
            }
            if rec.is_tombstone() {
                if value_start != end {
                    bail!("segment {}: tombstone {} carries value bytes", self.id, i);
                }
                tombstones += 1;
            }
            prev_end = end;
        }
        ensure!(
            prev_end == self.footer.data_len,
            "segment {}: records do not cover the data file",
            self.id
        );
        ensure!(
            tombstones == self.footer.tombstones,
            "segment {}: tombstone count mismatch",
            self.id
        );
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Recency rank stored in the footer. Higher wins on key collisions.
    pub fn priority(&self) -> u64 {
        self.footer.priority
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.footer.entry_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.footer.entry_count == 0
    }

    pub fn tombstones(&self) -> u64 {
        self.footer.tombstones
    }

    pub fn data_len(&self) -> u64 {
        self.footer.data_len
    }

    /// Index record `i`. Panics if `i >= len()`.
    pub fn record(&self, i: usize) -> IndexRecord {
        let start = i * INDEX_RECORD_BYTES;
        IndexRecord {
            key_offset: LittleEndian::read_u64(&self.index[start..start + 8]),
            value_offset: LittleEndian::read_u64(&self.index[start + 8..start + 16]),
        }
    }

    fn extent_end(&self, i: usize) -> u64 {
        if i + 1 < self.len() {
            self.record(i + 1).key_offset
        } else {
            self.footer.data_len
        }
    }

    /// Borrowed key bytes of entry `i`.
    pub fn key_at(&self, i: usize) -> &[u8] {
        let rec = self.record(i);
        &self.data[rec.key_offset as usize..rec.value_start() as usize]
    }

    /// Owned entry `i`, tombstone or live.
    pub fn entry_at(&self, i: usize) -> Entry {
        let rec = self.record(i);
        let key = self.data[rec.key_offset as usize..rec.value_start() as usize].to_vec();
        if rec.is_tombstone() {
            Entry::tombstone(key)
        } else {
            let end = self.extent_end(i) as usize;
            Entry {
                key,
                value: Some(self.data[rec.value_start() as usize..end].to_vec()),
            }
        }
    }

    /// Position of the first key `>= key`; `len()` if there is none.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        let (mut lo, mut hi) = (0usize, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.cmp.compare(self.key_at(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Point lookup. A tombstone is returned as an entry with `value: None`;
    /// `None` means the key is not in this segment at all.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        let pos = self.lower_bound(key);
        if pos < self.len() && self.cmp.compare(self.key_at(pos), key) == Ordering::Equal {
            Some(self.entry_at(pos))
        } else {
            None
        }
    }

    /// Cheap bounds check against the smallest and largest key.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        if self.is_empty() {
            return false;
        }
        self.cmp.compare(key, self.key_at(0)) != Ordering::Less
            && self.cmp.compare(key, self.key_at(self.len() - 1)) != Ordering::Greater
    }

    /// Lazily iterates `[from, to)`, tombstones included.
    ///
    /// The iterator holds its own `Arc`, so the segment stays mapped (and its
    /// files stay on disk) for as long as the iterator lives.
    pub fn range(self: &Arc<Self>, from: Option<&[u8]>, to: Option<&[u8]>) -> TableRange {
        let pos = from.map_or(0, |k| self.lower_bound(k));
        let end = to.map_or(self.len(), |k| self.lower_bound(k));
        TableRange {
            table: Arc::clone(self),
            pos,
            end: end.max(pos),
        }
    }

    /// Marks the segment obsolete: its files are deleted once the last
    /// handle is dropped.
    pub fn retire(&self) {
        self.files.retired.store(true, AtomicOrdering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.files.retired.load(AtomicOrdering::Acquire)
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("id", &self.id)
            .field("priority", &self.footer.priority)
            .field("entries", &self.footer.entry_count)
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// Owning iterator returned by [`SSTableReader::range`].
pub struct TableRange {
    table: Arc<SSTableReader>,
    pos: usize,
    end: usize,
}

impl Iterator for TableRange {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if self.pos >= self.end {
            return None;
        }
        let e = self.table.entry_at(self.pos);
        self.pos += 1;
        Some(e)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end - self.pos;
        (n, Some(n))
    }
}

struct SegmentFiles {
    data: PathBuf,
    index: PathBuf,
    retired: AtomicBool,
}

impl Drop for SegmentFiles {
    fn drop(&mut self) {
        if !self.retired.load(AtomicOrdering::Acquire) {
            return;
        }
        for path in [&self.data, &self.index] {
            match fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "deleted retired segment file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete retired segment file")
                }
            }
        }
    }
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let len = file.metadata()?.len();
    ensure!(len > 0, "{} is empty", path.display());
    // SAFETY: segment files are immutable once renamed into place and are
    // only deleted after every mapping of them has been dropped.
    let map = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to map {}", path.display()))?;
    Ok(map)
}
