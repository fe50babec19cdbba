//! The `{active, flushing, segments}` tuple guarded by the engine's state lock.

use comparator::KeyComparator;
use memtable::Memtable;
use parking_lot::Mutex;
use sstable::SSTableReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wal::{wal_file_name, WalRecord, WalWriter};

use crate::error::Result;

/// One memtable generation and the log that makes it durable.
pub(crate) struct Generation {
    pub(crate) id: u64,
    pub(crate) table: Arc<Memtable>,
    wal: Option<Mutex<WalWriter>>,
    wal_path: Option<PathBuf>,
}

impl Generation {
    /// A fresh, empty generation. Creates `wal_<id>` when `wal` is enabled.
    pub(crate) fn create(
        dir: &Path,
        id: u64,
        cmp: &dyn KeyComparator,
        wal: bool,
        wal_sync: bool,
    ) -> Result<Self> {
        let table = Memtable::with_comparator(cmp)?;
        let (writer, wal_path) = if wal {
            let path = dir.join(wal_file_name(id));
            (Some(Mutex::new(WalWriter::create(&path, wal_sync)?)), Some(path))
        } else {
            (None, None)
        };
        Ok(Self {
            id,
            table: Arc::new(table),
            wal: writer,
            wal_path,
        })
    }

    /// Wraps an already populated table that has no log of its own.
    pub(crate) fn detached(id: u64, table: Memtable) -> Self {
        Self {
            id,
            table: Arc::new(table),
            wal: None,
            wal_path: None,
        }
    }

    /// Logs the write, then applies it. Returns the table's new size.
    ///
    /// The log mutex is held across both steps so the log order of writes to
    /// the same key matches the order they land in the table.
    pub(crate) fn apply(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<usize> {
        let Some(wal) = &self.wal else {
            return Ok(self.table.upsert(key, value));
        };
        let mut wal = wal.lock();
        let record = match &value {
            Some(v) => WalRecord::Put {
                key: key.clone(),
                value: v.clone(),
            },
            None => WalRecord::Del { key: key.clone() },
        };
        wal.append(&record)?;
        Ok(self.table.upsert(key, value))
    }

    /// Deletes this generation's log once its contents are durable elsewhere.
    pub(crate) fn discard_wal(&self) {
        if let Some(path) = &self.wal_path {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete wal");
                }
            }
        }
    }
}

pub(crate) struct State {
    pub(crate) active: Arc<Generation>,
    /// The rotated-out generation being written to disk. It stays here,
    /// visible to reads, until its segment is committed; a failed flush
    /// leaves it in place for the next attempt.
    pub(crate) flushing: Option<Arc<Generation>>,
    /// Live segments, highest priority first.
    pub(crate) segments: Vec<Arc<SSTableReader>>,
}

/// A consistent, lock-free snapshot of [`State`] for one read.
pub(crate) struct View {
    pub(crate) active: Arc<Memtable>,
    pub(crate) flushing: Option<Arc<Memtable>>,
    pub(crate) segments: Vec<Arc<SSTableReader>>,
}

impl State {
    pub(crate) fn view(&self) -> View {
        View {
            active: Arc::clone(&self.active.table),
            flushing: self.flushing.as_ref().map(|g| Arc::clone(&g.table)),
            segments: self.segments.clone(),
        }
    }
}

/// Inserts `segment` keeping the list sorted by descending priority.
pub(crate) fn insert_by_priority(segments: &mut Vec<Arc<SSTableReader>>, segment: Arc<SSTableReader>) {
    let pos = segments
        .iter()
        .position(|s| s.priority() < segment.priority())
        .unwrap_or(segments.len());
    segments.insert(pos, segment);
}

pub(crate) fn segment_ids(segments: &[Arc<SSTableReader>]) -> Vec<u64> {
    segments.iter().map(|s| s.id()).collect()
}
