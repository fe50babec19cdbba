/// Cold-start path: manifest load, directory cleanup, segment open and WAL
/// replay.
///
/// Nothing here mutates durable state except deleting files that are
/// provably dead: `*.tmp` leftovers of interrupted writes, and segment files
/// the manifest does not list. WAL files are only removed by the caller,
/// after their replayed contents have been committed as a segment.
use comparator::SharedComparator;
use memtable::Memtable;
use sstable::{parse_segment_file_name, SSTableReader};
use std::path::Path;
use std::sync::Arc;
use wal::{parse_wal_file_name, wal_file_name, WalReader};

use crate::error::{EngineError, Result};
use crate::manifest::Manifest;

pub(crate) struct Recovered {
    pub(crate) manifest: Manifest,
    /// Live segments, highest priority first.
    pub(crate) segments: Vec<Arc<SSTableReader>>,
    /// Contents of every WAL found, replayed oldest first.
    pub(crate) replayed: Memtable,
    pub(crate) wal_ids: Vec<u64>,
    /// One past the largest id seen on disk.
    pub(crate) next_id: u64,
}

pub(crate) fn recover(dir: &Path, cmp: &SharedComparator) -> Result<Recovered> {
    let manifest =
        Manifest::load(dir).map_err(|e| EngineError::CorruptedStore(format!("{:#}", e)))?;
    let mut max_id = manifest
        .ids()
        .iter()
        .copied()
        .max()
        .unwrap_or(0)
        .max(manifest.wal_watermark());
    let mut wal_ids = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let path = entry.path();

        if name.ends_with(".tmp") {
            remove_stale(&path, "temporary file");
        } else if let Some((_, id)) = parse_segment_file_name(name) {
            max_id = max_id.max(id);
            if !manifest.contains(id) {
                remove_stale(&path, "unlisted segment file");
            }
        } else if let Some(id) = parse_wal_file_name(name) {
            max_id = max_id.max(id);
            if id <= manifest.wal_watermark() {
                remove_stale(&path, "already flushed wal");
            } else {
                wal_ids.push(id);
            }
        }
    }
    wal_ids.sort_unstable();

    let mut segments = Vec::with_capacity(manifest.ids().len());
    for &id in manifest.ids() {
        let reader = SSTableReader::open(dir, id, Arc::clone(cmp)).map_err(|e| {
            EngineError::CorruptedStore(format!("segment {} listed in manifest: {:#}", id, e))
        })?;
        segments.push(Arc::new(reader));
    }
    segments.sort_by(|a, b| b.priority().cmp(&a.priority()));

    let replayed = Memtable::with_comparator(&**cmp)?;
    for &id in &wal_ids {
        let applied = WalReader::open(dir.join(wal_file_name(id)))?.replay(|record| {
            let (key, value) = record.into_parts();
            replayed.upsert(key, value);
        })?;
        tracing::info!(wal = id, records = applied, "replayed wal");
    }

    Ok(Recovered {
        manifest,
        segments,
        replayed,
        wal_ids,
        next_id: max_id + 1,
    })
}

/// Deletes replayed WAL files once their contents are in a segment.
pub(crate) fn remove_wal_files(dir: &Path, ids: &[u64]) {
    for &id in ids {
        remove_stale(&dir.join(wal_file_name(id)), "replayed wal");
    }
}

fn remove_stale(path: &Path, what: &str) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed {}", what),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove {}", what),
    }
}
