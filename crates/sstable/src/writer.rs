use anyhow::{bail, Context, Result};
use comparator::KeyComparator;
use crc32fast::Hasher as Crc32;
use memtable::{Entry, Memtable};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::format::{data_file_name, index_file_name, Footer, IndexRecord};

/// Summary of a segment that was just written and renamed into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMeta {
    pub id: u64,
    pub priority: u64,
    pub entry_count: u64,
    pub tombstones: u64,
    pub data_len: u64,
}

/// Writes sorted entries to disk as an immutable `data_N` / `index_N` pair.
///
/// The writer is stateless. Both files are first written as `*.tmp`
/// siblings, fsynced, and only then renamed into place; the parent directory
/// is fsynced afterwards so the renames survive a crash. Nothing here touches
/// the manifest: a segment is not part of the database until the caller
/// records it there.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Flushes `mem` to a new segment in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the memtable is empty (writing an empty segment is
    /// not useful and likely indicates a logic bug) or on any I/O failure.
    pub fn write_from_memtable(
        dir: &Path,
        id: u64,
        priority: u64,
        mem: &Memtable,
        cmp: &dyn KeyComparator,
    ) -> Result<TableMeta> {
        if mem.is_empty() {
            bail!("refusing to write an empty SSTable (empty memtable)");
        }
        Self::write_from_iterator(dir, id, priority, cmp, mem.iter().map(Ok))?
            .context("memtable produced no entries while being written")
    }

    /// Streams entries into a new segment.
    ///
    /// This is the compaction entry point: entries are consumed one at a time
    /// and never materialized, so memory use is independent of data volume.
    /// `iter` must yield keys in strictly ascending order under `cmp`.
    ///
    /// Returns `Ok(None)` when the iterator yields nothing; no files are left
    /// behind in that case.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, on an error item from `iter`, on an empty key, or
    /// if keys are not strictly ascending. Temporary files are removed before
    /// the error is returned.
    pub fn write_from_iterator<I>(
        dir: &Path,
        id: u64,
        priority: u64,
        cmp: &dyn KeyComparator,
        iter: I,
    ) -> Result<Option<TableMeta>>
    where
        I: Iterator<Item = Result<Entry>>,
    {
        let data_path = dir.join(data_file_name(id));
        let index_path = dir.join(index_file_name(id));
        let data_tmp = tmp_path(&data_path);
        let index_tmp = tmp_path(&index_path);

        let footer = match Self::write_tmp(&data_tmp, &index_tmp, priority, cmp, iter) {
            Ok(Some(footer)) => footer,
            Ok(None) => {
                remove_quietly(&data_tmp);
                remove_quietly(&index_tmp);
                return Ok(None);
            }
            Err(e) => {
                remove_quietly(&data_tmp);
                remove_quietly(&index_tmp);
                return Err(e);
            }
        };

        // Data first: an index without its data is never valid to open.
        fs::rename(&data_tmp, &data_path)
            .with_context(|| format!("failed to publish {}", data_path.display()))?;
        if let Err(e) = fs::rename(&index_tmp, &index_path) {
            remove_quietly(&data_path);
            remove_quietly(&index_tmp);
            return Err(e).with_context(|| format!("failed to publish {}", index_path.display()));
        }
        sync_dir(dir);

        Ok(Some(TableMeta {
            id,
            priority,
            entry_count: footer.entry_count,
            tombstones: footer.tombstones,
            data_len: footer.data_len,
        }))
    }

    /// Deletes the published `data_N` / `index_N` pair of a segment that
    /// never made it into the manifest, e.g. one that failed to open right
    /// after being written.
    pub fn discard(dir: &Path, id: u64) {
        remove_quietly(&dir.join(data_file_name(id)));
        remove_quietly(&dir.join(index_file_name(id)));
    }

    fn write_tmp<I>(
        data_tmp: &Path,
        index_tmp: &Path,
        priority: u64,
        cmp: &dyn KeyComparator,
        iter: I,
    ) -> Result<Option<Footer>>
    where
        I: Iterator<Item = Result<Entry>>,
    {
        let mut data = BufWriter::new(create_truncated(data_tmp)?);
        let mut index = BufWriter::new(create_truncated(index_tmp)?);

        let mut crc = Crc32::new();
        let mut offset: u64 = 0;
        let mut entry_count: u64 = 0;
        let mut tombstones: u64 = 0;
        let mut prev_key: Option<Vec<u8>> = None;

        for item in iter {
            let entry = item?;
            if entry.key.is_empty() {
                bail!("refusing to write an empty key");
            }
            if let Some(prev) = &prev_key {
                if cmp.compare(prev, &entry.key) != std::cmp::Ordering::Less {
                    bail!(
                        "keys out of order under {} comparator at entry {}",
                        cmp.name(),
                        entry_count
                    );
                }
            }

            let key_offset = offset;
            data.write_all(&entry.key)?;
            crc.update(&entry.key);
            offset += entry.key.len() as u64;

            let record = match &entry.value {
                Some(v) => {
                    let record = IndexRecord::live(key_offset, offset);
                    data.write_all(v)?;
                    crc.update(v);
                    offset += v.len() as u64;
                    record
                }
                None => {
                    tombstones += 1;
                    IndexRecord::tombstone(key_offset, offset)
                }
            };
            record.write_to(&mut index)?;

            entry_count += 1;
            prev_key = Some(entry.key);
        }

        if entry_count == 0 {
            return Ok(None);
        }

        let footer = Footer {
            entry_count,
            data_len: offset,
            tombstones,
            priority,
            data_crc: crc.finalize(),
        };
        footer.write_to(&mut index)?;

        data.flush()?;
        data.into_inner()?.sync_all()?;
        index.flush()?;
        index.into_inner()?.sync_all()?;

        Ok(Some(footer))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn create_truncated(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove segment file");
        }
    }
}

/// Fsyncs `dir` so renames inside it are durable. Best effort: some
/// platforms cannot open a directory for syncing.
pub(crate) fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}
