/// Write path: `upsert()`, `put()`, `delete()`, `flush()`, and the flush
/// pipeline that runs on the background worker.
///
/// Every write is logged to the active generation's WAL, then applied to the
/// active memtable. When the memtable crosses the flush threshold it is
/// rotated out and written to a new segment off the write path.
use sstable::{SSTableReader, SSTableWriter};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::state::{insert_by_priority, segment_ids, Generation};
use crate::{Engine, Shared, MAX_KEY_SIZE, MAX_VALUE_SIZE};

fn validate(key: &[u8], value: Option<&[u8]>) -> Result<()> {
    if key.is_empty() {
        return Err(EngineError::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(EngineError::InvalidArgument(format!(
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    if let Some(v) = value {
        if v.len() > MAX_VALUE_SIZE {
            return Err(EngineError::InvalidArgument(format!(
                "value too large: {} bytes (max {})",
                v.len(),
                MAX_VALUE_SIZE
            )));
        }
    }
    Ok(())
}

impl Engine {
    /// Inserts or replaces `key`. `None` writes a tombstone.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Backpressure`] if the active memtable is over
    ///   threshold while a flush is still pending. Nothing was written.
    /// - [`EngineError::InvalidArgument`] for an empty or oversized key or
    ///   an oversized value.
    /// - [`EngineError::Closed`] after [`close`](Engine::close).
    pub fn upsert(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        self.shared.ensure_open()?;
        validate(&key, value.as_deref())?;
        self.shared.apply(key, value)
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.upsert(key, Some(value))
    }

    /// Deletes `key` by writing a tombstone that shadows older values.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.upsert(key, None)
    }

    /// Makes everything written before this call durable in a segment.
    ///
    /// Blocks rather than returning early when a flush is already running:
    /// it waits for that flush to finish, then retries a previously failed
    /// snapshot if there is one, then flushes the active memtable. A no-op
    /// when there is nothing in memory.
    pub fn flush(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.flush_now()
    }
}

impl Shared {
    pub(crate) fn apply(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        let threshold = self.config.flush_threshold;
        let size = {
            let state = self.state.read();
            if state.flushing.is_some() && state.active.table.approx_size() >= threshold {
                drop(state);
                self.schedule_flush();
                return Err(EngineError::Backpressure { threshold });
            }
            state.active.apply(key, value)?
        };

        if size >= threshold {
            self.schedule_flush();
        }
        Ok(())
    }

    pub(crate) fn active_over_threshold(&self) -> bool {
        self.state.read().active.table.approx_size() >= self.config.flush_threshold
    }

    /// Synchronous flush on the caller's thread, holding the flush slot.
    pub(crate) fn flush_now(&self) -> Result<()> {
        self.flush_slot.begin_wait();
        let result = self.flush_pending_and_active();
        self.flush_slot.finish(result.is_ok());
        result
    }

    fn flush_pending_and_active(&self) -> Result<()> {
        if self.state.read().flushing.is_some() {
            self.run_flush()?;
        }
        self.run_flush()?;
        Ok(())
    }

    /// Worker entry point. The slot was claimed by the trigger.
    pub(crate) fn background_flush(&self) {
        let result = self.run_flush();
        self.flush_slot.finish(result.is_ok());
        match result {
            Ok(_) => {
                // Writers may have filled the new table while we were busy.
                if self.active_over_threshold() {
                    self.schedule_flush();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "background flush failed; snapshot kept for retry")
            }
        }
    }

    /// One pass of the flush pipeline. Returns `false` if there was nothing
    /// to flush. The caller must hold the flush slot.
    ///
    /// # Steps
    ///
    /// 1. Pick the snapshot: a previously failed one if present, otherwise
    ///    rotate the active memtable (and its WAL) out under the write lock.
    /// 2. Write it as a new segment whose priority is its fresh id.
    /// 3. Under the manifest lock: save the manifest with the new segment,
    ///    then publish it in the state and clear `flushing`.
    ///    The manifest also records the snapshot's generation id, so its WAL
    ///    is never replayed again even if deleting it fails.
    /// 4. Delete the snapshot's WAL and maybe schedule a compaction.
    ///
    /// Any error before step 3 completes leaves the snapshot in `flushing`,
    /// still visible to reads and still backed by its WAL.
    pub(crate) fn run_flush(&self) -> Result<bool> {
        let pending = self.state.read().flushing.clone();
        let generation = match pending {
            Some(g) => {
                tracing::debug!(generation = g.id, "flushing pending snapshot");
                g
            }
            None => {
                if self.state.read().active.table.is_empty() {
                    return Ok(false);
                }
                let fresh = Arc::new(Generation::create(
                    &self.dir,
                    self.next_id(),
                    &*self.cmp,
                    self.config.wal,
                    self.config.wal_sync,
                )?);
                let mut state = self.state.write();
                let old = std::mem::replace(&mut state.active, fresh);
                state.flushing = Some(Arc::clone(&old));
                old
            }
        };

        let id = self.next_id();
        let meta = SSTableWriter::write_from_memtable(
            &self.dir,
            id,
            id,
            &generation.table,
            &*self.cmp,
        )?;
        let segment = match SSTableReader::open(&self.dir, id, Arc::clone(&self.cmp)) {
            Ok(reader) => Arc::new(reader),
            Err(e) => {
                SSTableWriter::discard(&self.dir, id);
                return Err(e.into());
            }
        };

        let live = {
            let mut manifest = self.manifest.lock();
            let mut segments = self.state.read().segments.clone();
            insert_by_priority(&mut segments, Arc::clone(&segment));
            let watermark = manifest.wal_watermark().max(generation.id);
            if let Err(e) = manifest.save(segment_ids(&segments), watermark) {
                segment.retire();
                return Err(e.into());
            }
            let mut state = self.state.write();
            state.segments = segments;
            state.flushing = None;
            state.segments.len()
        };

        generation.discard_wal();
        tracing::info!(
            segment = id,
            generation = generation.id,
            entries = meta.entry_count,
            tombstones = meta.tombstones,
            bytes = meta.data_len,
            live,
            "flush committed"
        );

        let trigger = self.config.compaction_trigger;
        if trigger > 0 && live >= trigger {
            self.schedule_compaction();
        }
        Ok(true)
    }
}
