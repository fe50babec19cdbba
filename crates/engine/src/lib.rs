//! # Engine - Tidewater Storage Engine
//!
//! The orchestrator that ties the [`memtable`], [`wal`] and [`sstable`]
//! crates into an embedded LSM key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client (any thread)
//!   |
//!   v
//! ┌────────────────────────────────────────────────────┐
//! │                     ENGINE                         │
//! │                                                    │
//! │ write.rs → WAL append → active memtable insert     │
//! │              |                                     │
//! │              |  (threshold crossed?) ──► flush     │
//! │              v                          worker     │
//! │        rotate: active → flushing,         |        │
//! │        write segment, commit manifest ◄───┘        │
//! │              |                                     │
//! │              |  (segments >= trigger?) ──► compaction
//! │              v                               worker│
//! │        merge all segments → one, retire inputs     │
//! │                                                    │
//! │ read.rs → active → flushing → segments (newest     │
//! │           first); ranges via the merge iterator    │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                  |
//! |----------------|----------------------------------------------------------|
//! | `lib.rs`       | `Engine`, open/close, stats, `Debug`, `Drop`             |
//! | [`recovery`]   | manifest load, startup cleanup, WAL replay               |
//! | [`write`]      | `upsert()`, `put()`, `delete()`, backpressure, flush     |
//! | [`read`]       | `get()`, `range()`, `scan()`                             |
//! | [`compaction`] | `compact()` with streaming merge + tombstone GC          |
//! | [`manifest`]   | durable live segment list (atomic rewrite)               |
//! | [`scheduler`]  | job slots and background workers                         |
//!
//! ## Concurrency
//!
//! One `RwLock` guards `{active, flushing, segments}`. Reads and writes take
//! it shared; the memtable is itself concurrent. Only memtable rotation and
//! the segment list swap take it exclusively, and neither does I/O while
//! holding it. Flush and compaction commits are serialized by the manifest
//! mutex, which is always taken before the state lock.
//!
//! ## Crash Safety
//!
//! Every write is logged to its generation's WAL before it reaches the
//! memtable. Segments are written to temp files and renamed into place; the
//! manifest rewrite is the commit point. A generation's WAL is only deleted
//! after its segment is in the manifest.

mod compaction;
mod error;
mod manifest;
mod read;
mod recovery;
mod scheduler;
mod state;
mod write;

use comparator::{bytewise, SharedComparator};
use config::EngineConfig;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub use error::{EngineError, Result};
pub use manifest::MANIFEST_FILENAME;
pub use read::Scan;
pub use scheduler::JobState;

use manifest::Manifest;
use scheduler::{Job, JobSlot, Triggers, Workers};
use state::{Generation, State};

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Merge priority of the active memtable. Segment priorities are ids, which
/// never get near this.
pub(crate) const ACTIVE_PRIORITY: u64 = u64::MAX;
/// Merge priority of the memtable being flushed.
pub(crate) const FLUSHING_PRIORITY: u64 = u64::MAX - 1;

/// Point-in-time counters, mostly for the CLI and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub memtable_bytes: usize,
    pub memtable_entries: usize,
    /// Whether a rotated memtable is waiting to be (re)flushed.
    pub flushing: bool,
    pub segments: usize,
    /// Entries across all live segments, tombstones included.
    pub segment_entries: u64,
    pub flush_state: JobState,
    pub compaction_state: JobState,
}

/// Everything the API and the background workers share.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) dir: PathBuf,
    pub(crate) cmp: SharedComparator,
    pub(crate) state: RwLock<State>,
    /// Commit lock. Held across the manifest rewrite and the matching state
    /// swap so the two never disagree.
    pub(crate) manifest: Mutex<Manifest>,
    pub(crate) flush_slot: JobSlot,
    pub(crate) compaction_slot: JobSlot,
    pub(crate) triggers: Triggers,
    /// Source of segment and WAL ids. Never reused.
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    pub(crate) fn schedule_flush(&self) -> bool {
        self.triggers.flush.fire(&self.flush_slot, Job::Flush)
    }

    pub(crate) fn schedule_compaction(&self) -> bool {
        self.triggers
            .compaction
            .fire(&self.compaction_slot, Job::Compaction)
    }
}

/// An embedded LSM key-value store.
///
/// All methods take `&self`; share the engine across threads with an `Arc`.
///
/// # Write Path
///
/// 1. Reject the write with [`EngineError::Backpressure`] if the active
///    memtable is over threshold while the previous one is still flushing.
/// 2. Append the record to the active generation's WAL.
/// 3. Apply it to the active memtable.
/// 4. If the memtable crossed the threshold, schedule a background flush.
///
/// # Read Path
///
/// Active memtable, then the flushing snapshot, then segments from newest to
/// oldest. The first source holding the key decides; a tombstone there
/// means "absent".
pub struct Engine {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Engine")
            .field("data_dir", &self.shared.dir)
            .field("flush_threshold", &self.shared.config.flush_threshold)
            .field("compaction_trigger", &self.shared.config.compaction_trigger)
            .field("wal", &self.shared.config.wal)
            .field("memtable_size", &stats.memtable_bytes)
            .field("memtable_entries", &stats.memtable_entries)
            .field("segments", &stats.segments)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Engine {
    /// Opens (or creates) the store in `config.data_dir`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create the data directory if it does not exist.
    /// 2. Load the manifest; delete `*.tmp` files and unlisted segment files.
    /// 3. Open every listed segment. A missing or invalid one is
    ///    [`EngineError::CorruptedStore`].
    /// 4. Replay all WAL files, oldest first, into one memtable and flush it
    ///    as a segment before serving requests. The replayed logs are then
    ///    deleted.
    /// 5. Start the flush and compaction workers.
    pub fn open(config: EngineConfig) -> Result<Self> {
        if config.flush_threshold == 0 {
            return Err(EngineError::InvalidArgument(
                "flush threshold must be greater than zero".into(),
            ));
        }
        let dir = config.data_dir.clone();
        std::fs::create_dir_all(&dir)?;

        let cmp = bytewise();
        let recovered = recovery::recover(&dir, &cmp)?;
        let next_id = AtomicU64::new(recovered.next_id);

        // The replayed generation must take a lower id than the new active
        // one: flushing it raises the WAL watermark to its id.
        let replayed_entries = recovered.replayed.len();
        let flushing = if recovered.replayed.is_empty() {
            None
        } else {
            let id = next_id.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(Generation::detached(id, recovered.replayed)))
        };
        let active = Generation::create(
            &dir,
            next_id.fetch_add(1, Ordering::SeqCst),
            &*cmp,
            config.wal,
            config.wal_sync,
        )?;

        let (triggers, receivers) = scheduler::channels();
        let shared = Arc::new(Shared {
            dir,
            cmp,
            state: RwLock::new(State {
                active: Arc::new(active),
                flushing,
                segments: recovered.segments,
            }),
            manifest: Mutex::new(recovered.manifest),
            flush_slot: JobSlot::new(),
            compaction_slot: JobSlot::new(),
            triggers,
            next_id,
            closed: AtomicBool::new(false),
            config,
        });

        if replayed_entries > 0 {
            shared.flush_now()?;
        }
        recovery::remove_wal_files(&shared.dir, &recovered.wal_ids);

        let workers = scheduler::spawn_workers(&shared, receivers)?;

        tracing::info!(
            dir = %shared.dir.display(),
            segments = shared.state.read().segments.len(),
            replayed_entries,
            "engine opened"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(Some(workers)),
        })
    }

    /// Stops background work and persists everything still in memory.
    ///
    /// 1. Refuse new operations ([`EngineError::Closed`]).
    /// 2. Let the flush worker, then the compaction worker, drain their
    ///    queues and exit.
    /// 3. Flush the remaining memtable contents on this thread.
    /// 4. Drop the engine's segment handles.
    ///
    /// Calling `close` again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let workers = self.workers.lock().take();
        // Flush first: its worker may still schedule a compaction.
        self.shared.triggers.flush.disconnect();
        let compaction = workers.map(|w| {
            join_worker(w.flush, "flush");
            w.compaction
        });
        self.shared.triggers.compaction.disconnect();
        if let Some(handle) = compaction {
            join_worker(handle, "compaction");
        }

        let result = self.shared.flush_now();
        if result.is_ok() {
            let mut state = self.shared.state.write();
            if state.active.table.is_empty() {
                state.active.discard_wal();
            }
            state.segments.clear();
        }

        match &result {
            Ok(()) => tracing::info!(dir = %self.shared.dir.display(), "engine closed"),
            Err(e) => tracing::warn!(error = %e, "engine closed with unflushed data"),
        }
        result
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn data_dir(&self) -> &Path {
        &self.shared.dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Ids of the live segments, highest priority first.
    #[must_use]
    pub fn segment_ids(&self) -> Vec<u64> {
        state::segment_ids(&self.shared.state.read().segments)
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let state = self.shared.state.read();
        EngineStats {
            memtable_bytes: state.active.table.approx_size(),
            memtable_entries: state.active.table.len(),
            flushing: state.flushing.is_some(),
            segments: state.segments.len(),
            segment_entries: state.segments.iter().map(|s| s.len() as u64).sum(),
            flush_state: self.shared.flush_slot.state(),
            compaction_state: self.shared.compaction_slot.state(),
        }
    }
}

fn join_worker(handle: std::thread::JoinHandle<()>, name: &str) {
    if handle.join().is_err() {
        tracing::warn!(worker = name, "background worker panicked");
    }
}

/// Best-effort close on drop.
///
/// Errors cannot be propagated from `Drop`; anything left unflushed is still
/// in the WAL and is recovered on the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "close on drop failed");
        }
    }
}

#[cfg(test)]
mod tests;
