/// Compaction: merges every live segment into one, dropping tombstones and
/// shadowed versions.
///
/// ## Algorithm
///
/// 1. Snapshot the live segment list.
/// 2. Stream all of them through a [`MergeIterator`] with tombstones
///    suppressed. Nothing is materialized; entries go straight to the
///    writer.
/// 3. Write the survivors as one segment with a fresh id and
///    `priority = min(priority of the inputs)`. Segments flushed while the
///    merge ran have higher priorities and keep winning over it.
/// 4. Under the manifest lock: replace the input ids with the output id in
///    one manifest rewrite, then swap the state's segment list.
/// 5. Retire the inputs. Their files are deleted when the last scan or
///    lookup holding them lets go.
///
/// Dropping tombstones is safe because the inputs are the *entire* live set
/// at snapshot time: there is no older segment left for a tombstone to
/// shadow.
use sstable::{MergeIterator, SSTableReader, SSTableWriter, Source, TombstonePolicy};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::state::{insert_by_priority, segment_ids};
use crate::{Engine, Shared};

impl Engine {
    /// Runs a compaction on the calling thread.
    ///
    /// Blocks while a background compaction is running, then compacts
    /// whatever is live at that point. A no-op when there are no segments, or
    /// a single segment that holds no tombstones.
    pub fn compact(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.compaction_slot.begin_wait();
        let result = self.shared.run_compaction();
        self.shared.compaction_slot.finish(result.is_ok());
        result.map(|_| ())
    }
}

impl Shared {
    pub(crate) fn background_compaction(&self) {
        let result = self.run_compaction();
        self.compaction_slot.finish(result.is_ok());
        if let Err(e) = result {
            tracing::warn!(error = %e, "background compaction failed; inputs remain live");
        }
    }

    /// One compaction pass. Returns `false` for the no-op cases. The caller
    /// must hold the compaction slot.
    pub(crate) fn run_compaction(&self) -> Result<bool> {
        let inputs = self.state.read().segments.clone();
        if inputs.is_empty() || (inputs.len() == 1 && inputs[0].tombstones() == 0) {
            tracing::debug!(segments = inputs.len(), "nothing to compact");
            return Ok(false);
        }

        let priority = inputs.iter().map(|s| s.priority()).min().unwrap_or(0);
        let id = self.next_id();

        let sources = inputs
            .iter()
            .map(|s| Source::infallible(s.priority(), s.range(None, None)))
            .collect();
        let merged = MergeIterator::new(sources, Arc::clone(&self.cmp), TombstonePolicy::Suppress);
        let meta = SSTableWriter::write_from_iterator(&self.dir, id, priority, &*self.cmp, merged)?;
        let output = match meta {
            Some(_) => match SSTableReader::open(&self.dir, id, Arc::clone(&self.cmp)) {
                Ok(reader) => Some(Arc::new(reader)),
                Err(e) => {
                    SSTableWriter::discard(&self.dir, id);
                    return Err(e.into());
                }
            },
            None => None,
        };

        let input_ids: HashSet<u64> = inputs.iter().map(|s| s.id()).collect();
        let live = {
            let mut manifest = self.manifest.lock();
            let mut segments: Vec<Arc<SSTableReader>> = self
                .state
                .read()
                .segments
                .iter()
                .filter(|s| !input_ids.contains(&s.id()))
                .cloned()
                .collect();
            if let Some(out) = &output {
                insert_by_priority(&mut segments, Arc::clone(out));
            }
            let watermark = manifest.wal_watermark();
            if let Err(e) = manifest.save(segment_ids(&segments), watermark) {
                if let Some(out) = &output {
                    out.retire();
                }
                return Err(e.into());
            }
            let mut state = self.state.write();
            state.segments = segments;
            state.segments.len()
        };

        for segment in &inputs {
            segment.retire();
        }

        tracing::info!(
            inputs = inputs.len(),
            output = ?output.as_ref().map(|s| s.id()),
            entries = meta.map_or(0, |m| m.entry_count),
            priority,
            live,
            "compaction committed"
        );
        Ok(true)
    }
}
