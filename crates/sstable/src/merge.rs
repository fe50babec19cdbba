//! K-way merge over sorted entry streams.
//!
//! Produces entries in ascending key order under the injected comparator.
//! When the same key appears in several sources, only the entry from the
//! source with the **highest priority** is emitted (newest wins); the
//! others are consumed and discarded.
//!
//! This is the primitive behind both range scans (memtables + segments,
//! tombstones suppressed) and compaction (segments only).

use anyhow::Result;
use comparator::SharedComparator;
use memtable::Entry;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// What to do with a winning tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TombstonePolicy {
    /// Drop it. The key simply does not appear in the output.
    Suppress,
    /// Emit it as an entry with `value: None`.
    Retain,
}

/// One sorted input to a [`MergeIterator`].
///
/// `iter` must yield strictly ascending keys. Sources with equal priority
/// are tie-broken by their position in the input vector, earlier first.
pub struct Source {
    pub priority: u64,
    pub iter: Box<dyn Iterator<Item = Result<Entry>> + Send>,
}

impl Source {
    pub fn new<I>(priority: u64, iter: I) -> Self
    where
        I: Iterator<Item = Result<Entry>> + Send + 'static,
    {
        Self {
            priority,
            iter: Box::new(iter),
        }
    }

    /// Wraps an iterator that cannot fail (memtable and segment ranges).
    pub fn infallible<I>(priority: u64, iter: I) -> Self
    where
        I: Iterator<Item = Entry> + Send + 'static,
    {
        Self::new(priority, iter.map(Ok))
    }
}

/// Per-source read position.
///
/// A source is pulled only when its previous head has been consumed, so at
/// most one entry per source is buffered.
enum Cursor {
    /// Nothing buffered; the next pull decides between `Peeked` and `Exhausted`.
    Empty,
    /// The source's current head. Its key is also queued in the heap.
    Peeked(Entry),
    Exhausted,
}

/// A pending head in the merge heap.
///
/// Only the key and the source are stored; the entry itself stays in the
/// source's [`Cursor`] until it wins or is shadowed.
struct HeapItem {
    key: Vec<u8>,
    priority: u64,
    source: usize,
    cmp: SharedComparator,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the smallest key must compare greatest,
        // then the highest priority, then the lowest source index.
        self.cmp
            .compare(&other.key, &self.key)
            .then(self.priority.cmp(&other.priority))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Lazy merge of N sorted sources into one deduplicated sorted stream.
///
/// Sources are pulled one entry at a time, so memory use is proportional to
/// the number of sources, not to the data volume.
pub struct MergeIterator {
    sources: Vec<Source>,
    cursors: Vec<Cursor>,
    heap: BinaryHeap<HeapItem>,
    cmp: SharedComparator,
    policy: TombstonePolicy,
    /// Sources whose head was consumed and must be pulled before the next step.
    stale: Vec<usize>,
    failed: bool,
}

impl MergeIterator {
    pub fn new(sources: Vec<Source>, cmp: SharedComparator, policy: TombstonePolicy) -> Self {
        let cursors = sources.iter().map(|_| Cursor::Empty).collect();
        let stale = (0..sources.len()).collect();
        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            cursors,
            cmp,
            policy,
            stale,
            failed: false,
        }
    }

    /// Pulls the next entry of an `Empty` source and queues its key.
    fn fill(&mut self, source: usize) -> Result<()> {
        if !matches!(self.cursors[source], Cursor::Empty) {
            return Ok(());
        }
        match self.sources[source].iter.next() {
            Some(item) => {
                let entry = item?;
                self.heap.push(HeapItem {
                    key: entry.key.clone(),
                    priority: self.sources[source].priority,
                    source,
                    cmp: self.cmp.clone(),
                });
                self.cursors[source] = Cursor::Peeked(entry);
            }
            None => self.cursors[source] = Cursor::Exhausted,
        }
        Ok(())
    }

    /// Takes the buffered head of `source`. The source is refilled lazily,
    /// so an error from its next item surfaces on the following call.
    fn take(&mut self, source: usize) -> Option<Entry> {
        match std::mem::replace(&mut self.cursors[source], Cursor::Empty) {
            Cursor::Peeked(e) => {
                self.stale.push(source);
                Some(e)
            }
            other => {
                self.cursors[source] = other;
                None
            }
        }
    }

    fn refill(&mut self) -> Result<()> {
        while let Some(source) = self.stale.pop() {
            self.fill(source)?;
        }
        Ok(())
    }

    /// Returns the next winning entry, or `None` when all sources are
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Propagates the first error yielded by any source. The iterator is
    /// unusable afterwards.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.failed {
            return Ok(None);
        }
        match self.step() {
            Ok(e) => Ok(e),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn step(&mut self) -> Result<Option<Entry>> {
        loop {
            self.refill()?;
            let Some(top) = self.heap.pop() else {
                return Ok(None);
            };
            let winner = self.take(top.source);

            // Every other source positioned on the same key is shadowed.
            while self
                .heap
                .peek()
                .is_some_and(|p| self.cmp.compare(&p.key, &top.key) == Ordering::Equal)
            {
                if let Some(dup) = self.heap.pop() {
                    self.take(dup.source);
                }
            }

            let Some(entry) = winner else {
                continue;
            };
            if entry.is_tombstone() && self.policy == TombstonePolicy::Suppress {
                continue;
            }
            return Ok(Some(entry));
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Result<Entry>> {
        self.next_entry().transpose()
    }
}
