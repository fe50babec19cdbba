//! # Memtable
//!
//! The mutable, sorted in-memory buffer that absorbs every write before it is
//! flushed to an SSTable.
//!
//! The table is backed by a lock-free skip list, so inserts and lookups from
//! many threads need no external lock. Keys are ordered by `Vec<u8>`'s `Ord`,
//! which is exactly the unsigned byte-wise order of
//! [`comparator::Bytewise`](../comparator/struct.Bytewise.html). Callers that
//! hold an injected comparator build the table with
//! [`Memtable::with_comparator`], which refuses any other ordering.
//!
//! A running byte counter (`Σ key + value`) is kept alongside the entries. It
//! only drives the flush trigger, so it is allowed to drift slightly when
//! writers race on the same key.

use comparator::{Bytewise, KeyComparator};
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Bytes charged for a tombstone in place of a value.
///
/// Deletes must grow the table so that a delete-only workload still flushes.
pub const TOMBSTONE_SIZE: usize = 8;

/// A key together with its value, or a tombstone.
///
/// `value == None` marks a logical deletion. An empty value (`Some(vec![])`)
/// is a live value and is never confused with a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl Entry {
    /// A live key/value pair.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A deletion marker for `key`.
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Bytes this entry contributes to a memtable's size counter.
    #[must_use]
    pub fn charged_size(&self) -> usize {
        charged_size(&self.key, self.value.as_deref())
    }
}

fn charged_size(key: &[u8], value: Option<&[u8]>) -> usize {
    key.len() + value.map_or(TOMBSTONE_SIZE, <[u8]>::len)
}

/// The comparator handed to [`Memtable::with_comparator`] is not the
/// byte-wise order the skip list sorts by.
#[derive(Debug, Error)]
#[error("memtable requires the bytewise comparator, got {0:?}")]
pub struct UnsupportedComparator(pub &'static str);

/// Concurrent sorted map of `key -> value | tombstone`.
#[derive(Debug, Default)]
pub struct Memtable {
    map: SkipMap<Vec<u8>, Option<Vec<u8>>>,
    approx_size: AtomicUsize,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty table ordered by `cmp`.
    ///
    /// # Errors
    ///
    /// [`UnsupportedComparator`] unless `cmp` is the byte-wise order.
    pub fn with_comparator(cmp: &dyn KeyComparator) -> Result<Self, UnsupportedComparator> {
        if cmp.name() != Bytewise.name() {
            return Err(UnsupportedComparator(cmp.name()));
        }
        Ok(Self::new())
    }

    /// Inserts or replaces the entry for `key`. `None` writes a tombstone.
    ///
    /// Returns the table's approximate size after the write.
    pub fn upsert(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> usize {
        let added = charged_size(&key, value.as_deref());
        let removed = self
            .map
            .get(key.as_slice())
            .map(|e| charged_size(e.key(), e.value().as_deref()))
            .unwrap_or(0);

        self.map.insert(key, value);

        let prev = self
            .approx_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some(s.saturating_add(added).saturating_sub(removed))
            })
            .unwrap_or_else(|s| s);
        prev.saturating_add(added).saturating_sub(removed)
    }

    /// Inserts a live value.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> usize {
        self.upsert(key, Some(value))
    }

    /// Inserts a tombstone.
    pub fn delete(&self, key: Vec<u8>) -> usize {
        self.upsert(key, None)
    }

    /// Returns the stored entry for `key`, tombstones included.
    ///
    /// The caller decides whether a tombstone is visible.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.map.get(key).map(|e| Entry {
            key: e.key().clone(),
            value: e.value().clone(),
        })
    }

    /// Lazily iterates the half-open range `[from, to)`.
    ///
    /// `None` leaves that side unbounded. The iterator keeps the table alive
    /// through its own `Arc` and re-seeks the skip list on every step, so it
    /// observes a consistent order even while other threads insert.
    pub fn range(self: &Arc<Self>, from: Option<&[u8]>, to: Option<&[u8]>) -> MemtableRange {
        MemtableRange {
            table: Arc::clone(self),
            next: match from {
                Some(k) => Bound::Included(k.to_vec()),
                None => Bound::Unbounded,
            },
            end: to.map(<[u8]>::to_vec),
            done: false,
        }
    }

    /// Ordered iterator over all entries, borrowing the table.
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        self.map.iter().map(|e| Entry {
            key: e.key().clone(),
            value: e.value().clone(),
        })
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size.load(Ordering::Acquire)
    }
}

/// Owning iterator returned by [`Memtable::range`].
pub struct MemtableRange {
    table: Arc<Memtable>,
    next: Bound<Vec<u8>>,
    end: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for MemtableRange {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if self.done {
            return None;
        }

        let found = match &self.next {
            Bound::Included(k) => self.table.map.lower_bound(Bound::Included(k.as_slice())),
            Bound::Excluded(k) => self.table.map.lower_bound(Bound::Excluded(k.as_slice())),
            Bound::Unbounded => self.table.map.front(),
        };

        let Some(e) = found else {
            self.done = true;
            return None;
        };

        if let Some(end) = &self.end {
            if e.key().as_slice() >= end.as_slice() {
                self.done = true;
                return None;
            }
        }

        self.next = Bound::Excluded(e.key().clone());
        Some(Entry {
            key: e.key().clone(),
            value: e.value().clone(),
        })
    }
}
