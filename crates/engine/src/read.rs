/// Read path: `get()`, `range()` and `scan()`.
///
/// Reads take a snapshot of the state (cheap `Arc` clones) and release the
/// lock before touching any data, so they never block a rotation or a
/// segment swap for longer than the clone.
use memtable::Entry;
use sstable::{MergeIterator, Source, TombstonePolicy};

use crate::error::{EngineError, Result};
use crate::{Engine, ACTIVE_PRIORITY, FLUSHING_PRIORITY};

impl Engine {
    /// Point lookup.
    ///
    /// Sources are consulted newest first: active memtable, flushing
    /// snapshot, then segments by descending priority. The first one that
    /// holds `key` decides; a tombstone there means `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.shared.ensure_open()?;
        let view = self.shared.state.read().view();

        if let Some(e) = view.active.get(key) {
            return Ok(e.value);
        }
        if let Some(flushing) = &view.flushing {
            if let Some(e) = flushing.get(key) {
                return Ok(e.value);
            }
        }
        for segment in &view.segments {
            if !segment.might_contain(key) {
                continue;
            }
            if let Some(e) = segment.get(key) {
                return Ok(e.value);
            }
        }
        Ok(None)
    }

    /// Lazily iterates live keys in `[from, to)`, in ascending order.
    ///
    /// `None` leaves that side unbounded. Tombstones are suppressed. The
    /// returned [`Scan`] holds its own handles on every source, so it stays
    /// valid across flushes and compactions that happen while it is open.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<Scan> {
        self.shared.ensure_open()?;
        let view = self.shared.state.read().view();

        let mut sources = Vec::with_capacity(view.segments.len() + 2);
        sources.push(Source::infallible(ACTIVE_PRIORITY, view.active.range(from, to)));
        if let Some(flushing) = &view.flushing {
            sources.push(Source::infallible(FLUSHING_PRIORITY, flushing.range(from, to)));
        }
        for segment in &view.segments {
            sources.push(Source::infallible(segment.priority(), segment.range(from, to)));
        }

        Ok(Scan {
            inner: MergeIterator::new(
                sources,
                std::sync::Arc::clone(&self.shared.cmp),
                TombstonePolicy::Suppress,
            ),
        })
    }

    /// Collects [`range`](Engine::range) into a `Vec`.
    pub fn scan(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.range(from, to)?.collect()
    }
}

/// Iterator returned by [`Engine::range`].
pub struct Scan {
    inner: MergeIterator,
}

impl Iterator for Scan {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        for item in self.inner.by_ref() {
            match item {
                Ok(Entry {
                    key,
                    value: Some(value),
                }) => return Some(Ok((key, value))),
                Ok(_) => {}
                Err(e) => return Some(Err(EngineError::Storage(e))),
            }
        }
        None
    }
}
