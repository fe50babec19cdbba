use comparator::{bytewise, SharedComparator};
use memtable::{Entry, Memtable};
use std::path::Path;
use std::sync::Arc;

use crate::{SSTableReader, SSTableWriter};

mod merge_tests;
mod writer_tests;

pub(crate) fn cmp() -> SharedComparator {
    bytewise()
}

/// `a -> apple`, `b -> banana`, `c -> ""`, `d -> tombstone`.
pub(crate) fn sample_memtable() -> Memtable {
    let m = Memtable::new();
    m.put(b"a".to_vec(), b"apple".to_vec());
    m.put(b"b".to_vec(), b"banana".to_vec());
    m.put(b"c".to_vec(), Vec::new());
    m.delete(b"d".to_vec());
    m
}

/// Writes `entries` (already sorted) as segment `id` and opens it.
pub(crate) fn write_segment(
    dir: &Path,
    id: u64,
    priority: u64,
    entries: Vec<Entry>,
) -> anyhow::Result<Arc<SSTableReader>> {
    SSTableWriter::write_from_iterator(dir, id, priority, &*cmp(), entries.into_iter().map(Ok))?
        .ok_or_else(|| anyhow::anyhow!("no entries written"))?;
    Ok(Arc::new(SSTableReader::open(dir, id, cmp())?))
}
