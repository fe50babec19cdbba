use super::*;
use crate::{MergeIterator, Source, TombstonePolicy};
use anyhow::Result;
use tempfile::tempdir;

fn vec_source(priority: u64, entries: Vec<Entry>) -> Source {
    Source::infallible(priority, entries.into_iter())
}

fn merge(sources: Vec<Source>, policy: TombstonePolicy) -> Result<Vec<Entry>> {
    MergeIterator::new(sources, cmp(), policy).collect()
}

// -------------------- Ordering and shadowing --------------------

#[test]
fn merges_disjoint_sources_in_order() -> Result<()> {
    let out = merge(
        vec![
            vec_source(1, vec![Entry::put("a", "1"), Entry::put("d", "4")]),
            vec_source(2, vec![Entry::put("b", "2"), Entry::put("e", "5")]),
            vec_source(3, vec![Entry::put("c", "3")]),
        ],
        TombstonePolicy::Retain,
    )?;
    let keys: Vec<Vec<u8>> = out.into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);
    Ok(())
}

#[test]
fn highest_priority_wins() -> Result<()> {
    let out = merge(
        vec![
            vec_source(1, vec![Entry::put("k", "old")]),
            vec_source(5, vec![Entry::put("k", "new")]),
            vec_source(3, vec![Entry::put("k", "mid")]),
        ],
        TombstonePolicy::Retain,
    )?;
    assert_eq!(out, vec![Entry::put("k", "new")]);
    Ok(())
}

#[test]
fn equal_priority_prefers_earlier_source() -> Result<()> {
    let out = merge(
        vec![
            vec_source(1, vec![Entry::put("k", "first")]),
            vec_source(1, vec![Entry::put("k", "second")]),
        ],
        TombstonePolicy::Retain,
    )?;
    assert_eq!(out, vec![Entry::put("k", "first")]);
    Ok(())
}

#[test]
fn newer_tombstone_shadows_older_value() -> Result<()> {
    let sources = || {
        vec![
            vec_source(1, vec![Entry::put("a", "1"), Entry::put("b", "2")]),
            vec_source(2, vec![Entry::tombstone("a")]),
        ]
    };

    assert_eq!(
        merge(sources(), TombstonePolicy::Suppress)?,
        vec![Entry::put("b", "2")]
    );
    assert_eq!(
        merge(sources(), TombstonePolicy::Retain)?,
        vec![Entry::tombstone("a"), Entry::put("b", "2")]
    );
    Ok(())
}

#[test]
fn newer_value_resurrects_over_older_tombstone() -> Result<()> {
    let out = merge(
        vec![
            vec_source(1, vec![Entry::tombstone("a")]),
            vec_source(2, vec![Entry::put("a", "back")]),
        ],
        TombstonePolicy::Suppress,
    )?;
    assert_eq!(out, vec![Entry::put("a", "back")]);
    Ok(())
}

#[test]
fn empty_sources() -> Result<()> {
    assert!(merge(Vec::new(), TombstonePolicy::Suppress)?.is_empty());
    assert!(merge(
        vec![vec_source(1, Vec::new()), vec_source(2, Vec::new())],
        TombstonePolicy::Retain
    )?
    .is_empty());
    Ok(())
}

#[test]
fn all_tombstones_suppressed_yields_nothing() -> Result<()> {
    let out = merge(
        vec![vec_source(1, vec![Entry::tombstone("a"), Entry::tombstone("b")])],
        TombstonePolicy::Suppress,
    )?;
    assert!(out.is_empty());
    Ok(())
}

// -------------------- Errors --------------------

#[test]
fn source_error_is_propagated_once() {
    let failing = Source::new(
        1,
        vec![Ok(Entry::put("a", "1")), Err(anyhow::anyhow!("disk on fire"))].into_iter(),
    );
    let mut it = MergeIterator::new(
        vec![failing, vec_source(2, vec![Entry::put("b", "2")])],
        cmp(),
        TombstonePolicy::Retain,
    );
    assert_eq!(it.next().unwrap().unwrap(), Entry::put("a", "1"));
    let err = it.next().unwrap().unwrap_err();
    assert!(err.to_string().contains("disk on fire"));
    assert!(it.next().is_none());
}

// -------------------- Over segments --------------------

#[test]
fn merges_segments_and_memtable() -> Result<()> {
    let dir = tempdir()?;
    let old = write_segment(
        dir.path(),
        1,
        1,
        vec![Entry::put("a", "a1"), Entry::put("b", "b1"), Entry::put("c", "c1")],
    )?;
    let new = write_segment(
        dir.path(),
        2,
        2,
        vec![Entry::tombstone("b"), Entry::put("d", "d2")],
    )?;
    let mem = Arc::new(Memtable::new());
    mem.put(b"c".to_vec(), b"c-mem".to_vec());

    let sources = vec![
        Source::infallible(u64::MAX, mem.range(None, None)),
        Source::infallible(new.priority(), new.range(None, None)),
        Source::infallible(old.priority(), old.range(None, None)),
    ];
    let out = merge(sources, TombstonePolicy::Suppress)?;
    assert_eq!(
        out,
        vec![
            Entry::put("a", "a1"),
            Entry::put("c", "c-mem"),
            Entry::put("d", "d2"),
        ]
    );
    Ok(())
}

#[test]
fn merge_output_feeds_writer() -> Result<()> {
    let dir = tempdir()?;
    let a = write_segment(dir.path(), 1, 1, vec![Entry::put("k1", "v1"), Entry::put("k2", "v2")])?;
    let b = write_segment(dir.path(), 2, 2, vec![Entry::tombstone("k1"), Entry::put("k2", "v2b")])?;
    let it = MergeIterator::new(
        vec![
            Source::infallible(b.priority(), b.range(None, None)),
            Source::infallible(a.priority(), a.range(None, None)),
        ],
        cmp(),
        TombstonePolicy::Suppress,
    );
    let meta = SSTableWriter::write_from_iterator(dir.path(), 3, 1, &*cmp(), it)?
        .expect("one live key survives");
    assert_eq!(meta.entry_count, 1);
    assert_eq!(meta.tombstones, 0);

    let merged = SSTableReader::open(dir.path(), 3, cmp())?;
    assert_eq!(merged.get(b"k2"), Some(Entry::put("k2", "v2b")));
    assert_eq!(merged.get(b"k1"), None);
    Ok(())
}

#[test]
fn large_interleaved_merge_is_sorted_and_unique() -> Result<()> {
    let mut sources = Vec::new();
    for s in 0..5u64 {
        let entries: Vec<Entry> = (0..400u32)
            .filter(|i| u64::from(*i) % (s + 1) == 0)
            .map(|i| Entry::put(format!("{:05}", i), format!("s{}", s)))
            .collect();
        sources.push(vec_source(s, entries));
    }
    let out = merge(sources, TombstonePolicy::Retain)?;
    assert_eq!(out.len(), 400);
    assert!(out.windows(2).all(|w| w[0].key < w[1].key));
    // key 00012 is in sources 0,1,2,3 -> priority 3 wins
    let e = out.iter().find(|e| e.key == b"00012").unwrap();
    assert_eq!(e.value.as_deref(), Some(&b"s3"[..]));
    Ok(())
}
