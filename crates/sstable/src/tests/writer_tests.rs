use super::*;
use crate::format::{Footer, IndexRecord, FOOTER_BYTES, INDEX_RECORD_BYTES};
use crate::{data_file_name, index_file_name, TOMBSTONE_FLAG};
use anyhow::Result;
use tempfile::tempdir;

fn dir_names(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    names.sort();
    Ok(names)
}

// -------------------- Empty input --------------------

#[test]
fn write_empty_memtable_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mem = Memtable::new();
    let err = SSTableWriter::write_from_memtable(dir.path(), 1, 1, &mem, &*cmp()).unwrap_err();
    assert!(err.to_string().contains("empty"));
    assert!(dir_names(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn empty_iterator_writes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let meta = SSTableWriter::write_from_iterator(dir.path(), 7, 7, &*cmp(), std::iter::empty())?;
    assert!(meta.is_none());
    assert!(dir_names(dir.path())?.is_empty(), "no temporary files left behind");
    Ok(())
}

// -------------------- Layout --------------------

#[test]
fn writes_data_and_index_pair() -> Result<()> {
    let dir = tempdir()?;
    let mem = sample_memtable();
    let meta = SSTableWriter::write_from_memtable(dir.path(), 42, 9, &mem, &*cmp())?;

    assert_eq!(meta.id, 42);
    assert_eq!(meta.priority, 9);
    assert_eq!(meta.entry_count, 4);
    assert_eq!(meta.tombstones, 1);
    assert_eq!(
        dir_names(dir.path())?,
        vec![data_file_name(42), index_file_name(42)]
    );
    assert_eq!(data_file_name(42), "data_00000000000000000042");
    Ok(())
}

#[test]
fn data_file_is_raw_concatenation() -> Result<()> {
    let dir = tempdir()?;
    let mem = sample_memtable();
    SSTableWriter::write_from_memtable(dir.path(), 1, 1, &mem, &*cmp())?;

    let data = std::fs::read(dir.path().join(data_file_name(1)))?;
    assert_eq!(data, b"aapplebbananacd".to_vec());
    Ok(())
}

#[test]
fn index_records_and_footer() -> Result<()> {
    let dir = tempdir()?;
    let mem = sample_memtable();
    SSTableWriter::write_from_memtable(dir.path(), 1, 5, &mem, &*cmp())?;

    let index = std::fs::read(dir.path().join(index_file_name(1)))?;
    assert_eq!(index.len(), 4 * INDEX_RECORD_BYTES + FOOTER_BYTES);

    let rec = |i: usize| IndexRecord::decode(&index[i * INDEX_RECORD_BYTES..]).unwrap();
    // a|apple
    assert_eq!(rec(0), IndexRecord::live(0, 1));
    // b|banana
    assert_eq!(rec(1), IndexRecord::live(6, 7));
    // c|"" : empty value is live, value range is empty
    assert_eq!(rec(2), IndexRecord::live(13, 14));
    // d : tombstone, high bit set
    assert_eq!(rec(3).value_offset, 15 | TOMBSTONE_FLAG);
    assert!(rec(3).is_tombstone());
    assert_eq!(rec(3).value_start(), 15);

    let footer = Footer::decode(&index)?;
    assert_eq!(footer.entry_count, 4);
    assert_eq!(footer.data_len, 15);
    assert_eq!(footer.tombstones, 1);
    assert_eq!(footer.priority, 5);
    assert_eq!(footer.data_crc, crc32fast::hash(b"aapplebbananacd"));
    Ok(())
}

// -------------------- Validation --------------------

#[test]
fn out_of_order_keys_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let entries = vec![Ok(Entry::put("b", "1")), Ok(Entry::put("a", "2"))];
    let err = SSTableWriter::write_from_iterator(dir.path(), 1, 1, &*cmp(), entries.into_iter())
        .unwrap_err();
    assert!(err.to_string().contains("out of order"));
    assert!(dir_names(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn duplicate_keys_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let entries = vec![Ok(Entry::put("a", "1")), Ok(Entry::put("a", "2"))];
    assert!(
        SSTableWriter::write_from_iterator(dir.path(), 1, 1, &*cmp(), entries.into_iter()).is_err()
    );
    Ok(())
}

#[test]
fn empty_key_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let entries = vec![Ok(Entry::put("", "1"))];
    assert!(
        SSTableWriter::write_from_iterator(dir.path(), 1, 1, &*cmp(), entries.into_iter()).is_err()
    );
    assert!(dir_names(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn source_error_aborts_and_cleans_up() -> Result<()> {
    let dir = tempdir()?;
    let entries = vec![Ok(Entry::put("a", "1")), Err(anyhow::anyhow!("boom"))];
    let err = SSTableWriter::write_from_iterator(dir.path(), 3, 3, &*cmp(), entries.into_iter())
        .unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert!(dir_names(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn discard_removes_published_pair() -> Result<()> {
    let dir = tempdir()?;
    let mem = sample_memtable();
    SSTableWriter::write_from_memtable(dir.path(), 4, 4, &mem, &*cmp())?;
    SSTableWriter::write_from_memtable(dir.path(), 5, 5, &mem, &*cmp())?;

    SSTableWriter::discard(dir.path(), 4);
    assert_eq!(
        dir_names(dir.path())?,
        vec![data_file_name(5), index_file_name(5)]
    );

    // Nothing left to remove: still fine.
    SSTableWriter::discard(dir.path(), 4);
    assert!(SSTableReader::open(dir.path(), 5, cmp()).is_ok());
    Ok(())
}

#[test]
fn overwrites_stale_tmp_files() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("data_00000000000000000001.tmp"), b"garbage")?;
    let mem = sample_memtable();
    SSTableWriter::write_from_memtable(dir.path(), 1, 1, &mem, &*cmp())?;
    let reader = SSTableReader::open(dir.path(), 1, cmp())?;
    assert_eq!(reader.len(), 4);
    Ok(())
}

// -------------------- Large --------------------

#[test]
fn many_entries_round_trip_through_reader() -> Result<()> {
    let dir = tempdir()?;
    let mem = Memtable::new();
    for i in 0..5_000u32 {
        let key = format!("key{:06}", i).into_bytes();
        if i % 7 == 0 {
            mem.delete(key);
        } else {
            mem.put(key, format!("value{}", i).into_bytes());
        }
    }
    let meta = SSTableWriter::write_from_memtable(dir.path(), 1, 1, &mem, &*cmp())?;
    assert_eq!(meta.entry_count, 5_000);
    assert_eq!(meta.tombstones, (0..5_000u32).filter(|i| i % 7 == 0).count() as u64);

    let reader = SSTableReader::open(dir.path(), 1, cmp())?;
    assert_eq!(reader.get(b"key000007"), Some(Entry::tombstone("key000007")));
    assert_eq!(reader.get(b"key004999"), Some(Entry::put("key004999", "value4999")));
    Ok(())
}
