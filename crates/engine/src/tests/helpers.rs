use crate::{Engine, EngineError};
use config::EngineConfig;
use sstable::data_file_name;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

/// WAL on, no fsync, large memtable and no automatic compaction, so tests
/// decide exactly when segments appear.
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig::builder()
        .data_dir(dir)
        .flush_threshold(1024 * 1024)
        .compaction_trigger(0)
        .wal(true)
        .wal_sync(false)
        .build()
}

pub fn open(dir: &Path) -> crate::Result<Engine> {
    Engine::open(test_config(dir))
}

/// Puts, flushing synchronously whenever the engine pushes back.
pub fn put_retry(engine: &Engine, key: &[u8], value: &[u8]) -> crate::Result<()> {
    loop {
        match engine.put(key.to_vec(), value.to_vec()) {
            Err(EngineError::Backpressure { .. }) => engine.flush()?,
            other => return other,
        }
    }
}

pub fn kv(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
    (k.as_bytes().to_vec(), v.as_bytes().to_vec())
}

/// Number of files in `dir` whose name starts with `prefix`.
pub fn count_files(dir: &Path, prefix: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with(prefix) && !n.ends_with(".tmp"))
                .unwrap_or(false)
        })
        .count()
}

/// Polls `cond` until it holds or five seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Puts a directory where the next few segments' `data_N.tmp` files would
/// go, so any segment write fails until [`unblock_segment_writes`].
pub fn block_segment_writes(engine: &Engine, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let next = engine.shared.next_id.load(Ordering::SeqCst);
    let mut blocked = Vec::new();
    for id in next..next + 4 {
        let path = dir.join(format!("{}.tmp", data_file_name(id)));
        fs::create_dir(&path)?;
        blocked.push(path);
    }
    Ok(blocked)
}

pub fn unblock_segment_writes(blocked: &[PathBuf]) -> std::io::Result<()> {
    for path in blocked {
        fs::remove_dir(path)?;
    }
    Ok(())
}

/// Names in `dir` ending in `.tmp`.
pub fn tmp_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_owned))
        .filter(|n| n.ends_with(".tmp"))
        .collect()
}
