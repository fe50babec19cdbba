use config::EngineConfig;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Engine, EngineError};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn open(dir: &std::path::Path, flush_threshold: usize) -> Engine {
    let config = EngineConfig::builder()
        .data_dir(dir)
        .flush_threshold(flush_threshold)
        .compaction_trigger(4)
        .wal(true)
        .wal_sync(false)
        .build();
    Engine::open(config).unwrap()
}

fn put(engine: &Engine, key: Vec<u8>, value: Vec<u8>) {
    loop {
        match engine.put(key.clone(), value.clone()) {
            Err(EngineError::Backpressure { .. }) => engine.flush().unwrap(),
            other => return other.unwrap(),
        }
    }
}

fn engine_put_benchmark(c: &mut Criterion) {
    c.bench_function("engine_put_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let engine = open(dir.path(), 256 * 1024);
                (dir, engine)
            },
            |(_dir, engine)| {
                for i in 0..N_KEYS {
                    put(&engine, format!("key{:06}", i).into_bytes(), vec![b'x'; VALUE_SIZE]);
                }
            },
            BatchSize::PerIteration,
        );
    });
}

fn engine_get_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = open(dir.path(), 64 * 1024);
    for i in 0..N_KEYS {
        put(&engine, format!("key{:06}", i).into_bytes(), vec![b'x'; VALUE_SIZE]);
    }
    engine.flush().unwrap();

    c.bench_function("engine_get_hit_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let key = format!("key{:06}", i).into_bytes();
                assert!(engine.get(&key).unwrap().is_some());
            }
        });
    });
}

fn engine_scan_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = open(dir.path(), 64 * 1024);
    for i in 0..N_KEYS {
        put(&engine, format!("key{:06}", i).into_bytes(), vec![b'x'; VALUE_SIZE]);
    }

    c.bench_function("engine_full_scan_10k", |b| {
        b.iter(|| {
            let n = engine.range(None, None).unwrap().count();
            assert_eq!(n, N_KEYS);
        });
    });
}

criterion_group!(
    benches,
    engine_put_benchmark,
    engine_get_benchmark,
    engine_scan_benchmark
);
criterion_main!(benches);
