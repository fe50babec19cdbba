//! # CLI - Tidewater Interactive Shell
//!
//! A REPL-style command-line interface for the Tidewater storage engine.
//! Reads commands from stdin, executes them against the engine, and prints
//! results to stdout. Log output goes to stderr, so piping commands in and
//! reading stdout works for scripted use.
//!
//! ## Commands
//!
//! ```text
//! PUT key value            Insert or update a key-value pair
//! GET key                  Look up a key (prints value or "(nil)")
//! DEL key                  Delete a key (writes a tombstone)
//! RANGE [from|-] [to|-]    Ordered scan of [from, to); "-" leaves a side open
//! FLUSH                    Write the memtable to a segment now
//! COMPACT                  Merge all segments into one
//! STATS                    Print engine counters
//! EXIT / QUIT              Close the engine and leave
//! ```
//!
//! ## Configuration
//!
//! All settings come from the environment (see the `config` crate):
//!
//! ```text
//! TIDEWATER_DATA_DIR            data directory                (default: "data")
//! TIDEWATER_FLUSH_BYTES         memtable flush threshold      (default: 1048576)
//! TIDEWATER_COMPACTION_TRIGGER  segments before compaction    (default: 4, 0 = off)
//! TIDEWATER_WAL                 write-ahead log on/off        (default: true)
//! TIDEWATER_WAL_SYNC            fsync every WAL append        (default: false)
//! RUST_LOG                      log filter                    (default: "info")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! Tidewater started (dir=data, flush=1048576B, compaction_trigger=4, wal=true, segments=0)
//! > PUT name Alice
//! OK
//! > GET name
//! Alice
//! > RANGE - -
//! name -> Alice
//! (1 entries)
//! > EXIT
//! bye
//! ```

use anyhow::Result;
use config::EngineConfig;
use engine::{Engine, EngineError};
use std::io::{self, BufRead, Write};
use tracing_subscriber::{fmt, EnvFilter};

/// What the shell does after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// `-` (or nothing) means unbounded.
fn bound(arg: Option<&str>) -> Option<&[u8]> {
    match arg {
        None | Some("-") => None,
        Some(s) => Some(s.as_bytes()),
    }
}

/// Writes through backpressure: when the engine refuses because a flush is
/// still pending, flush synchronously and try once more.
fn upsert(engine: &Engine, key: &str, value: Option<&str>) -> engine::Result<()> {
    let owned = || (key.as_bytes().to_vec(), value.map(|v| v.as_bytes().to_vec()));
    let (k, v) = owned();
    match engine.upsert(k, v) {
        Err(EngineError::Backpressure { .. }) => {
            engine.flush()?;
            let (k, v) = owned();
            engine.upsert(k, v)
        }
        other => other,
    }
}

fn execute<W: Write>(engine: &Engine, line: &str, out: &mut W) -> io::Result<Flow> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(Flow::Continue);
    };

    match cmd.to_uppercase().as_str() {
        "PUT" => {
            let key = parts.next();
            let value = parts.collect::<Vec<&str>>().join(" ");
            match key {
                Some(k) if !value.is_empty() => match upsert(engine, k, Some(&value)) {
                    Ok(()) => writeln!(out, "OK")?,
                    Err(e) => writeln!(out, "ERR put failed: {}", e)?,
                },
                _ => writeln!(out, "ERR usage: PUT key value")?,
            }
        }
        "GET" => match parts.next() {
            Some(k) => match engine.get(k.as_bytes()) {
                Ok(Some(v)) => writeln!(out, "{}", String::from_utf8_lossy(&v))?,
                Ok(None) => writeln!(out, "(nil)")?,
                Err(e) => writeln!(out, "ERR read failed: {}", e)?,
            },
            None => writeln!(out, "ERR usage: GET key")?,
        },
        "DEL" => match parts.next() {
            Some(k) => match upsert(engine, k, None) {
                Ok(()) => writeln!(out, "OK")?,
                Err(e) => writeln!(out, "ERR del failed: {}", e)?,
            },
            None => writeln!(out, "ERR usage: DEL key")?,
        },
        "RANGE" => {
            let from = bound(parts.next());
            let to = bound(parts.next());
            match engine.scan(from, to) {
                Ok(rows) if rows.is_empty() => writeln!(out, "(empty)")?,
                Ok(rows) => {
                    for (k, v) in &rows {
                        writeln!(
                            out,
                            "{} -> {}",
                            String::from_utf8_lossy(k),
                            String::from_utf8_lossy(v)
                        )?;
                    }
                    writeln!(out, "({} entries)", rows.len())?;
                }
                Err(e) => writeln!(out, "ERR range failed: {}", e)?,
            }
        }
        "FLUSH" => match engine.flush() {
            Ok(()) => writeln!(out, "OK (segments={})", engine.segment_ids().len())?,
            Err(e) => writeln!(out, "ERR flush failed: {}", e)?,
        },
        "COMPACT" => match engine.compact() {
            Ok(()) => writeln!(out, "OK (segments={})", engine.segment_ids().len())?,
            Err(e) => writeln!(out, "ERR compact failed: {}", e)?,
        },
        "STATS" => {
            let s = engine.stats();
            writeln!(
                out,
                "memtable_bytes={} memtable_entries={} flushing={} segments={} segment_entries={} flush={} compaction={}",
                s.memtable_bytes,
                s.memtable_entries,
                s.flushing,
                s.segments,
                s.segment_entries,
                s.flush_state,
                s.compaction_state
            )?;
        }
        "EXIT" | "QUIT" => return Ok(Flow::Exit),
        other => writeln!(out, "unknown command: {}", other)?,
    }
    Ok(Flow::Continue)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let config = EngineConfig::from_env()?;
    let engine = Engine::open(config)?;

    let cfg = engine.config();
    println!(
        "Tidewater started (dir={}, flush={}B, compaction_trigger={}, wal={}, segments={})",
        cfg.data_dir.display(),
        cfg.flush_threshold,
        cfg.compaction_trigger,
        cfg.wal,
        engine.segment_ids().len()
    );
    println!("Commands: PUT key value | GET key | DEL key | RANGE [from|-] [to|-]");
    println!("          FLUSH | COMPACT | STATS | EXIT");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write!(out, "> ")?;
    out.flush()?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        if execute(&engine, &line, &mut out)? == Flow::Exit {
            break;
        }
        write!(out, "> ")?;
        out.flush()?;
    }

    // EXIT and end of input both land here.
    engine.close()?;
    writeln!(out, "bye")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine_in(dir: &std::path::Path) -> Engine {
        let config = EngineConfig::builder()
            .data_dir(dir)
            .compaction_trigger(0)
            .build();
        Engine::open(config).unwrap()
    }

    fn run(engine: &Engine, script: &str) -> String {
        let mut out = Vec::new();
        for line in script.lines() {
            if execute(engine, line, &mut out).unwrap() == Flow::Exit {
                break;
            }
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn put_get_del() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        let out = run(&engine, "PUT k hello world\nGET k\nDEL k\nGET k\n");
        assert_eq!(out, "OK\nhello world\nOK\n(nil)\n");
    }

    #[test]
    fn commands_are_case_insensitive() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        let out = run(&engine, "put a 1\nget a\n");
        assert_eq!(out, "OK\n1\n");
    }

    #[test]
    fn usage_errors() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        let out = run(&engine, "PUT\nPUT k\nGET\nDEL\n");
        assert_eq!(
            out,
            "ERR usage: PUT key value\nERR usage: PUT key value\nERR usage: GET key\nERR usage: DEL key\n"
        );
    }

    #[test]
    fn range_with_open_bounds() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());
        run(&engine, "PUT a 1\nPUT b 2\nPUT c 3\nFLUSH\nPUT d 4\n");

        assert_eq!(run(&engine, "RANGE b -"), "b -> 2\nc -> 3\nd -> 4\n(3 entries)\n");
        assert_eq!(run(&engine, "RANGE - b"), "a -> 1\n(1 entries)\n");
        assert_eq!(run(&engine, "RANGE b c"), "b -> 2\n(1 entries)\n");
        assert_eq!(run(&engine, "RANGE x y"), "(empty)\n");
    }

    #[test]
    fn flush_and_compact_report_segments() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        let out = run(&engine, "PUT a 1\nFLUSH\nDEL a\nFLUSH\nCOMPACT\n");
        assert_eq!(out, "OK\nOK (segments=1)\nOK\nOK (segments=2)\nOK (segments=0)\n");
    }

    #[test]
    fn stats_line() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        let out = run(&engine, "PUT ab ccc\nSTATS\n");
        assert!(out.contains("memtable_bytes=5 memtable_entries=1 flushing=false segments=0"));
        assert!(out.contains("flush=idle compaction=idle"));
    }

    #[test]
    fn exit_stops_the_script() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        let out = run(&engine, "PUT a 1\nEXIT\nPUT b 2\n");
        assert_eq!(out, "OK\n");
        assert_eq!(engine.get(b"b").unwrap(), None);
    }

    #[test]
    fn unknown_and_blank_lines() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        assert_eq!(run(&engine, "\n   \nFROB x\n"), "unknown command: FROB\n");
    }

    #[test]
    fn bound_parsing() {
        assert_eq!(bound(None), None);
        assert_eq!(bound(Some("-")), None);
        assert_eq!(bound(Some("k")), Some(&b"k"[..]));
    }
}
