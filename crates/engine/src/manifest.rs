/// # Manifest - live segment list
///
/// The single source of truth for which segments make up the database.
/// Segment files on disk that are not listed here do not exist as far as the
/// engine is concerned, and are removed on the next startup.
///
/// ## File Format
///
/// One decimal segment id per line, highest priority (newest) first, plus an
/// optional `wal <N>` line: every WAL generation with id `<= N` has been
/// committed to a segment and must not be replayed again.
///
/// ```text
/// # Tidewater manifest
/// # one segment id per line, newest first
/// wal 15
/// 17
/// 12
/// 9
/// ```
///
/// Lines starting with `#` are comments. Empty lines are ignored.
///
/// ## Crash Safety
///
/// Every update rewrites the whole file: write `MANIFEST.tmp`, fsync, rename
/// over `MANIFEST`, fsync the directory. The rename is the commit point of
/// both flush and compaction.
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the manifest file within the data directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Temporary file used during atomic manifest writes.
pub(crate) const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

#[derive(Debug, Clone)]
pub(crate) struct Manifest {
    path: PathBuf,
    ids: Vec<u64>,
    wal_watermark: u64,
}

impl Manifest {
    /// Loads `dir/MANIFEST`, or an empty manifest if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but a line is not a segment id,
    /// or an id is listed twice.
    pub(crate) fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(Self {
                path,
                ids: Vec::new(),
                wal_watermark: 0,
            });
        }

        let file = File::open(&path)
            .with_context(|| format!("failed to open manifest at {}", path.display()))?;
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut wal_watermark = 0;

        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line =
                line.with_context(|| format!("failed to read manifest line {}", line_num + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix("wal ") {
                wal_watermark = match rest.trim().parse() {
                    Ok(n) => n,
                    Err(_) => bail!(
                        "manifest line {}: bad wal watermark '{}'",
                        line_num + 1,
                        trimmed
                    ),
                };
                continue;
            }

            let id: u64 = match trimmed.parse() {
                Ok(id) => id,
                Err(_) => bail!(
                    "manifest line {}: expected a segment id, got '{}'",
                    line_num + 1,
                    trimmed
                ),
            };
            if !seen.insert(id) {
                bail!("manifest line {}: segment {} listed twice", line_num + 1, id);
            }
            ids.push(id);
        }

        Ok(Self {
            path,
            ids,
            wal_watermark,
        })
    }

    /// Segment ids in manifest order (newest first).
    pub(crate) fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Highest WAL generation id already committed to a segment.
    pub(crate) fn wal_watermark(&self) -> u64 {
        self.wal_watermark
    }

    /// Atomically replaces the on-disk list with `ids` and the WAL
    /// watermark with `wal_watermark`.
    ///
    /// The in-memory copy is only updated once the rename has succeeded, so
    /// a failed save leaves both views on the old list.
    pub(crate) fn save(&mut self, ids: Vec<u64>, wal_watermark: u64) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| {
                    format!("failed to create manifest tmp at {}", tmp_path.display())
                })?;

            writeln!(f, "# Tidewater manifest")?;
            writeln!(f, "# one segment id per line, newest first")?;
            writeln!(f, "wal {}", wal_watermark)?;
            for id in &ids {
                writeln!(f, "{}", id)?;
            }
            f.flush()?;
            f.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to publish manifest at {}", self.path.display()))?;
        if let Some(dir) = self.path.parent() {
            if let Ok(d) = File::open(dir) {
                let _ = d.sync_all();
            }
        }

        self.ids = ids;
        self.wal_watermark = wal_watermark;
        Ok(())
    }
}
