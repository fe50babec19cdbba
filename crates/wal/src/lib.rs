//! # WAL - Write-Ahead Log
//!
//! Crash durability for the Tidewater storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary record and
//! appended to the current generation's log **before** it is applied to the
//! active memtable. Each memtable generation owns exactly one log file,
//! `wal_N`; when the memtable is rotated for flushing a fresh log is started,
//! and the old one is deleted once its segment has been committed to the
//! manifest. On restart every surviving log is replayed in id order.
//!
//! ## Binary Record Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body (Put): `[op=0: u8][key_len: u32][key][val_len: u32][value]`
//! Body (Del): `[op=1: u8][key_len: u32][key]`
//!
//! `record_len` includes the 4-byte CRC but **not** itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalWriter, WalReader, WalRecord};
//!
//! let mut w = WalWriter::create("wal_00000000000000000001", true).unwrap();
//! w.append(&WalRecord::Put {
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//! }).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("wal_00000000000000000001").unwrap();
//! r.replay(|rec| println!("{:?}", rec)).unwrap();
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

const OP_PUT: u8 = 0;
const OP_DEL: u8 = 1;

/// Largest frame the reader will allocate for. Anything bigger is corruption.
const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

impl WalRecord {
    pub fn key(&self) -> &[u8] {
        match self {
            WalRecord::Put { key, .. } | WalRecord::Del { key } => key,
        }
    }

    /// The value to store, `None` for a deletion.
    pub fn into_parts(self) -> (Vec<u8>, Option<Vec<u8>>) {
        match self {
            WalRecord::Put { key, value } => (key, Some(value)),
            WalRecord::Del { key } => (key, None),
        }
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation or contained an unknown op code.
    #[error("corrupt record")]
    Corrupt,
}

/// `wal_00000000000000000007`
pub fn wal_file_name(id: u64) -> String {
    format!("wal_{:020}", id)
}

/// Parses a log file name back into its generation id.
pub fn parse_wal_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("wal_")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Append-only WAL writer.
///
/// Records are serialized into an in-memory buffer, CRC-checksummed, and then
/// written to the underlying file in a single `write_all` call. When `sync` is
/// `true`, every append is followed by `sync_all()`.
pub struct WalWriter {
    file: File,
    sync: bool,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self {
            file,
            sync,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `record` and appends it to the log.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        self.buf.clear();

        // Frame header (record_len + crc), filled in below.
        self.buf.extend_from_slice(&[0u8; 8]);

        match record {
            WalRecord::Put { key, value } => {
                self.buf.write_u8(OP_PUT)?;
                self.buf.write_u32::<LittleEndian>(len_u32(key.len())?)?;
                self.buf.extend_from_slice(key);
                self.buf.write_u32::<LittleEndian>(len_u32(value.len())?)?;
                self.buf.extend_from_slice(value);
            }
            WalRecord::Del { key } => {
                self.buf.write_u8(OP_DEL)?;
                self.buf.write_u32::<LittleEndian>(len_u32(key.len())?)?;
                self.buf.extend_from_slice(key);
            }
        }

        let body = &self.buf[8..];
        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        let record_len = (body.len() as u64) + 4;
        if record_len > u64::from(MAX_RECORD_SIZE) {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "WAL record too large",
            )));
        }

        self.buf[0..4].copy_from_slice(&(record_len as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        self.file.write_all(&self.buf)?;
        self.file.flush()?;

        if self.sync {
            self.file.sync_all()?;
        }

        Ok(())
    }

    /// Forces everything appended so far to disk.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn len_u32(len: usize) -> Result<u32, WalError> {
    u32::try_from(len).map_err(|_| {
        WalError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "WAL field exceeds u32::MAX bytes",
        ))
    })
}

/// Sequential WAL reader.
///
/// Generic over any `Read` so tests can feed it in-memory buffers.
///
/// Each record's CRC32 is verified. A truncated tail record (a crash
/// mid-append) is treated as a clean EOF: every complete record before it is
/// still returned.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every valid record, calling `apply` for each one, and returns
    /// how many were applied.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** or **truncated tail** -> `Ok(n)`.
    /// - **CRC mismatch** or **unknown op code** -> `Err(WalError::Corrupt)`.
    /// - **I/O error** -> `Err(WalError::Io(...))`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<usize, WalError>
    where
        F: FnMut(WalRecord),
    {
        let mut body = Vec::with_capacity(256);
        let mut applied = 0usize;

        loop {
            let record_len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(applied),
                Err(e) => return Err(WalError::Io(e)),
            };

            if record_len <= 4 || record_len > MAX_RECORD_SIZE {
                return Err(WalError::Corrupt);
            }

            let crc = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(applied),
                Err(e) => return Err(WalError::Io(e)),
            };

            let body_len = (record_len - 4) as usize;
            body.clear();
            body.resize(body_len, 0);
            match self.rdr.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(applied),
                Err(e) => return Err(WalError::Io(e)),
            }

            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                return Err(WalError::Corrupt);
            }

            apply(decode_body(&body)?);
            applied += 1;
        }
    }
}

fn decode_body(body: &[u8]) -> Result<WalRecord, WalError> {
    let mut br = body;
    let op = br.read_u8().map_err(|_| WalError::Corrupt)?;
    let key = read_field(&mut br)?;
    let record = match op {
        OP_PUT => WalRecord::Put {
            key,
            value: read_field(&mut br)?,
        },
        OP_DEL => WalRecord::Del { key },
        _ => return Err(WalError::Corrupt),
    };
    if !br.is_empty() {
        return Err(WalError::Corrupt);
    }
    Ok(record)
}

fn read_field(br: &mut &[u8]) -> Result<Vec<u8>, WalError> {
    let len = br.read_u32::<LittleEndian>().map_err(|_| WalError::Corrupt)? as usize;
    if len > br.len() {
        return Err(WalError::Corrupt);
    }
    let (field, rest) = br.split_at(len);
    *br = rest;
    Ok(field.to_vec())
}
