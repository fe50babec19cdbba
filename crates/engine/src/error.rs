use thiserror::Error;
use wal::WalError;

/// Errors returned by the public [`Engine`](crate::Engine) API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest is unreadable or names a segment whose files are
    /// missing or invalid. The engine refuses to open.
    #[error("corrupted store: {0}")]
    CorruptedStore(String),

    /// The active memtable is over its threshold while the previous one is
    /// still being flushed. The write was rejected; retry after the flush.
    #[error("write rejected: memtable over {threshold} bytes while a flush is in progress")]
    Backpressure { threshold: usize },

    #[error("engine is closed")]
    Closed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("wal error: {0}")]
    Wal(#[from] WalError),

    /// Failure inside the storage layer (segment write/open, manifest).
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<memtable::UnsupportedComparator> for EngineError {
    fn from(e: memtable::UnsupportedComparator) -> Self {
        EngineError::InvalidArgument(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
