//! Error types for storage operations.

use objdb_codec::CodecError;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A backend was asked to grow through `truncate`.
    #[error("cannot truncate log to {requested} bytes, it holds {size}")]
    TruncatePastEnd {
        /// The requested length.
        requested: u64,
        /// The current length.
        size: u64,
    },

    /// The commit log is corrupted beyond its torn tail.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A mutation was attempted through a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// A commit log record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
