//! Error taxonomy shared by the manager, the cache and the range reader.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::ChunkKey;
use crate::cadapter::client::StorageError;

pub type Result<T> = std::result::Result<T, ChunkError>;

/// Errors surfaced by chunk retrieval.
///
/// The type is `Clone` so a single failed load can be handed to every caller
/// attached to it without changing its kind. I/O sources are therefore kept
/// behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum ChunkError {
    /// Caller asked for a chunk (or byte range) the segment does not have.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Transient backend failure, safe to retry with backoff.
    #[error("storage backend unavailable: {0}")]
    StorageUnavailable(String),

    #[error("remote object not found: {0}")]
    KeyNotFound(String),

    #[error(transparent)]
    Io(Arc<io::Error>),

    /// Decryption or decompression failed for the fetched bytes.
    #[error("failed to decode chunk: {0}")]
    Decode(String),

    /// The backing store could not turn a cached entry back into a stream.
    #[error("failed to materialize cached chunk {key}")]
    CacheMaterialization {
        key: ChunkKey,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("invalid chunk index: {0}")]
    InvalidIndex(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChunkError {
    pub fn chunk_out_of_range(chunk_id: u32, chunk_count: usize) -> Self {
        ChunkError::OutOfRange(format!(
            "chunk {chunk_id} requested, index holds {chunk_count} chunks"
        ))
    }

    pub fn materialization(key: ChunkKey, source: io::Error) -> Self {
        ChunkError::CacheMaterialization {
            key,
            source: Arc::new(source),
        }
    }

    /// Whether retrying the whole call may succeed without outside repair.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChunkError::StorageUnavailable(_) | ChunkError::CacheMaterialization { .. }
        )
    }
}

impl From<io::Error> for ChunkError {
    fn from(e: io::Error) -> Self {
        ChunkError::Io(Arc::new(e))
    }
}

impl From<StorageError> for ChunkError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Unavailable(msg) => ChunkError::StorageUnavailable(msg),
            StorageError::KeyNotFound(key) => ChunkError::KeyNotFound(key),
            StorageError::Io(e) => ChunkError::Io(Arc::new(e)),
        }
    }
}
