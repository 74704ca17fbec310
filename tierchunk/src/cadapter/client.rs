//! Ranged-fetch contract for remote object storage.

use std::io;
use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Retryable transport or service failure.
    #[error("{0}")]
    Unavailable(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Remote object store seen as a byte-range fetch service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch `range` (end exclusive) of the object named `key`.
    async fn fetch(&self, key: &str, range: Range<u64>) -> Result<Bytes, StorageError>;
}
