//! Chunk cache
//!
//! Memoizes decoded chunks in front of a `ChunkManager`.
//!
//! - Each missing (segment, chunk) key is loaded once, however many callers
//!   ask for it concurrently. A failed load is not remembered.
//! - Entries leave the cache by age (`retention.ms`), by total weight
//!   (`size`), or on explicit invalidation. Every removal is reported to the
//!   backing store and to an optional listener on a separate task.
//! - Hit/miss/load/eviction counters are kept in [`CacheMetrics`].
//!
//! Submodules:
//! - `engine`: the cache itself plus builder and variant enum
//! - `memory` / `disk`: backing stores
//! - `config`, `metrics`, `key`: supporting types
pub mod config;
pub mod disk;
pub mod engine;
pub mod key;
pub mod memory;
pub mod metrics;

use std::io;

use async_trait::async_trait;

use crate::chunk::ChunkStream;

pub use config::{ChunkCacheConfig, ChunkCacheKind};
pub use disk::{DiskChunk, DiskChunkStore};
pub use engine::{AnyChunkCache, ChunkCache, ChunkCacheBuilder};
pub use key::ChunkKey;
pub use memory::MemoryChunkStore;
pub use metrics::CacheMetrics;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// Older than the configured retention.
    Expired,
    /// Pushed out to stay under the size budget.
    Size,
    /// Invalidated on purpose (shutdown, unreadable stored entry).
    Explicit,
}

impl RemovalCause {
    /// Whether the removal counts as an eviction in the metrics.
    pub fn was_evicted(&self) -> bool {
        matches!(self, RemovalCause::Expired | RemovalCause::Size)
    }
}

impl From<moka::notification::RemovalCause> for RemovalCause {
    fn from(cause: moka::notification::RemovalCause) -> Self {
        use moka::notification::RemovalCause as Moka;
        match cause {
            Moka::Expired => RemovalCause::Expired,
            Moka::Size => RemovalCause::Size,
            // the engine never overwrites an entry, so a replacement can only
            // come from an explicit removal path
            _ => RemovalCause::Explicit,
        }
    }
}

/// Receives removal notifications. Runs on the cache's notification task,
/// never while a loader holds the key.
pub trait RemovalListener: Send + Sync {
    fn on_removal(&self, key: &ChunkKey, cause: RemovalCause);
}

impl<F> RemovalListener for F
where
    F: Fn(&ChunkKey, RemovalCause) + Send + Sync,
{
    fn on_removal(&self, key: &ChunkKey, cause: RemovalCause) {
        self(key, cause)
    }
}

/// Backing store of a chunk cache: where decoded bytes are held and how they
/// are turned back into a stream.
///
/// `open` is the materialization step. Wrapping a store lets tests inject
/// failures there without touching the engine.
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    type Cached: Clone + PartialEq + Send + Sync + 'static;

    /// Persist a freshly decoded chunk.
    async fn cache_chunk(&self, key: &ChunkKey, chunk: ChunkStream) -> io::Result<Self::Cached>;

    /// Reopen a cached entry as a stream.
    async fn open(&self, key: &ChunkKey, cached: &Self::Cached) -> io::Result<ChunkStream>;

    /// Size-eviction cost of an entry.
    fn weight(cached: &Self::Cached) -> u32;

    /// Release whatever `cached` holds once the entry has left the cache.
    async fn on_removal(&self, _key: &ChunkKey, _cached: Self::Cached) {}
}
