//! Chunk retrieval and caching for log segments kept in remote object storage.
//!
//! A segment is uploaded as a sequence of independently transformed chunks
//! (optionally zstd-compressed, then AES-GCM encrypted). This crate maps
//! original byte offsets to chunks, fetches and decodes them, and memoizes
//! decoded chunks in a memory- or disk-backed cache.
//!
//! Layering:
//! - `manifest`: chunk index and per-segment transform metadata
//! - `segment`: segment identity and object key naming
//! - `cadapter`: object storage backends (local filesystem, S3)
//! - `security`: AES-256-GCM data keys and decryption
//! - `chunk`: decode pipeline and multi-chunk range reads
//! - `cache`: single-flight chunk cache with eviction and metrics

pub mod cache;
pub mod cadapter;
pub mod chunk;
pub mod error;
pub mod manifest;
pub mod security;
pub mod segment;

pub use cache::{AnyChunkCache, ChunkCache, ChunkCacheBuilder, ChunkCacheConfig, ChunkKey};
pub use chunk::{ChunkManager, ChunkRangeReader, ChunkStream, DefaultChunkManager};
pub use error::{ChunkError, Result};
pub use manifest::{ChunkIndex, SegmentManifest};
pub use segment::RemoteSegmentMetadata;
