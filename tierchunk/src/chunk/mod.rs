//! Chunk retrieval
//!
//! Responsibilities:
//! - Turn (segment, manifest, chunk id) into the chunk's plaintext bytes.
//! - Read original-offset ranges that span several chunks.
//!
//! Submodules:
//! - `manager`: the decode pipeline (fetch, decrypt, decompress)
//! - `reader`: multi-chunk range reads on top of any `ChunkManager`
pub mod manager;
pub mod reader;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;
use crate::manifest::SegmentManifest;
use crate::segment::RemoteSegmentMetadata;

pub use manager::DefaultChunkManager;
pub use reader::ChunkRangeReader;

/// Decoded chunk bytes handed to callers.
pub type ChunkStream = Box<dyn AsyncRead + Send + Unpin>;

/// Source of decoded chunks. Implemented by the decode pipeline and by the
/// cache that wraps it.
#[async_trait]
pub trait ChunkManager: Send + Sync {
    async fn get_chunk(
        &self,
        segment: &RemoteSegmentMetadata,
        manifest: &SegmentManifest,
        chunk_id: u32,
    ) -> Result<ChunkStream>;
}

/// Drain a chunk stream into memory.
pub async fn read_to_bytes(mut stream: ChunkStream) -> std::io::Result<Bytes> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}
