//! DefaultChunkManager：按 manifest 解析 chunk 范围，拉取远端字节并解密、解压。

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument};

use super::{ChunkManager, ChunkStream};
use crate::cadapter::StorageBackend;
use crate::error::{ChunkError, Result};
use crate::manifest::SegmentManifest;
use crate::security::AesEncryptionProvider;
use crate::segment::{ObjectKeyNaming, RemoteSegmentMetadata, Suffix};

pub struct DefaultChunkManager {
    storage: Arc<dyn StorageBackend>,
    object_key: Arc<dyn ObjectKeyNaming>,
    encryption: Option<AesEncryptionProvider>,
}

impl DefaultChunkManager {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        object_key: Arc<dyn ObjectKeyNaming>,
        encryption: Option<AesEncryptionProvider>,
    ) -> Self {
        Self {
            storage,
            object_key,
            encryption,
        }
    }

    /// Fetch one chunk and undo the write-path transforms, in reverse order:
    /// decrypt first, then decompress.
    #[instrument(level = "debug", skip_all, fields(segment = %segment.segment_id, chunk_id = chunk_id))]
    pub async fn fetch_decoded(
        &self,
        segment: &RemoteSegmentMetadata,
        manifest: &SegmentManifest,
        chunk_id: u32,
    ) -> Result<Bytes> {
        let chunk = manifest.chunk_index().find_chunk(chunk_id)?;
        let key = self.object_key.key(segment, Suffix::Log);

        let started = Instant::now();
        let mut data = self.storage.fetch(&key, chunk.range()).await?;
        debug!(
            key,
            range = ?chunk.range(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "fetched chunk"
        );

        if let Some(encryption) = manifest.encryption() {
            let provider = self.encryption.as_ref().ok_or_else(|| {
                ChunkError::Decode("segment is encrypted but no encryption provider is configured".to_string())
            })?;
            data = Bytes::from(provider.decrypt(encryption, &data)?);
        }

        let expected = chunk.original_size as usize;
        if manifest.compression() {
            data = Bytes::from(decompress(&data, expected)?);
        }
        if data.len() != expected {
            return Err(ChunkError::Decode(format!(
                "chunk {chunk_id} decoded to {} bytes, index says {expected}",
                data.len()
            )));
        }

        Ok(data)
    }
}

#[async_trait]
impl ChunkManager for DefaultChunkManager {
    async fn get_chunk(
        &self,
        segment: &RemoteSegmentMetadata,
        manifest: &SegmentManifest,
        chunk_id: u32,
    ) -> Result<ChunkStream> {
        let data = self.fetch_decoded(segment, manifest, chunk_id).await?;
        Ok(Box::new(Cursor::new(data)))
    }
}

/// Decode the zstd frames in `data`, refusing to produce more than `limit` bytes.
fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    zstd::bulk::decompress(data, limit).map_err(|e| ChunkError::Decode(format!("zstd: {e}")))
}
