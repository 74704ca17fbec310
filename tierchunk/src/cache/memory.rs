//! 内存后端：解码后的 chunk 以堆上 `Bytes` 保存，权重为字节长度。

use std::io::{self, Cursor};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ChunkKey, ChunkStore};
use crate::chunk::{ChunkStream, read_to_bytes};

#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore;

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    type Cached = Bytes;

    async fn cache_chunk(&self, _key: &ChunkKey, chunk: ChunkStream) -> io::Result<Bytes> {
        read_to_bytes(chunk).await
    }

    async fn open(&self, _key: &ChunkKey, cached: &Bytes) -> io::Result<ChunkStream> {
        // Bytes::clone 只增加引用计数
        Ok(Box::new(Cursor::new(cached.clone())))
    }

    fn weight(cached: &Bytes) -> u32 {
        u32::try_from(cached.len()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryChunkStore::new();
        let key = ChunkKey::new(Uuid::new_v4(), 0);
        let cached = store
            .cache_chunk(&key, Box::new(Cursor::new(b"0123456789".to_vec())))
            .await
            .unwrap();
        assert_eq!(MemoryChunkStore::weight(&cached), 10);

        for _ in 0..2 {
            let out = read_to_bytes(store.open(&key, &cached).await.unwrap()).await.unwrap();
            assert_eq!(&out[..], b"0123456789");
        }
    }
}
