//! End to end: transformed segment on a local directory, read back through
//! the decode pipeline, the chunk cache and the range reader.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tierchunk::cache::metrics::{CACHE_HITS, CACHE_MISSES};
use tierchunk::cache::{ChunkCacheConfig, ChunkCacheKind};
use tierchunk::cadapter::localfs::LocalFsBackend;
use tierchunk::cadapter::{StorageBackend, StorageError};
use tierchunk::chunk::read_to_bytes;
use tierchunk::manifest::{SegmentEncryptionMetadata, VariableSizeChunkIndex};
use tierchunk::security::AesEncryptionProvider;
use tierchunk::segment::{ObjectKey, ObjectKeyNaming, Suffix};
use tierchunk::{
    ChunkCacheBuilder, ChunkError, ChunkManager, ChunkRangeReader, DefaultChunkManager,
    RemoteSegmentMetadata, SegmentManifest,
};

const CHUNK_SIZE: usize = 64;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts fetches on top of another backend.
struct CountingBackend {
    inner: LocalFsBackend,
    fetches: AtomicUsize,
}

#[async_trait]
impl StorageBackend for CountingBackend {
    async fn fetch(&self, key: &str, range: Range<u64>) -> Result<Bytes, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(key, range).await
    }
}

/// Compress and encrypt `plaintext` chunk by chunk, write the result under
/// the segment's log key and return the matching manifest.
fn upload_segment(
    root: &Path,
    naming: &ObjectKey,
    segment: &RemoteSegmentMetadata,
    plaintext: &[u8],
) -> SegmentManifest {
    let provider = AesEncryptionProvider::new();
    let keys = provider.create_data_key_and_aad();

    let mut object = Vec::new();
    let mut sizes = Vec::new();
    for chunk in plaintext.chunks(CHUNK_SIZE) {
        let compressed = zstd::encode_all(chunk, 3).unwrap();
        let encrypted = provider
            .encrypt(&keys.data_key, &keys.aad, &compressed)
            .unwrap();
        sizes.push(encrypted.len() as u32);
        object.extend_from_slice(&encrypted);
    }

    let path = root.join(naming.key(segment, Suffix::Log));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, &object).unwrap();

    let index =
        VariableSizeChunkIndex::new(plaintext.len() as u64, CHUNK_SIZE as u32, sizes).unwrap();
    SegmentManifest::new(index, true, Some(SegmentEncryptionMetadata::from(&keys)))
}

fn log_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| format!("{:08}", i / 8).as_bytes()[i % 8]).collect()
}

#[tokio::test]
async fn test_read_transformed_segment_through_cache() {
    init_tracing();
    let remote = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();

    let naming = ObjectKey::new("tiered/");
    let segment = RemoteSegmentMetadata::new("orders", 3, 1200);
    let plaintext = log_bytes(CHUNK_SIZE * 5 + 17);
    let manifest = upload_segment(remote.path(), &naming, &segment, &plaintext);
    assert_eq!(manifest.chunk_index().chunk_count(), 6);

    let backend = Arc::new(CountingBackend {
        inner: LocalFsBackend::new(remote.path()),
        fetches: AtomicUsize::new(0),
    });
    let manager = Arc::new(DefaultChunkManager::new(
        backend.clone(),
        Arc::new(naming),
        Some(AesEncryptionProvider::new()),
    ));

    let config = ChunkCacheConfig {
        kind: ChunkCacheKind::Disk,
        path: cache_dir.path().to_path_buf(),
        ..ChunkCacheConfig::default()
    };
    let cache = Arc::new(
        ChunkCacheBuilder::new(manager)
            .config(config)
            .build()
            .await
            .unwrap(),
    );
    let reader = ChunkRangeReader::new(cache.clone());

    let whole = reader
        .read(&segment, &manifest, 0..plaintext.len() as u64)
        .await
        .unwrap();
    assert_eq!(&whole[..], &plaintext[..]);
    assert_eq!(backend.fetches.load(Ordering::SeqCst), 6);

    // spans chunks 1..=3, all cached by now
    let start = CHUNK_SIZE as u64 + 5;
    let end = CHUNK_SIZE as u64 * 3 + 9;
    let part = reader.read(&segment, &manifest, start..end).await.unwrap();
    assert_eq!(&part[..], &plaintext[start as usize..end as usize]);
    assert_eq!(backend.fetches.load(Ordering::SeqCst), 6);

    let last = read_to_bytes(cache.get_chunk(&segment, &manifest, 5).await.unwrap())
        .await
        .unwrap();
    assert_eq!(last.len(), 17);

    let metrics = cache.metrics();
    assert_eq!(metrics.value(CACHE_MISSES), Some(6.0));
    assert_eq!(metrics.value(CACHE_HITS), Some(4.0));

    let err = reader
        .read(&segment, &manifest, 0..plaintext.len() as u64 + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ChunkError::OutOfRange(_)));
}

#[tokio::test]
async fn test_missing_segment_object() {
    init_tracing();
    let remote = tempfile::tempdir().unwrap();
    let segment = RemoteSegmentMetadata::new("orders", 0, 0);
    let index = VariableSizeChunkIndex::new(10, 10, vec![10]).unwrap();
    let manifest = SegmentManifest::new(index, false, None);

    let manager = DefaultChunkManager::new(
        Arc::new(LocalFsBackend::new(remote.path())),
        Arc::new(ObjectKey::new("")),
        None,
    );
    let err = manager.get_chunk(&segment, &manifest, 0).await.err().unwrap();
    assert!(matches!(err, ChunkError::KeyNotFound(_)));
    assert!(!err.is_retryable());
}
