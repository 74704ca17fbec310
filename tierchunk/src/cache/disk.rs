//! 磁盘后端：解码后的 chunk 持久化到本地目录。
//!
//! 目录布局：
//! - `<path>/temp`：写入中的文件，写完 fsync 后 rename 进 `cache`；写入被取消时随 TempPath 一起删除
//! - `<path>/cache`：完整的 chunk 文件，文件名为 `<ChunkKey>-<generation>`
//!
//! 只有完整文件才会出现在 `cache` 下；进程崩溃遗留的文件在下次打开时清理。
//! generation 保证同一 key 被重新加载时，旧值的删除不会误删新文件。

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::{ChunkKey, ChunkStore};
use crate::chunk::ChunkStream;

const CACHE_DIR: &str = "cache";
const TEMP_DIR: &str = "temp";

/// A chunk file owned by the disk store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskChunk {
    path: PathBuf,
    len: u64,
}

impl DiskChunk {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
pub struct DiskChunkStore {
    cache_dir: PathBuf,
    temp_dir: PathBuf,
    generation: AtomicU64,
}

impl DiskChunkStore {
    /// Prepare `base` for use, dropping anything an earlier run left behind.
    pub async fn open(base: impl AsRef<Path>) -> io::Result<Self> {
        let base = base.as_ref();
        let cache_dir = base.join(CACHE_DIR);
        let temp_dir = base.join(TEMP_DIR);
        for dir in [&cache_dir, &temp_dir] {
            fs::create_dir_all(dir).await?;
            let removed = clear_dir(dir).await?;
            if removed > 0 {
                debug!(dir = %dir.display(), removed, "removed stale chunk files");
            }
        }
        Ok(Self {
            cache_dir,
            temp_dir,
            generation: AtomicU64::new(0),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    fn file_name(&self, key: &ChunkKey) -> String {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        format!("{key}-{generation}")
    }
}

#[async_trait]
impl ChunkStore for DiskChunkStore {
    type Cached = DiskChunk;

    async fn cache_chunk(&self, key: &ChunkKey, mut chunk: ChunkStream) -> io::Result<DiskChunk> {
        let name = self.file_name(key);
        let path = self.cache_dir.join(&name);

        // TempPath removes the file when dropped, which also covers a caller
        // that stops polling halfway through the copy.
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(&format!("{name}."))
            .tempfile_in(&self.temp_dir)?
            .into_parts();
        let mut file = fs::File::from_std(file);
        let len = tokio::io::copy(&mut chunk, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        // synchronous rename: no await point between persisting and disarming
        temp_path.persist(&path).map_err(|e| e.error)?;
        Ok(DiskChunk { path, len })
    }

    async fn open(&self, _key: &ChunkKey, cached: &DiskChunk) -> io::Result<ChunkStream> {
        let file = fs::File::open(&cached.path).await?;
        let actual = file.metadata().await?.len();
        if actual != cached.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} holds {actual} bytes, expected {}",
                    cached.path.display(),
                    cached.len
                ),
            ));
        }
        Ok(Box::new(BufReader::new(file)))
    }

    fn weight(cached: &DiskChunk) -> u32 {
        u32::try_from(cached.len).unwrap_or(u32::MAX)
    }

    async fn on_removal(&self, key: &ChunkKey, cached: DiskChunk) {
        match fs::remove_file(&cached.path).await {
            Ok(()) => debug!(%key, path = %cached.path.display(), "deleted cached chunk file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(%key, path = %cached.path.display(), "failed to delete cached chunk file: {e}"),
        }
    }
}

async fn clear_dir(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::read_to_bytes;
    use std::io::Cursor;
    use uuid::Uuid;

    fn stream(data: &[u8]) -> ChunkStream {
        Box::new(Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn test_disk_store_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::open(tmp.path()).await.unwrap();
        let key = ChunkKey::new(Uuid::new_v4(), 3);

        let cached = store.cache_chunk(&key, stream(b"0123456789")).await.unwrap();
        assert_eq!(DiskChunkStore::weight(&cached), 10);
        assert!(cached.path().starts_with(store.cache_dir()));
        assert!(
            cached
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(&key.to_string())
        );
        assert_eq!(std::fs::read_dir(store.temp_dir()).unwrap().count(), 0);

        let out = read_to_bytes(store.open(&key, &cached).await.unwrap()).await.unwrap();
        assert_eq!(&out[..], b"0123456789");

        store.on_removal(&key, cached.clone()).await;
        assert!(!cached.path().exists());
        // already gone: no error
        store.on_removal(&key, cached).await;
    }

    #[tokio::test]
    async fn test_open_cleans_previous_run() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("temp")).unwrap();
        std::fs::create_dir_all(tmp.path().join("cache")).unwrap();
        std::fs::write(tmp.path().join("temp/partial-0"), b"01234").unwrap();
        std::fs::write(tmp.path().join("cache/old-0"), b"0123456789").unwrap();

        let store = DiskChunkStore::open(tmp.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(store.temp_dir()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(store.cache_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_reload_of_same_key_uses_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::open(tmp.path()).await.unwrap();
        let key = ChunkKey::new(Uuid::new_v4(), 0);

        let first = store.cache_chunk(&key, stream(b"aaaa")).await.unwrap();
        let second = store.cache_chunk(&key, stream(b"bbbb")).await.unwrap();
        assert_ne!(first.path(), second.path());

        store.on_removal(&key, first).await;
        let out = read_to_bytes(store.open(&key, &second).await.unwrap()).await.unwrap();
        assert_eq!(&out[..], b"bbbb");
    }

    /// Yields `head` and then never makes progress again.
    fn stalled_after(head: &[u8]) -> ChunkStream {
        struct Stalled;
        impl tokio::io::AsyncRead for Stalled {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Pending
            }
        }
        Box::new(tokio::io::AsyncReadExt::chain(Cursor::new(head.to_vec()), Stalled))
    }

    #[tokio::test]
    async fn test_cancelled_write_leaves_no_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::open(tmp.path()).await.unwrap();
        let key = ChunkKey::new(Uuid::new_v4(), 0);

        for _ in 0..3 {
            let write = store.cache_chunk(&key, stalled_after(b"01234"));
            let res = tokio::time::timeout(std::time::Duration::from_millis(50), write).await;
            assert!(res.is_err());
        }
        assert_eq!(std::fs::read_dir(store.temp_dir()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(store.cache_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_files() {
        struct Broken;
        impl tokio::io::AsyncRead for Broken {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Ready(Err(io::Error::other("upstream reset")))
            }
        }
        let tmp = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::open(tmp.path()).await.unwrap();
        let key = ChunkKey::new(Uuid::new_v4(), 0);

        let err = store.cache_chunk(&key, Box::new(Broken)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(std::fs::read_dir(store.temp_dir()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(store.cache_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_truncated_file_fails_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::open(tmp.path()).await.unwrap();
        let key = ChunkKey::new(Uuid::new_v4(), 0);
        let cached = store.cache_chunk(&key, stream(b"0123456789")).await.unwrap();

        std::fs::write(cached.path(), b"01234").unwrap();
        let err = store.open(&key, &cached).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        std::fs::remove_file(cached.path()).unwrap();
        let err = store.open(&key, &cached).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
