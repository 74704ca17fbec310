//! 本地文件目录后端：按对象 key 映射到 root 下的文件，支持范围读取。

use std::io::{self, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::cadapter::client::{StorageBackend, StorageError};

pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn fetch(&self, key: &str, range: Range<u64>) -> Result<Bytes, StorageError> {
        if range.start > range.end {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid range {range:?} for {key}"),
            )));
        }
        let path = self.path_for(key);
        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::KeyNotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_localfs_range_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("topic/0")).unwrap();
        std::fs::write(tmp.path().join("topic/0/seg.log"), b"0123456789abcdef").unwrap();

        let backend = LocalFsBackend::new(tmp.path());
        let out = backend.fetch("topic/0/seg.log", 10..16).await.unwrap();
        assert_eq!(&out[..], b"abcdef");
        let empty = backend.fetch("topic/0/seg.log", 4..4).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_localfs_missing_key() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        let err = backend.fetch("nope.log", 0..1).await.unwrap_err();
        assert!(matches!(err, StorageError::KeyNotFound(k) if k == "nope.log"));
    }

    #[tokio::test]
    async fn test_localfs_short_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("short.log"), b"0123").unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        let err = backend.fetch("short.log", 0..10).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }
}
