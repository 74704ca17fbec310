//! S3 适配器：基于 aws-sdk-s3 的范围读取实现，区分可重试错误与普通 I/O 错误。

use std::io;
use std::ops::Range;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use bytes::Bytes;
use tracing::debug;

use crate::cadapter::client::{StorageBackend, StorageError};

/// S3 后端配置选项
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// 自定义 endpoint（MinIO / RustFS 等兼容实现）
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    pub async fn new(config: S3Config) -> Self {
        let mut loader = aws_config::ConfigLoader::default().region(Region::new(config.region));
        if let Some(endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let s3_conf = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();
        Self {
            client: Client::from_conf(s3_conf),
            bucket: config.bucket,
        }
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn fetch(&self, key: &str, range: Range<u64>) -> Result<Bytes, StorageError> {
        // HTTP Range 无法表达空区间
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        debug!(bucket = %self.bucket, key, ?range, "s3 ranged get");
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(http_range(&range))
            .send()
            .await
            .map_err(|e| classify_get_error(key, e))?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Unavailable(format!("reading body of {key}: {e}")))?;
        Ok(body.into_bytes())
    }
}

fn http_range(range: &Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end - 1)
}

/// 限流与服务端错误视为可重试。
fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn classify_get_error(key: &str, err: SdkError<GetObjectError>) -> StorageError {
    let message = format!("get {key}: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Unavailable(message)
        }
        SdkError::ServiceError(service) => {
            if service.err().is_no_such_key() {
                StorageError::KeyNotFound(key.to_string())
            } else if is_retryable_status(service.raw().status().as_u16()) {
                StorageError::Unavailable(message)
            } else {
                StorageError::Io(io::Error::other(message))
            }
        }
        _ => StorageError::Io(io::Error::other(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_range_is_inclusive() {
        assert_eq!(http_range(&(0..10)), "bytes=0-9");
        assert_eq!(http_range(&(100..101)), "bytes=100-100");
    }

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(403));
        assert!(!is_retryable_status(416));
    }
}
