//! ChunkRangeReader：将原始偏移范围拆分为 chunk 局部范围，逐个取 chunk 后拼接。

use std::io;
use std::ops::Range;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use super::{ChunkManager, read_to_bytes};
use crate::error::{ChunkError, Result};
use crate::manifest::{ChunkIndex, SegmentManifest};
use crate::segment::RemoteSegmentMetadata;

/// 原始范围在某个 chunk 内的一段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub chunk_id: u32,
    pub offset_in_chunk: u64,
    pub len: usize,
}

/// 将段内 [range.start, range.end) 拆分为若干 chunk 局部范围。
pub fn split_range_into_chunks(index: &ChunkIndex, range: Range<u64>) -> Result<Vec<ChunkSpan>> {
    let total = index.original_file_size();
    if range.start > range.end || range.end > total {
        return Err(ChunkError::OutOfRange(format!(
            "range {range:?} outside segment of {total} bytes"
        )));
    }

    let mut out = Vec::new();
    let mut offset = range.start;
    while offset < range.end {
        // offset < total, so a chunk always exists here
        let Some(chunk) = index.find_chunk_for_original_offset(offset) else {
            break;
        };
        let chunk_range = chunk.original_range();
        let take = chunk_range.end.min(range.end) - offset;
        out.push(ChunkSpan {
            chunk_id: chunk.id,
            offset_in_chunk: offset - chunk_range.start,
            len: take as usize,
        });
        offset += take;
    }
    Ok(out)
}

/// Reads plaintext byte ranges of a segment through a `ChunkManager`,
/// normally the chunk cache.
pub struct ChunkRangeReader {
    manager: Arc<dyn ChunkManager>,
}

impl ChunkRangeReader {
    pub fn new(manager: Arc<dyn ChunkManager>) -> Self {
        Self { manager }
    }

    pub async fn read(
        &self,
        segment: &RemoteSegmentMetadata,
        manifest: &SegmentManifest,
        range: Range<u64>,
    ) -> Result<Bytes> {
        let spans = split_range_into_chunks(manifest.chunk_index(), range)?;
        if let [span] = spans.as_slice() {
            return self.read_span(segment, manifest, span).await;
        }
        let mut out = BytesMut::with_capacity(spans.iter().map(|s| s.len).sum());
        for span in &spans {
            out.extend_from_slice(&self.read_span(segment, manifest, span).await?);
        }
        Ok(out.freeze())
    }

    async fn read_span(
        &self,
        segment: &RemoteSegmentMetadata,
        manifest: &SegmentManifest,
        span: &ChunkSpan,
    ) -> Result<Bytes> {
        let stream = self.manager.get_chunk(segment, manifest, span.chunk_id).await?;
        let chunk = read_to_bytes(stream).await?;
        let start = span.offset_in_chunk as usize;
        let end = start + span.len;
        if chunk.len() < end {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "chunk {} decoded to {} bytes, expected at least {end}",
                    span.chunk_id,
                    chunk.len()
                ),
            )
            .into());
        }
        Ok(chunk.slice(start..end))
    }
}
