//! Chunk index: maps chunk ordinals to byte ranges.
//!
//! Every chunk covers `original_chunk_size` bytes of the plaintext segment
//! (the last one may be shorter). After the write path transforms a chunk
//! (compression, encryption) its stored size may differ, so each descriptor
//! carries both the original and the transformed position/size. Reads from
//! remote storage always use the transformed range.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{ChunkError, Result};

/// One chunk of a remote segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub id: u32,
    pub original_position: u64,
    pub original_size: u32,
    pub transformed_position: u64,
    pub transformed_size: u32,
}

impl ChunkDescriptor {
    /// Byte range of this chunk inside the remote object.
    pub fn range(&self) -> Range<u64> {
        self.transformed_position..self.transformed_position + self.transformed_size as u64
    }

    /// Byte range of this chunk inside the plaintext segment.
    pub fn original_range(&self) -> Range<u64> {
        self.original_position..self.original_position + self.original_size as u64
    }
}

/// Parameters a fixed-size index is persisted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedSizeLayout {
    pub original_file_size: u64,
    pub original_chunk_size: u32,
    pub transformed_chunk_size: u32,
    pub final_transformed_chunk_size: u32,
}

/// Index where every transformed chunk has the same size except the last.
///
/// Used when the write path does not change chunk sizes unpredictably, e.g.
/// plaintext or encryption-only segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FixedSizeLayout", into = "FixedSizeLayout")]
pub struct FixedSizeChunkIndex {
    layout: FixedSizeLayout,
    chunks: Vec<ChunkDescriptor>,
}

impl FixedSizeChunkIndex {
    pub fn new(
        original_file_size: u64,
        original_chunk_size: u32,
        transformed_chunk_size: u32,
        final_transformed_chunk_size: u32,
    ) -> Result<Self> {
        Self::try_from(FixedSizeLayout {
            original_file_size,
            original_chunk_size,
            transformed_chunk_size,
            final_transformed_chunk_size,
        })
    }

    pub fn layout(&self) -> FixedSizeLayout {
        self.layout
    }
}

impl TryFrom<FixedSizeLayout> for FixedSizeChunkIndex {
    type Error = ChunkError;

    fn try_from(layout: FixedSizeLayout) -> Result<Self> {
        let count = chunk_count(layout.original_file_size, layout.original_chunk_size)?;
        if layout.transformed_chunk_size == 0 || layout.final_transformed_chunk_size == 0 {
            return Err(ChunkError::InvalidIndex(
                "transformed chunk sizes must be positive".to_string(),
            ));
        }

        let mut transformed_sizes = vec![layout.transformed_chunk_size; count];
        if let Some(last) = transformed_sizes.last_mut() {
            *last = layout.final_transformed_chunk_size;
        }
        let chunks = build_chunks(
            layout.original_file_size,
            layout.original_chunk_size,
            &transformed_sizes,
        );
        Ok(Self { layout, chunks })
    }
}

impl From<FixedSizeChunkIndex> for FixedSizeLayout {
    fn from(index: FixedSizeChunkIndex) -> Self {
        index.layout
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableSizeLayout {
    pub original_file_size: u64,
    pub original_chunk_size: u32,
    pub transformed_chunk_sizes: Vec<u32>,
}

/// Index where each transformed chunk has its own size, as produced by
/// compression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VariableSizeLayout", into = "VariableSizeLayout")]
pub struct VariableSizeChunkIndex {
    layout: VariableSizeLayout,
    chunks: Vec<ChunkDescriptor>,
}

impl VariableSizeChunkIndex {
    pub fn new(
        original_file_size: u64,
        original_chunk_size: u32,
        transformed_chunk_sizes: Vec<u32>,
    ) -> Result<Self> {
        Self::try_from(VariableSizeLayout {
            original_file_size,
            original_chunk_size,
            transformed_chunk_sizes,
        })
    }
}

impl TryFrom<VariableSizeLayout> for VariableSizeChunkIndex {
    type Error = ChunkError;

    fn try_from(layout: VariableSizeLayout) -> Result<Self> {
        let count = chunk_count(layout.original_file_size, layout.original_chunk_size)?;
        if layout.transformed_chunk_sizes.len() != count {
            return Err(ChunkError::InvalidIndex(format!(
                "expected {count} transformed chunk sizes, got {}",
                layout.transformed_chunk_sizes.len()
            )));
        }
        if layout.transformed_chunk_sizes.contains(&0) {
            return Err(ChunkError::InvalidIndex(
                "transformed chunk sizes must be positive".to_string(),
            ));
        }
        let chunks = build_chunks(
            layout.original_file_size,
            layout.original_chunk_size,
            &layout.transformed_chunk_sizes,
        );
        Ok(Self { layout, chunks })
    }
}

impl From<VariableSizeChunkIndex> for VariableSizeLayout {
    fn from(index: VariableSizeChunkIndex) -> Self {
        index.layout
    }
}

/// Chunk layout of one remote segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChunkIndex {
    Fixed(FixedSizeChunkIndex),
    Variable(VariableSizeChunkIndex),
}

impl ChunkIndex {
    pub fn chunks(&self) -> &[ChunkDescriptor] {
        match self {
            ChunkIndex::Fixed(index) => &index.chunks,
            ChunkIndex::Variable(index) => &index.chunks,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks().len()
    }

    pub fn original_chunk_size(&self) -> u32 {
        match self {
            ChunkIndex::Fixed(index) => index.layout.original_chunk_size,
            ChunkIndex::Variable(index) => index.layout.original_chunk_size,
        }
    }

    pub fn original_file_size(&self) -> u64 {
        match self {
            ChunkIndex::Fixed(index) => index.layout.original_file_size,
            ChunkIndex::Variable(index) => index.layout.original_file_size,
        }
    }

    pub fn find_chunk(&self, chunk_id: u32) -> Result<&ChunkDescriptor> {
        self.chunks()
            .get(chunk_id as usize)
            .ok_or_else(|| ChunkError::chunk_out_of_range(chunk_id, self.chunk_count()))
    }

    /// Chunk holding the given byte of the plaintext segment.
    pub fn find_chunk_for_original_offset(&self, offset: u64) -> Option<&ChunkDescriptor> {
        if offset >= self.original_file_size() {
            return None;
        }
        let ordinal = offset / self.original_chunk_size() as u64;
        self.chunks().get(usize::try_from(ordinal).ok()?)
    }
}

impl From<FixedSizeChunkIndex> for ChunkIndex {
    fn from(index: FixedSizeChunkIndex) -> Self {
        ChunkIndex::Fixed(index)
    }
}

impl From<VariableSizeChunkIndex> for ChunkIndex {
    fn from(index: VariableSizeChunkIndex) -> Self {
        ChunkIndex::Variable(index)
    }
}

fn chunk_count(original_file_size: u64, original_chunk_size: u32) -> Result<usize> {
    if original_chunk_size == 0 {
        return Err(ChunkError::InvalidIndex(
            "original chunk size must be positive".to_string(),
        ));
    }
    if original_file_size == 0 {
        return Err(ChunkError::InvalidIndex(
            "original file size must be positive".to_string(),
        ));
    }
    let count = original_file_size.div_ceil(original_chunk_size as u64);
    usize::try_from(count)
        .ok()
        .filter(|c| u32::try_from(*c).is_ok())
        .ok_or_else(|| ChunkError::InvalidIndex(format!("too many chunks: {count}")))
}

fn build_chunks(
    original_file_size: u64,
    original_chunk_size: u32,
    transformed_sizes: &[u32],
) -> Vec<ChunkDescriptor> {
    let mut chunks = Vec::with_capacity(transformed_sizes.len());
    let mut transformed_position = 0u64;
    for (i, &transformed_size) in transformed_sizes.iter().enumerate() {
        let original_position = i as u64 * original_chunk_size as u64;
        let original_size =
            (original_file_size - original_position).min(original_chunk_size as u64) as u32;
        chunks.push(ChunkDescriptor {
            id: i as u32,
            original_position,
            original_size,
            transformed_position,
            transformed_size,
        });
        transformed_position += transformed_size as u64;
    }
    chunks
}
