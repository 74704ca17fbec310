//! Segment manifest model
//!
//! A manifest describes how one remote segment was written: its chunk layout,
//! whether chunks were compressed and, if encrypted, the key material needed
//! to read them back. Manifests are produced and deserialized outside this
//! crate; here they are only consumed.
//!
//! Submodules:
//! - `index`: chunk index (fixed and variable transformed sizes)
pub mod index;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use index::{ChunkDescriptor, ChunkIndex, FixedSizeChunkIndex, VariableSizeChunkIndex};

/// Per-segment encryption material: the AES data key and the AAD bound into
/// every chunk.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentEncryptionMetadata {
    data_key: Vec<u8>,
    aad: Vec<u8>,
}

impl SegmentEncryptionMetadata {
    pub fn new(data_key: impl Into<Vec<u8>>, aad: impl Into<Vec<u8>>) -> Self {
        Self {
            data_key: data_key.into(),
            aad: aad.into(),
        }
    }

    pub fn data_key(&self) -> &[u8] {
        &self.data_key
    }

    pub fn aad(&self) -> &[u8] {
        &self.aad
    }
}

// Keep key material out of logs.
impl fmt::Debug for SegmentEncryptionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentEncryptionMetadata")
            .field("data_key", &"<redacted>")
            .field("aad_len", &self.aad.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentManifest {
    chunk_index: ChunkIndex,
    compression: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encryption: Option<SegmentEncryptionMetadata>,
}

impl SegmentManifest {
    pub fn new(
        chunk_index: impl Into<ChunkIndex>,
        compression: bool,
        encryption: Option<SegmentEncryptionMetadata>,
    ) -> Self {
        Self {
            chunk_index: chunk_index.into(),
            compression,
            encryption,
        }
    }

    pub fn chunk_index(&self) -> &ChunkIndex {
        &self.chunk_index
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn encryption(&self) -> Option<&SegmentEncryptionMetadata> {
        self.encryption.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key() {
        let meta = SegmentEncryptionMetadata::new(vec![0xAB; 32], b"aad".to_vec());
        let printed = format!("{meta:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("171"));
    }

    #[test]
    fn test_manifest_json_roundtrip() {
        let manifest = SegmentManifest::new(
            VariableSizeChunkIndex::new(20, 10, vec![4, 6]).unwrap(),
            true,
            Some(SegmentEncryptionMetadata::new(vec![1; 32], vec![2; 8])),
        );
        let json = serde_json::to_string(&manifest).unwrap();
        let back: SegmentManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.chunk_index().find_chunk(1).unwrap().range(), 4..10);
    }
}
