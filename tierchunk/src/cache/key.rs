use std::fmt;

use uuid::Uuid;

use crate::segment::RemoteSegmentMetadata;

/// Cache key of one decoded chunk.
///
/// Segment ids are unique per remote segment, so keys of different segments
/// never alias. The `Display` form only contains hex digits and dashes and
/// doubles as the disk store's file name stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub segment_id: Uuid,
    pub chunk_id: u32,
}

impl ChunkKey {
    pub fn new(segment_id: Uuid, chunk_id: u32) -> Self {
        Self {
            segment_id,
            chunk_id,
        }
    }

    pub fn for_segment(segment: &RemoteSegmentMetadata, chunk_id: u32) -> Self {
        Self::new(segment.segment_id, chunk_id)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.segment_id.as_simple(), self.chunk_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_do_not_alias_across_segments() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let keys: HashSet<_> = [
            ChunkKey::new(a, 0),
            ChunkKey::new(a, 1),
            ChunkKey::new(b, 0),
            ChunkKey::new(b, 1),
            ChunkKey::new(a, 0),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn test_display_is_filesystem_safe() {
        let key = ChunkKey::new(Uuid::from_u128(0xabc), 42);
        let name = key.to_string();
        assert_eq!(name, "00000000000000000000000000000abc-42");
        assert!(name.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }
}
