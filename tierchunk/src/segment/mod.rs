//! Remote segment identity and object key naming.
//!
//! The host's segment model lives outside this crate; `RemoteSegmentMetadata`
//! holds just the fields chunk retrieval needs. `ObjectKeyNaming` is the seam
//! that turns a segment into the name of one of its remote objects.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSegmentMetadata {
    pub segment_id: Uuid,
    pub topic_id: Uuid,
    pub topic: String,
    pub partition: i32,
    pub start_offset: i64,
    pub end_offset: i64,
    pub segment_size_bytes: u64,
}

impl RemoteSegmentMetadata {
    pub fn new(topic: impl Into<String>, partition: i32, start_offset: i64) -> Self {
        Self {
            segment_id: Uuid::new_v4(),
            topic_id: Uuid::new_v4(),
            topic: topic.into(),
            partition,
            start_offset,
            end_offset: start_offset,
            segment_size_bytes: 0,
        }
    }
}

/// Kinds of remote objects stored per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suffix {
    Log,
    OffsetIndex,
    TimeIndex,
    ProducerSnapshot,
    TxnIndex,
    LeaderEpochCheckpoint,
    Manifest,
}

impl Suffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Suffix::Log => "log",
            Suffix::OffsetIndex => "index",
            Suffix::TimeIndex => "timeindex",
            Suffix::ProducerSnapshot => "snapshot",
            Suffix::TxnIndex => "txnindex",
            Suffix::LeaderEpochCheckpoint => "leader-epoch-checkpoint",
            Suffix::Manifest => "rsm-manifest",
        }
    }
}

/// Resolves the remote object key of a segment file.
#[cfg_attr(test, mockall::automock)]
pub trait ObjectKeyNaming: Send + Sync {
    fn key(&self, segment: &RemoteSegmentMetadata, suffix: Suffix) -> String;
}

/// Default layout:
/// `{prefix}{topic}-{topic_id}/{partition}/{start_offset:020}-{segment_id}.{suffix}`.
#[derive(Debug, Clone, Default)]
pub struct ObjectKey {
    prefix: String,
}

impl ObjectKey {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ObjectKeyNaming for ObjectKey {
    fn key(&self, segment: &RemoteSegmentMetadata, suffix: Suffix) -> String {
        format!(
            "{}{}-{}/{}/{:020}-{}.{}",
            self.prefix,
            segment.topic,
            segment.topic_id,
            segment.partition,
            segment.start_offset,
            segment.segment_id,
            suffix.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        let mut segment = RemoteSegmentMetadata::new("orders", 3, 1234);
        segment.topic_id = Uuid::nil();
        segment.segment_id = Uuid::from_u128(1);

        let key = ObjectKey::new("tiered/").key(&segment, Suffix::Log);
        assert_eq!(
            key,
            "tiered/orders-00000000-0000-0000-0000-000000000000/3/\
             00000000000000001234-00000000-0000-0000-0000-000000000001.log"
        );
        assert!(
            ObjectKey::default()
                .key(&segment, Suffix::Manifest)
                .ends_with(".rsm-manifest")
        );
    }
}
