//! Chunk cache configuration.
//!
//! Options arrive as string properties, the way the host passes plugin
//! configuration around:
//!
//! | key                        | meaning                                   |
//! |----------------------------|-------------------------------------------|
//! | `retention.ms`             | entry TTL in ms, `-1` = unbounded (required) |
//! | `size`                     | max total weight in bytes, `-1` = unbounded (required) |
//! | `path`                     | disk store base directory                 |
//! | `kind`                     | `memory` (default) or `disk`              |
//! | `housekeeping.interval.ms` | background maintenance period             |

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChunkError, Result};

pub const RETENTION_MS_CONFIG: &str = "retention.ms";
pub const SIZE_CONFIG: &str = "size";
pub const PATH_CONFIG: &str = "path";
pub const KIND_CONFIG: &str = "kind";
pub const HOUSEKEEPING_INTERVAL_MS_CONFIG: &str = "housekeeping.interval.ms";

const UNBOUNDED: i64 = -1;
const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Where cached chunks are held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkCacheKind {
    #[default]
    Memory,
    Disk,
}

impl FromStr for ChunkCacheKind {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(ChunkCacheKind::Memory),
            "disk" => Ok(ChunkCacheKind::Disk),
            other => Err(ChunkError::Config(format!("unknown chunk cache kind: {other}"))),
        }
    }
}

impl fmt::Display for ChunkCacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkCacheKind::Memory => f.write_str("memory"),
            ChunkCacheKind::Disk => f.write_str("disk"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCacheConfig {
    pub kind: ChunkCacheKind,
    /// Time-to-live of an entry; `None` disables time-based eviction.
    pub retention: Option<Duration>,
    /// Maximum total weight in bytes; `None` disables size-based eviction.
    pub size: Option<u64>,
    /// Base directory of the disk store.
    pub path: PathBuf,
    pub housekeeping_interval: Duration,
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self {
            kind: ChunkCacheKind::default(),
            retention: None,
            size: None,
            path: default_cache_path(),
            housekeeping_interval: DEFAULT_HOUSEKEEPING_INTERVAL,
        }
    }
}

impl ChunkCacheConfig {
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self> {
        let retention = parse_bounded(props, RETENTION_MS_CONFIG)?.map(Duration::from_millis);
        let size = parse_bounded(props, SIZE_CONFIG)?;
        let kind = match props.get(KIND_CONFIG) {
            Some(v) => v.parse()?,
            None => ChunkCacheKind::default(),
        };
        let path = match props.get(PATH_CONFIG) {
            Some(p) if !p.trim().is_empty() => PathBuf::from(p.trim()),
            Some(_) => return Err(ChunkError::Config(format!("{PATH_CONFIG} must not be empty"))),
            None => default_cache_path(),
        };
        let housekeeping_interval = match props.get(HOUSEKEEPING_INTERVAL_MS_CONFIG) {
            Some(v) => match parse_i64(HOUSEKEEPING_INTERVAL_MS_CONFIG, v)? {
                ms if ms > 0 => Duration::from_millis(ms as u64),
                ms => {
                    return Err(ChunkError::Config(format!(
                        "{HOUSEKEEPING_INTERVAL_MS_CONFIG} must be positive, got {ms}"
                    )));
                }
            },
            None => DEFAULT_HOUSEKEEPING_INTERVAL,
        };

        Ok(Self {
            kind,
            retention,
            size,
            path,
            housekeeping_interval,
        })
    }

    /// Same as [`from_props`](Self::from_props) for borrowed key/value pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let props = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::from_props(&props)
    }
}

/// 默认落在用户缓存目录下。
fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tierchunk")
}

fn parse_i64(key: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|e| ChunkError::Config(format!("{key}: invalid integer {value:?}: {e}")))
}

/// Required option where `-1` means unbounded.
fn parse_bounded(props: &HashMap<String, String>, key: &str) -> Result<Option<u64>> {
    let value = props
        .get(key)
        .ok_or_else(|| ChunkError::Config(format!("missing required option {key}")))?;
    match parse_i64(key, value)? {
        UNBOUNDED => Ok(None),
        v if v >= 0 => Ok(Some(v as u64)),
        v => Err(ChunkError::Config(format!(
            "{key} must be -1 or non-negative, got {v}"
        ))),
    }
}
