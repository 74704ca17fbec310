//! Chunk cache engine.
//!
//! Completed entries live in a `moka::future::Cache`, which also enforces
//! retention (`time_to_live`) and the weight budget (`max_capacity` with a
//! weigher backed by `ChunkStore::weight`). Misses go through moka's per-key
//! entry API, which coalesces concurrent initializations of the same key into
//! one future. If the caller driving that future goes away, a waiter picks the
//! load up, so a cancelled read never leaves a half-built entry behind.
//!
//! A loaded chunk heavier than the whole budget is never inserted: moka would
//! drop it at admission without telling anyone. The engine hands it to the
//! callers of that load and then reports it as a `Size` eviction itself.
//!
//! Removal notifications from moka only bump the eviction counters and queue
//! an event. A dedicated task drains the queue, releases the stored bytes and
//! calls the user's listener.
//!
//! Metrics per `get_chunk` call:
//! - entry present: one hit plus one load success (the lookup is a
//!   completed compute pass, whether or not anything was fetched);
//! - caller that ran the load: one miss plus one load success or failure;
//! - caller that attached to another caller's load: one hit, nothing else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::Op;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::{
    CacheMetrics, ChunkCacheConfig, ChunkCacheKind, ChunkKey, ChunkStore, DiskChunkStore,
    MemoryChunkStore, RemovalCause, RemovalListener,
};
use crate::chunk::{ChunkManager, ChunkStream};
use crate::error::{ChunkError, Result};
use crate::manifest::SegmentManifest;
use crate::segment::RemoteSegmentMetadata;

struct RemovalEvent<V> {
    key: Arc<ChunkKey>,
    value: V,
    cause: RemovalCause,
}

type RemovalSender<V> = mpsc::UnboundedSender<RemovalEvent<V>>;

/// A cached value and when its load finished.
#[derive(Clone)]
struct Loaded<V> {
    value: V,
    loaded_at: Instant,
}

/// Why a coalesced load produced no cache entry.
enum LoadError<V: Clone> {
    Failed(ChunkError),
    Unretained(Unretained<V>),
}

/// Loaded value that does not fit the budget. It is released with a `Size`
/// removal once the last caller sharing the load has opened it.
struct Unretained<V: Clone> {
    key: ChunkKey,
    value: V,
    removals: RemovalSender<V>,
}

impl<V: Clone> Drop for Unretained<V> {
    fn drop(&mut self) {
        let _ = self.removals.send(RemovalEvent {
            key: Arc::new(self.key),
            value: self.value.clone(),
            cause: RemovalCause::Size,
        });
    }
}

/// Tracks a stored value until moka has published it. If the owning call is
/// dropped in between, the value is released unless it became the entry.
struct PendingInsert<'a, S: ChunkStore> {
    owner: &'a ChunkCache<S>,
    key: ChunkKey,
    value: Mutex<Option<S::Cached>>,
}

impl<'a, S: ChunkStore> PendingInsert<'a, S> {
    fn new(owner: &'a ChunkCache<S>, key: ChunkKey) -> Self {
        Self {
            owner,
            key,
            value: Mutex::new(None),
        }
    }

    fn arm(&self, value: S::Cached) {
        if let Ok(mut slot) = self.value.lock() {
            *slot = Some(value);
        }
    }

    fn disarm(&self) {
        if let Ok(mut slot) = self.value.lock() {
            slot.take();
        }
    }
}

impl<S: ChunkStore> Drop for PendingInsert<'_, S> {
    fn drop(&mut self) {
        let Some(value) = self.value.get_mut().ok().and_then(Option::take) else {
            return;
        };
        let key = self.key;
        let cache = self.owner.cache.clone();
        let store = self.owner.store.clone();
        self.owner.runtime.spawn(async move {
            let published = cache
                .get(&key)
                .await
                .is_some_and(|current| current.value == value);
            if !published {
                debug!(%key, "releasing chunk of an abandoned load");
                store.on_removal(&key, value).await;
            }
        });
    }
}

pub struct ChunkCache<S: ChunkStore> {
    manager: Arc<dyn ChunkManager>,
    store: Arc<S>,
    cache: Cache<ChunkKey, Loaded<S::Cached>>,
    metrics: Arc<CacheMetrics>,
    config: ChunkCacheConfig,
    removals: RemovalSender<S::Cached>,
    runtime: Handle,
    housekeeper: Option<JoinHandle<()>>,
}

impl<S: ChunkStore> ChunkCache<S> {
    fn new(
        manager: Arc<dyn ChunkManager>,
        store: S,
        config: ChunkCacheConfig,
        listener: Option<Arc<dyn RemovalListener>>,
        metrics: Arc<CacheMetrics>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            ChunkError::Config("chunk cache must be built inside a tokio runtime".to_string())
        })?;
        let store = Arc::new(store);
        let (tx, rx) = mpsc::unbounded_channel::<RemovalEvent<S::Cached>>();

        let eviction_metrics = metrics.clone();
        let listener_tx = tx.clone();
        let mut builder = Cache::builder()
            .weigher(|_key: &ChunkKey, loaded: &Loaded<S::Cached>| S::weight(&loaded.value))
            .eviction_listener(move |key: Arc<ChunkKey>, loaded: Loaded<S::Cached>, cause| {
                let cause = RemovalCause::from(cause);
                if cause.was_evicted() {
                    eviction_metrics.record_eviction(S::weight(&loaded.value));
                }
                // receiver only goes away once the cache itself is gone
                let _ = listener_tx.send(RemovalEvent {
                    key,
                    value: loaded.value,
                    cause,
                });
            });
        if let Some(retention) = config.retention {
            builder = builder.time_to_live(retention);
        }
        if let Some(size) = config.size {
            builder = builder.max_capacity(size);
        }
        let cache = builder.build();

        runtime.spawn(dispatch_removals(rx, store.clone(), listener));
        let housekeeper = (config.retention.is_some() || config.size.is_some()).then(|| {
            runtime.spawn(housekeeping(cache.clone(), config.housekeeping_interval))
        });

        debug!(
            retention = ?config.retention,
            size = ?config.size,
            kind = %config.kind,
            "chunk cache configured"
        );
        Ok(Self {
            manager,
            store,
            cache,
            metrics,
            config,
            removals: tx,
            runtime,
            housekeeper,
        })
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ChunkCacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Apply pending evictions now instead of waiting for housekeeping.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Drop every entry. Each one is reported with `RemovalCause::Explicit`.
    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    fn exceeds_budget(&self, value: &S::Cached) -> bool {
        self.config
            .size
            .is_some_and(|budget| u64::from(S::weight(value)) > budget)
    }

    async fn load(
        &self,
        segment: &RemoteSegmentMetadata,
        manifest: &SegmentManifest,
        key: &ChunkKey,
    ) -> Result<S::Cached> {
        let started = Instant::now();
        let result = async {
            let chunk = self
                .manager
                .get_chunk(segment, manifest, key.chunk_id)
                .await?;
            Ok::<_, ChunkError>(self.store.cache_chunk(key, chunk).await?)
        }
        .await;

        let elapsed = started.elapsed();
        match &result {
            Ok(_) => {
                self.metrics.record_load_success(elapsed);
                debug!(%key, elapsed_us = elapsed.as_micros() as u64, "loaded chunk into cache");
            }
            Err(e) => {
                self.metrics.record_load_failure(elapsed);
                debug!(%key, "chunk load failed: {e}");
            }
        }
        result
    }

    /// Miss path: run the load, or attach to one already in flight.
    async fn load_or_attach(
        &self,
        segment: &RemoteSegmentMetadata,
        manifest: &SegmentManifest,
        key: ChunkKey,
    ) -> Result<ChunkStream> {
        let entered = Instant::now();
        let loaded_here = AtomicBool::new(false);
        let pending = PendingInsert::new(self, key);
        let result = self
            .cache
            .entry(key)
            .or_try_insert_with(async {
                loaded_here.store(true, Ordering::Relaxed);
                self.metrics.record_miss();
                let value = match self.load(segment, manifest, &key).await {
                    Ok(value) => value,
                    Err(e) => return Err(LoadError::Failed(e)),
                };
                if self.exceeds_budget(&value) {
                    debug!(%key, weight = S::weight(&value), "chunk exceeds cache budget");
                    self.metrics.record_eviction(S::weight(&value));
                    return Err(LoadError::Unretained(Unretained {
                        key,
                        value,
                        removals: self.removals.clone(),
                    }));
                }
                pending.arm(value.clone());
                Ok(Loaded {
                    value,
                    loaded_at: Instant::now(),
                })
            })
            .await;
        pending.disarm();

        if !loaded_here.load(Ordering::Relaxed) {
            self.metrics.record_hit();
            // loaded before this call got here: same as a plain hit
            if let Ok(entry) = &result {
                if entry.value().loaded_at < entered {
                    self.metrics.record_load_success(entered.elapsed());
                }
            }
        }

        match result {
            Ok(entry) => self.materialize(key, &entry.value().value).await,
            Err(shared) => match shared.as_ref() {
                LoadError::Failed(e) => Err(e.clone()),
                // `shared` stays alive until the stream is open
                LoadError::Unretained(unretained) => self
                    .store
                    .open(&key, &unretained.value)
                    .await
                    .map_err(|e| ChunkError::materialization(key, e)),
            },
        }
    }

    async fn materialize(&self, key: ChunkKey, cached: &S::Cached) -> Result<ChunkStream> {
        match self.store.open(&key, cached).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound
                        | std::io::ErrorKind::UnexpectedEof
                        | std::io::ErrorKind::InvalidData
                ) {
                    // stored bytes are gone or damaged: force a reload next time
                    warn!(%key, "dropping unreadable cache entry: {e}");
                    self.discard_if_current(key, cached).await;
                }
                Err(ChunkError::materialization(key, e))
            }
        }
    }

    /// Remove `key` only while it still maps to `stale`; a newer load wins.
    async fn discard_if_current(&self, key: ChunkKey, stale: &S::Cached) {
        self.cache
            .entry(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().value == *stale => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
    }
}

#[async_trait]
impl<S: ChunkStore> ChunkManager for ChunkCache<S> {
    async fn get_chunk(
        &self,
        segment: &RemoteSegmentMetadata,
        manifest: &SegmentManifest,
        chunk_id: u32,
    ) -> Result<ChunkStream> {
        let key = ChunkKey::for_segment(segment, chunk_id);

        let started = Instant::now();
        if let Some(cached) = self.cache.get(&key).await {
            self.metrics.record_hit();
            self.metrics.record_load_success(started.elapsed());
            trace!(%key, "chunk cache hit");
            return self.materialize(key, &cached.value).await;
        }
        self.load_or_attach(segment, manifest, key).await
    }
}

impl<S: ChunkStore> Drop for ChunkCache<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.housekeeper.take() {
            handle.abort();
        }
    }
}

async fn dispatch_removals<S: ChunkStore>(
    mut rx: mpsc::UnboundedReceiver<RemovalEvent<S::Cached>>,
    store: Arc<S>,
    listener: Option<Arc<dyn RemovalListener>>,
) {
    while let Some(event) = rx.recv().await {
        trace!(key = %event.key, cause = ?event.cause, "chunk removed from cache");
        store.on_removal(&event.key, event.value).await;
        if let Some(listener) = &listener {
            listener.on_removal(&event.key, event.cause);
        }
    }
    trace!("removal dispatcher stopped");
}

async fn housekeeping<V>(cache: Cache<ChunkKey, V>, interval: Duration)
where
    V: Clone + Send + Sync + 'static,
{
    debug!(?interval, "chunk cache housekeeping started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        cache.run_pending_tasks().await;
    }
}

/// Assembles a chunk cache from options, a listener and a backing store.
pub struct ChunkCacheBuilder {
    manager: Arc<dyn ChunkManager>,
    config: ChunkCacheConfig,
    listener: Option<Arc<dyn RemovalListener>>,
    metrics: Option<Arc<CacheMetrics>>,
}

impl ChunkCacheBuilder {
    pub fn new(manager: Arc<dyn ChunkManager>) -> Self {
        Self {
            manager,
            config: ChunkCacheConfig::default(),
            listener: None,
            metrics: None,
        }
    }

    pub fn config(mut self, config: ChunkCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Parse string options, see [`ChunkCacheConfig::from_props`].
    pub fn configure(self, props: &HashMap<String, String>) -> Result<Self> {
        Ok(self.config(ChunkCacheConfig::from_props(props)?))
    }

    pub fn removal_listener(mut self, listener: Arc<dyn RemovalListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Record into an existing metrics registry instead of a fresh one.
    pub fn metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build_with<S: ChunkStore>(self, store: S) -> Result<ChunkCache<S>> {
        let metrics = self.metrics.unwrap_or_default();
        ChunkCache::new(self.manager, store, self.config, self.listener, metrics)
    }

    /// Build the variant selected by the configured kind.
    pub async fn build(self) -> Result<AnyChunkCache> {
        match self.config.kind {
            ChunkCacheKind::Memory => Ok(AnyChunkCache::Memory(
                self.build_with(MemoryChunkStore::new())?,
            )),
            ChunkCacheKind::Disk => {
                let store = DiskChunkStore::open(&self.config.path).await?;
                Ok(AnyChunkCache::Disk(self.build_with(store)?))
            }
        }
    }
}

/// Chunk cache with its backing store picked at configuration time.
pub enum AnyChunkCache {
    Memory(ChunkCache<MemoryChunkStore>),
    Disk(ChunkCache<DiskChunkStore>),
}

impl AnyChunkCache {
    pub fn kind(&self) -> ChunkCacheKind {
        match self {
            AnyChunkCache::Memory(_) => ChunkCacheKind::Memory,
            AnyChunkCache::Disk(_) => ChunkCacheKind::Disk,
        }
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        match self {
            AnyChunkCache::Memory(c) => c.metrics(),
            AnyChunkCache::Disk(c) => c.metrics(),
        }
    }

    pub async fn run_pending_tasks(&self) {
        match self {
            AnyChunkCache::Memory(c) => c.run_pending_tasks().await,
            AnyChunkCache::Disk(c) => c.run_pending_tasks().await,
        }
    }

    pub async fn invalidate_all(&self) {
        match self {
            AnyChunkCache::Memory(c) => c.invalidate_all().await,
            AnyChunkCache::Disk(c) => c.invalidate_all().await,
        }
    }
}

#[async_trait]
impl ChunkManager for AnyChunkCache {
    async fn get_chunk(
        &self,
        segment: &RemoteSegmentMetadata,
        manifest: &SegmentManifest,
        chunk_id: u32,
    ) -> Result<ChunkStream> {
        match self {
            AnyChunkCache::Memory(c) => c.get_chunk(segment, manifest, chunk_id).await,
            AnyChunkCache::Disk(c) => c.get_chunk(segment, manifest, chunk_id).await,
        }
    }
}
