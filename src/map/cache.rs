// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Two-level tile cache with deduplicated, bounded fetching.
//!
//! Lookups go memory → disk → provider. Entries older than `stale_after` are
//! refreshed on access; if the refresh fails the stale copy is served, and a
//! tile that was never cached becomes a black placeholder. Concurrent
//! requests for the same key share one fetch through a `watch` channel.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use adsb_feed::geo::Viewport;
use image::RgbImage;
use log::{debug, info, warn};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use super::compose::{self, Adjustments, PlacedTile};
use super::{TileError, TileFetcher, TileKey, TileProvider};

/// Disk pruning runs after this many tiles have been written
const PRUNE_EVERY_INSERTS: usize = 64;

type SharedResult = Result<Arc<Vec<u8>>, Arc<TileError>>;

#[derive(Debug, Clone)]
pub struct TileCacheConfig {
    pub provider: TileProvider,
    pub custom_server: Option<String>,
    pub cache_dir: PathBuf,
    pub stale_after: Duration,
    pub disk_max_age: Duration,
    pub disk_max_bytes: u64,
    pub memory_capacity: usize,
    pub max_concurrent_fetches: usize,
    pub adjustments: Adjustments,
}

impl TileCacheConfig {
    /// Identifies the imagery source in disk file names
    fn source_id(&self) -> String {
        match (&self.provider, &self.custom_server) {
            (TileProvider::Custom, Some(server)) => server.trim_end_matches('/').to_string(),
            (provider, _) => provider.slug().to_string(),
        }
    }
}

/// Where a tile lookup was satisfied from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOrigin {
    Memory,
    Disk,
    Fetched,
    /// Refresh failed, previous copy served
    Stale,
    /// Nothing cached and the fetch failed
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct TileLookup {
    pub key: TileKey,
    /// Encoded image bytes, `None` for a placeholder
    pub bytes: Option<Arc<Vec<u8>>>,
    pub origin: TileOrigin,
}

/// Counters since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

/// A composed background and how it was assembled
#[derive(Debug, Clone)]
pub struct ComposedMap {
    pub image: RgbImage,
    pub zoom: u8,
    /// Tiles that made it into the image
    pub tiles: usize,
    /// Cells left black
    pub failed: usize,
    /// Tiles served from an expired copy
    pub stale: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub remaining_bytes: u64,
}

struct MemoryEntry {
    bytes: Arc<Vec<u8>>,
    fetched_at: SystemTime,
    last_used: u64,
}

/// Count-bounded map evicting the least recently used entry
struct MemoryCache {
    entries: HashMap<TileKey, MemoryEntry>,
    capacity: usize,
    clock: u64,
}

impl MemoryCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    fn get(&mut self, key: &TileKey) -> Option<(Arc<Vec<u8>>, SystemTime)> {
        self.clock += 1;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = self.clock;
        Some((Arc::clone(&entry.bytes), entry.fetched_at))
    }

    fn insert(&mut self, key: TileKey, bytes: Arc<Vec<u8>>, fetched_at: SystemTime) {
        self.clock += 1;
        self.entries.insert(
            key,
            MemoryEntry {
                bytes,
                fetched_at,
                last_used: self.clock,
            },
        );
        while self.entries.len() > self.capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| *key)
            else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub struct TileCache {
    config: TileCacheConfig,
    source_id: String,
    fetcher: Arc<dyn TileFetcher>,
    memory: Mutex<MemoryCache>,
    in_flight: Mutex<HashMap<TileKey, watch::Receiver<Option<SharedResult>>>>,
    permits: Semaphore,
    counters: Counters,
    writes_since_prune: AtomicUsize,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("source", &self.source_id)
            .field("cache_dir", &self.config.cache_dir)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl TileCache {
    #[must_use]
    pub fn new(config: TileCacheConfig, fetcher: Arc<dyn TileFetcher>) -> Self {
        Self {
            source_id: config.source_id(),
            memory: Mutex::new(MemoryCache::new(config.memory_capacity)),
            permits: Semaphore::new(config.max_concurrent_fetches.max(1)),
            in_flight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            writes_since_prune: AtomicUsize::new(0),
            fetcher,
            config,
        }
    }

    #[must_use]
    pub fn provider(&self) -> TileProvider {
        self.config.provider
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Tiles currently held in memory
    #[must_use]
    pub fn memory_len(&self) -> usize {
        lock(&self.memory).len()
    }

    /// Put encoded tile bytes into the memory cache as if fetched at `fetched_at`
    pub fn insert(&self, key: TileKey, bytes: Vec<u8>, fetched_at: SystemTime) {
        lock(&self.memory).insert(key, Arc::new(bytes), fetched_at);
    }

    fn disk_path(&self, key: &TileKey) -> PathBuf {
        self.config.cache_dir.join(key.cache_filename(&self.source_id))
    }

    fn is_fresh(&self, fetched_at: SystemTime, now: SystemTime) -> bool {
        now.duration_since(fetched_at).unwrap_or_default() <= self.config.stale_after
    }

    /// Drop disk files past the age limit, then the oldest ones until the
    /// directory fits the size cap.
    pub fn prune_disk(&self) -> io::Result<PruneReport> {
        prune_dir(
            &self.config.cache_dir,
            self.config.disk_max_age,
            self.config.disk_max_bytes,
            SystemTime::now(),
        )
    }

    /// Resolve one tile. Never fails: the worst case is a placeholder.
    pub async fn get_tile(self: &Arc<Self>, key: TileKey) -> TileLookup {
        let now = SystemTime::now();
        let mut stale = None;

        let cached = lock(&self.memory).get(&key);
        if let Some((bytes, fetched_at)) = cached {
            if self.is_fresh(fetched_at, now) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return TileLookup {
                    key,
                    bytes: Some(bytes),
                    origin: TileOrigin::Memory,
                };
            }
            stale = Some(bytes);
        } else if let Some((bytes, fetched_at)) = self.read_disk(&key).await {
            lock(&self.memory).insert(key, Arc::clone(&bytes), fetched_at);
            if self.is_fresh(fetched_at, now) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return TileLookup {
                    key,
                    bytes: Some(bytes),
                    origin: TileOrigin::Disk,
                };
            }
            stale = Some(bytes);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        match self.fetch_shared(key).await {
            Ok(bytes) => TileLookup {
                key,
                bytes: Some(bytes),
                origin: TileOrigin::Fetched,
            },
            Err(e) => match stale {
                Some(bytes) => {
                    debug!("Serving stale tile {key} after fetch failure: {e}");
                    TileLookup {
                        key,
                        bytes: Some(bytes),
                        origin: TileOrigin::Stale,
                    }
                }
                None => TileLookup {
                    key,
                    bytes: None,
                    origin: TileOrigin::Placeholder,
                },
            },
        }
    }

    async fn read_disk(&self, key: &TileKey) -> Option<(Arc<Vec<u8>>, SystemTime)> {
        let path = self.disk_path(key);
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        let fetched_at = metadata.modified().ok()?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some((Arc::new(bytes), fetched_at)),
            Err(e) => {
                debug!("Failed to read cached tile {}: {e}", path.display());
                None
            }
        }
    }

    /// Join the in-flight fetch for `key`, starting one if there is none.
    async fn fetch_shared(self: &Arc<Self>, key: TileKey) -> SharedResult {
        let mut rx = {
            let mut in_flight = lock(&self.in_flight);
            if let Some(rx) = in_flight.get(&key) {
                rx.clone()
            } else {
                // a fetch that finished since our miss has already stored its result
                let cached = lock(&self.memory).get(&key);
                if let Some((bytes, fetched_at)) = cached {
                    if self.is_fresh(fetched_at, SystemTime::now()) {
                        return Ok(bytes);
                    }
                }
                let (tx, rx) = watch::channel(None);
                in_flight.insert(key, rx.clone());
                tokio::spawn(Arc::clone(self).run_fetch(key, tx));
                rx
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(Arc::new(TileError::Task("fetch ended without a result".to_string()))))
    }

    /// Owns the fetch for `key`: stores the result, retires the in-flight
    /// entry, then wakes the waiters.
    async fn run_fetch(self: Arc<Self>, key: TileKey, tx: watch::Sender<Option<SharedResult>>) {
        let result = self.fetch_and_store(key).await.map_err(Arc::new);
        if let Err(e) = &result {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            warn!("Tile {key} fetch failed: {e}");
        }
        lock(&self.in_flight).remove(&key);
        tx.send_replace(Some(result));
    }

    async fn fetch_and_store(&self, key: TileKey) -> Result<Arc<Vec<u8>>, TileError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| TileError::Task(e.to_string()))?;
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let fetcher = Arc::clone(&self.fetcher);
        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TileError> {
            let bytes = fetcher.fetch(&key)?;
            image::load_from_memory(&bytes)?;
            Ok(bytes)
        })
        .await
        .map_err(|e| TileError::Task(e.to_string()))??;

        let bytes = Arc::new(bytes);
        lock(&self.memory).insert(key, Arc::clone(&bytes), SystemTime::now());
        if let Err(e) = self.write_disk(&key, &bytes).await {
            warn!("Failed to save tile {key} to cache: {e}");
        }
        Ok(bytes)
    }

    async fn write_disk(&self, key: &TileKey, bytes: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
        tokio::fs::write(self.disk_path(key), bytes).await?;

        if self.writes_since_prune.fetch_add(1, Ordering::Relaxed) + 1 >= PRUNE_EVERY_INSERTS {
            self.writes_since_prune.store(0, Ordering::Relaxed);
            let dir = self.config.cache_dir.clone();
            let (max_age, max_bytes) = (self.config.disk_max_age, self.config.disk_max_bytes);
            tokio::task::spawn_blocking(move || match prune_dir(&dir, max_age, max_bytes, SystemTime::now()) {
                Ok(report) if report.removed > 0 => {
                    info!("Pruned {} cached tiles, {} bytes remain", report.removed, report.remaining_bytes);
                }
                Ok(_) => {}
                Err(e) => warn!("Tile cache pruning failed: {e}"),
            });
        }
        Ok(())
    }

    /// Compose the background for `viewport` at `target` size.
    ///
    /// Tiles are resolved concurrently; cells that cannot be filled stay
    /// black.
    pub async fn get_viewport_image(self: &Arc<Self>, viewport: &Viewport, target: (u32, u32)) -> ComposedMap {
        let grid = viewport.tile_grid(target);
        let mut lookups = JoinSet::new();
        for (col, row, x, y) in grid.tiles() {
            let cache = Arc::clone(self);
            let key = TileKey::new(self.config.provider, grid.zoom, x, y);
            lookups.spawn(async move { (col, row, cache.get_tile(key).await) });
        }

        let mut placed = Vec::new();
        let mut failed = 0;
        let mut stale = 0;
        while let Some(joined) = lookups.join_next().await {
            let (col, row, lookup) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("Tile lookup task failed: {e}");
                    failed += 1;
                    continue;
                }
            };
            if lookup.origin == TileOrigin::Stale {
                stale += 1;
            }
            let Some(bytes) = lookup.bytes else {
                failed += 1;
                continue;
            };
            match image::load_from_memory(&bytes) {
                Ok(image) => placed.push(PlacedTile {
                    col,
                    row,
                    image: image.to_rgb8(),
                }),
                Err(e) => {
                    warn!("Cached tile {} does not decode: {e}", lookup.key);
                    failed += 1;
                }
            }
        }

        let mut image = compose::stitch(viewport, &grid, &placed, target);
        compose::adjust(&mut image, &self.config.adjustments);

        let stats = self.stats();
        info!(
            "Composed map at zoom {} from {} tiles ({failed} missing, {stale} stale); cache hits {} misses {} fetches {} failures {}",
            grid.zoom,
            placed.len(),
            stats.hits,
            stats.misses,
            stats.fetches,
            stats.failures
        );

        ComposedMap {
            image,
            zoom: grid.zoom,
            tiles: placed.len(),
            failed,
            stale,
        }
    }
}

/// Remove `.png` files older than `max_age`, then the oldest remaining files
/// until the total size is at most `max_bytes`.
pub fn prune_dir(dir: &Path, max_age: Duration, max_bytes: u64, now: SystemTime) -> io::Result<PruneReport> {
    let mut report = PruneReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        if now.duration_since(modified).unwrap_or_default() > max_age {
            fs::remove_file(&path)?;
            report.removed += 1;
            continue;
        }
        files.push((modified, metadata.len(), path));
    }

    let mut total: u64 = files.iter().map(|(_, len, _)| len).sum();
    files.sort_by_key(|(modified, _, _)| *modified);
    for (_, len, path) in files {
        if total <= max_bytes {
            break;
        }
        fs::remove_file(&path)?;
        total -= len;
        report.removed += 1;
    }

    report.remaining_bytes = total;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    use adsb_feed::geo::{WebMercator, ZoomBreakpoints};
    use image::{ImageFormat, Rgb};

    fn png(color: [u8; 3]) -> Vec<u8> {
        let tile = RgbImage::from_pixel(256, 256, Rgb(color));
        let mut bytes = Vec::new();
        tile.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    struct MockFetcher {
        calls: AtomicUsize,
        response: Option<Vec<u8>>,
        delay: Duration,
    }

    impl MockFetcher {
        fn serving(bytes: Vec<u8>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: Some(bytes),
                delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: None,
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TileFetcher for MockFetcher {
        fn fetch(&self, _key: &TileKey) -> Result<Vec<u8>, TileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.response.clone().ok_or(TileError::Status(503))
        }
    }

    fn config(dir: &Path) -> TileCacheConfig {
        TileCacheConfig {
            provider: TileProvider::Osm,
            custom_server: None,
            cache_dir: dir.to_path_buf(),
            stale_after: Duration::from_secs(3600),
            disk_max_age: Duration::from_secs(7200),
            disk_max_bytes: 10 * 1024 * 1024,
            memory_capacity: 64,
            max_concurrent_fetches: 4,
            adjustments: Adjustments::default(),
        }
    }

    fn key() -> TileKey {
        TileKey::new(TileProvider::Osm, 10, 5, 5)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher {
            delay: Duration::from_millis(200),
            ..MockFetcher::serving(png([0, 0, 255]))
        });
        let cache = Arc::new(TileCache::new(config(dir.path()), fetcher.clone()));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.spawn(async move { cache.get_tile(key()).await });
        }
        while let Some(lookup) = tasks.join_next().await {
            let lookup = lookup.unwrap();
            assert!(lookup.bytes.is_some());
            assert!(matches!(lookup.origin, TileOrigin::Fetched | TileOrigin::Memory));
        }

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.stats().fetches, 1);
    }

    #[tokio::test]
    async fn test_stale_tile_served_when_refresh_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::failing());
        let cache = Arc::new(TileCache::new(config(dir.path()), fetcher.clone()));

        let red = png([255, 0, 0]);
        let two_hours_ago = SystemTime::now() - Duration::from_secs(7200);
        cache.insert(key(), red.clone(), two_hours_ago);

        let lookup = cache.get_tile(key()).await;
        assert_eq!(lookup.origin, TileOrigin::Stale);
        assert_eq!(lookup.bytes.as_deref(), Some(&red));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_fresh_memory_entry_skips_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::failing());
        let cache = Arc::new(TileCache::new(config(dir.path()), fetcher.clone()));
        cache.insert(key(), png([1, 2, 3]), SystemTime::now());

        let lookup = cache.get_tile(key()).await;
        assert_eq!(lookup.origin, TileOrigin::Memory);
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_placeholder_when_nothing_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(TileCache::new(config(dir.path()), Arc::new(MockFetcher::failing())));

        let lookup = cache.get_tile(key()).await;
        assert_eq!(lookup.origin, TileOrigin::Placeholder);
        assert!(lookup.bytes.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_bytes_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::serving(b"<html>rate limited</html>".to_vec()));
        let cache = Arc::new(TileCache::new(config(dir.path()), fetcher));

        let lookup = cache.get_tile(key()).await;
        assert_eq!(lookup.origin, TileOrigin::Placeholder);
        assert_eq!(cache.memory_len(), 0);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_fetched_tile_is_written_to_disk_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let green = png([0, 255, 0]);
        let cache = Arc::new(TileCache::new(
            config(dir.path()),
            Arc::new(MockFetcher::serving(green.clone())),
        ));
        assert_eq!(cache.get_tile(key()).await.origin, TileOrigin::Fetched);

        let path = dir.path().join(key().cache_filename("osm"));
        assert_eq!(fs::read(&path).unwrap(), green);

        // a fresh cache finds it on disk without fetching
        let fetcher = Arc::new(MockFetcher::failing());
        let reopened = Arc::new(TileCache::new(config(dir.path()), fetcher.clone()));
        let lookup = reopened.get_tile(key()).await;
        assert_eq!(lookup.origin, TileOrigin::Disk);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_cache_dir_still_serves_fetched_tile() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("not-a-dir");
        fs::write(&blocked, b"file").unwrap();

        let cache = Arc::new(TileCache::new(
            config(&blocked),
            Arc::new(MockFetcher::serving(png([0, 255, 0]))),
        ));
        let lookup = cache.get_tile(key()).await;
        assert_eq!(lookup.origin, TileOrigin::Fetched);
        assert!(lookup.bytes.is_some());
        assert_eq!(cache.stats().failures, 0);
        assert_eq!(cache.get_tile(key()).await.origin, TileOrigin::Memory);
    }

    #[tokio::test]
    async fn test_viewport_image_survives_total_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(TileCache::new(config(dir.path()), Arc::new(MockFetcher::failing())));
        let viewport = Viewport::new(40.0, -74.0, 25.0, &ZoomBreakpoints::default()).unwrap();

        let map = cache.get_viewport_image(&viewport, (128, 32)).await;
        assert_eq!(map.image.dimensions(), (128, 32));
        assert_eq!(map.tiles, 0);
        assert!(map.failed > 0);
        assert!(map.image.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[tokio::test]
    async fn test_viewport_image_from_fetched_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::serving(png([0, 0, 200])));
        let cache = Arc::new(TileCache::new(config(dir.path()), fetcher.clone()));
        let viewport = Viewport::new(40.0, -74.0, 25.0, &ZoomBreakpoints::default()).unwrap();

        let map = cache.get_viewport_image(&viewport, (128, 32)).await;
        let grid = viewport.tile_grid((128, 32));
        assert_eq!(map.tiles, (grid.cols * grid.rows) as usize);
        assert_eq!(map.failed, 0);
        assert_eq!(map.image.get_pixel(64, 16).0, [0, 0, 200]);
        assert_eq!(fetcher.calls(), map.tiles);
    }

    #[tokio::test]
    async fn test_viewport_image_uses_stale_tiles_when_provider_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::failing());
        let cache = Arc::new(TileCache::new(config(dir.path()), fetcher.clone()));

        // centered on tile (z=10, x=5, y=5)
        let lat = WebMercator::tile_to_lat(5.5, 10);
        let lon = WebMercator::tile_to_lon(5.5, 10);
        let viewport = Viewport::new(lat, lon, 20.0, &ZoomBreakpoints::default()).unwrap();
        let grid = viewport.tile_grid((128, 32));
        assert_eq!(grid.zoom, 10);
        assert!(grid.tiles().any(|(_, _, x, y)| (x, y) == (5, 5)));

        let two_hours_ago = SystemTime::now() - Duration::from_secs(7200);
        for (_, _, x, y) in grid.tiles() {
            cache.insert(TileKey::new(TileProvider::Osm, 10, x, y), png([255, 0, 0]), two_hours_ago);
        }

        let map = cache.get_viewport_image(&viewport, (128, 32)).await;
        let tile_count = (grid.cols * grid.rows) as usize;
        assert_eq!(map.stale, tile_count);
        assert_eq!(map.tiles, tile_count);
        assert_eq!(map.failed, 0);
        assert_eq!(fetcher.calls(), tile_count);

        let [r, g, b] = map.image.get_pixel(64, 16).0;
        assert!(r > 240 && g < 16 && b < 16, "center pixel {:?}", [r, g, b]);
    }

    #[test]
    fn test_memory_cache_evicts_least_recently_used() {
        let mut memory = MemoryCache::new(2);
        let now = SystemTime::now();
        let a = TileKey::new(TileProvider::Osm, 3, 0, 0);
        let b = TileKey::new(TileProvider::Osm, 3, 1, 0);
        let c = TileKey::new(TileProvider::Osm, 3, 2, 0);

        memory.insert(a, Arc::new(vec![1]), now);
        memory.insert(b, Arc::new(vec![2]), now);
        assert!(memory.get(&a).is_some());
        memory.insert(c, Arc::new(vec![3]), now);

        assert_eq!(memory.len(), 2);
        assert!(memory.get(&a).is_some());
        assert!(memory.get(&b).is_none());
        assert!(memory.get(&c).is_some());
    }

    fn write_aged(dir: &Path, name: &str, len: usize, age: Duration) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![0_u8; len]).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
        path
    }

    #[test]
    fn test_prune_removes_expired_then_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let expired = write_aged(dir.path(), "expired.png", 100, Duration::from_secs(10_000));
        let oldest = write_aged(dir.path(), "oldest.png", 100, Duration::from_secs(300));
        let newer = write_aged(dir.path(), "newer.png", 100, Duration::from_secs(200));
        let newest = write_aged(dir.path(), "newest.png", 100, Duration::from_secs(100));
        let other = write_aged(dir.path(), "notes.txt", 100, Duration::from_secs(10_000));

        let report = prune_dir(dir.path(), Duration::from_secs(3600), 200, SystemTime::now()).unwrap();

        assert_eq!(report.removed, 2);
        assert_eq!(report.remaining_bytes, 200);
        assert!(!expired.exists());
        assert!(!oldest.exists());
        assert!(newer.exists());
        assert!(newest.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_prune_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report = prune_dir(&dir.path().join("absent"), Duration::from_secs(1), 0, SystemTime::now()).unwrap();
        assert_eq!(report, PruneReport::default());
    }
}
