//! Per-frame view model: the render thread's side of the pipeline.
//!
//! Each frame the view computes the visible tile set from the viewport,
//! submits missing tiles to the worker pool, drains the upload queue into
//! GPU textures and exposes the resident set for drawing. Draining is the
//! only place pixel buffers are freed and the only place textures are born.
//!
//! # Thread affinity
//!
//! GPU context operations are only valid on the thread that owns the
//! rendering context. [`TileView`] is therefore structurally `!Send` and
//! `!Sync`: texture handles live inside it and cannot leak to a worker
//! thread, so the affinity rule is enforced by the type system instead of a
//! runtime assertion.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::time::Duration;

use tracing::debug;

use crate::coord::{tiles_across, TileKey};
use crate::pool::WorkerPool;
use crate::upload::{UploadReceiver, UploadedTile};

/// Default edge length of a square tile, in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// The visible window onto the tile pyramid, in whole tiles.
///
/// Pixel dimensions plus a zoom level and a tile-space origin. The viewport
/// clamps the visible range to `[0, 2^zoom)` on both axes; nothing further
/// down the pipeline validates pyramid bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width_px: u32,
    pub height_px: u32,
    pub zoom: u8,
    pub origin_column: u32,
    pub origin_row: u32,
}

impl Viewport {
    /// Viewport anchored at the pyramid origin.
    pub fn new(width_px: u32, height_px: u32, zoom: u8) -> Self {
        Self {
            width_px,
            height_px,
            zoom,
            origin_column: 0,
            origin_row: 0,
        }
    }

    /// Move the tile-space origin.
    pub fn with_origin(mut self, column: u32, row: u32) -> Self {
        self.origin_column = column;
        self.origin_row = row;
        self
    }

    /// The set of tile keys covering the viewport, clamped to the pyramid.
    pub fn visible_tiles(&self, tile_size: u32) -> Vec<TileKey> {
        let tile_size = tile_size.max(1);
        let across = tiles_across(self.zoom);
        let end_column = self
            .origin_column
            .saturating_add(self.width_px.div_ceil(tile_size))
            .min(across);
        let end_row = self
            .origin_row
            .saturating_add(self.height_px.div_ceil(tile_size))
            .min(across);

        let mut keys = Vec::new();
        for column in self.origin_column..end_column {
            for row in self.origin_row..end_row {
                keys.push(TileKey::new(self.zoom, column, row));
            }
        }
        keys
    }
}

/// The render-thread seam to the external renderer's texture management.
///
/// Implementations create a GPU texture from decoded RGBA pixels and destroy
/// it on eviction. Both methods are only ever called from the thread that
/// owns the [`TileView`], which is pinned to the render thread.
pub trait TextureUploader {
    /// Opaque GPU-resident texture handle.
    type Handle;

    /// Creates a texture from the tile's RGBA pixels.
    fn upload(&mut self, key: TileKey, tile: &UploadedTile) -> Self::Handle;

    /// Destroys a texture that is leaving the resident set.
    fn discard(&mut self, key: TileKey, handle: Self::Handle);
}

/// A resident tile's handle plus the last frame it was visible,
/// used to pick eviction victims.
struct ResidentTile<H> {
    handle: H,
    last_visible_frame: u64,
}

/// A drawable tile for the current frame: resident texture plus its position
/// in viewport pixel space.
pub struct TilePlacement<'a, H> {
    pub key: TileKey,
    pub handle: &'a H,
    pub x_px: i64,
    pub y_px: i64,
}

/// Per-frame consumer of the pipeline; owns the GPU resident set.
///
/// ```compile_fail
/// use tilestream::coord::TileKey;
/// use tilestream::upload::UploadedTile;
/// use tilestream::view::{TextureUploader, TileView};
///
/// struct Noop;
/// impl TextureUploader for Noop {
///     type Handle = ();
///     fn upload(&mut self, _: TileKey, _: &UploadedTile) {}
///     fn discard(&mut self, _: TileKey, _: ()) {}
/// }
///
/// // Texture handles are render-thread-affine: the view cannot cross threads.
/// fn require_send<T: Send>() {}
/// require_send::<TileView<Noop>>();
/// ```
pub struct TileView<U: TextureUploader> {
    pool: WorkerPool,
    uploads: UploadReceiver,
    resident: HashMap<TileKey, ResidentTile<U::Handle>>,
    tile_size: u32,
    resident_budget: Option<usize>,
    frame: u64,
    /// Pins the view (and every handle in it) to the constructing thread.
    _render_affinity: PhantomData<*const ()>,
}

impl<U: TextureUploader> TileView<U> {
    /// Wraps the pool and the upload queue's consumer half.
    pub fn new(pool: WorkerPool, uploads: UploadReceiver) -> Self {
        Self {
            pool,
            uploads,
            resident: HashMap::new(),
            tile_size: DEFAULT_TILE_SIZE,
            resident_budget: None,
            frame: 0,
            _render_affinity: PhantomData,
        }
    }

    /// Set the tile edge length in pixels.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    /// Cap the number of GPU-resident tiles; when exceeded, non-visible
    /// tiles are evicted least-recently-visible first. `None` (the default)
    /// disables eviction.
    pub fn with_resident_budget(mut self, budget: Option<usize>) -> Self {
        self.resident_budget = budget;
        self
    }

    /// Advances one frame: request missing visible tiles, drain the upload
    /// queue into textures, then apply the resident budget.
    ///
    /// Never blocks on I/O; the only work here is the texture uploads
    /// themselves.
    pub fn frame(&mut self, viewport: &Viewport, uploader: &mut U) {
        self.frame += 1;
        let visible = viewport.visible_tiles(self.tile_size);

        for &key in &visible {
            if let Some(resident) = self.resident.get_mut(&key) {
                resident.last_visible_frame = self.frame;
            } else {
                // The claim check makes the per-frame rescan free for keys
                // already in flight, ready or failed.
                self.pool.submit(key);
            }
        }

        let frame = self.frame;
        for tile in self.uploads.drain() {
            let key = tile.key;
            let handle = uploader.upload(key, &tile);
            self.resident.insert(
                key,
                ResidentTile {
                    handle,
                    last_visible_frame: frame,
                },
            );
            // `tile` drops here: the pixel buffer is freed at upload and
            // nowhere else.
        }

        if let Some(budget) = self.resident_budget {
            if self.resident.len() > budget {
                self.evict_over_budget(budget, &visible, uploader);
            }
        }
    }

    fn evict_over_budget(&mut self, budget: usize, visible: &[TileKey], uploader: &mut U) {
        let visible: HashSet<TileKey> = visible.iter().copied().collect();
        let mut candidates: Vec<(TileKey, u64)> = self
            .resident
            .iter()
            .filter(|(key, _)| !visible.contains(key))
            .map(|(key, tile)| (*key, tile.last_visible_frame))
            .collect();
        candidates.sort_by_key(|(_, last_visible)| *last_visible);

        for (key, _) in candidates {
            if self.resident.len() <= budget {
                break;
            }
            if let Some(tile) = self.resident.remove(&key) {
                uploader.discard(key, tile.handle);
                self.pool.cache().evict(key);
                debug!(%key, "evicted resident tile over budget");
            }
        }
    }

    /// Drawable tiles for this viewport: every visible, resident tile with
    /// its pixel-space position at `(column * tile_size, row * tile_size)`
    /// relative to the viewport origin. Tiles not yet resident are simply
    /// absent.
    pub fn placements(&self, viewport: &Viewport) -> Vec<TilePlacement<'_, U::Handle>> {
        let tile_size = i64::from(self.tile_size);
        viewport
            .visible_tiles(self.tile_size)
            .into_iter()
            .filter_map(|key| {
                self.resident.get(&key).map(|tile| TilePlacement {
                    key,
                    handle: &tile.handle,
                    x_px: (i64::from(key.column()) - i64::from(viewport.origin_column)) * tile_size,
                    y_px: (i64::from(key.row()) - i64::from(viewport.origin_row)) * tile_size,
                })
            })
            .collect()
    }

    /// Reset a `Failed` tile and resubmit it. Returns `false` unless the
    /// key was actually in `Failed` state.
    pub fn retry(&self, key: TileKey) -> bool {
        self.pool.cache().retry(key) && self.pool.submit(key)
    }

    /// Whether a tile has a GPU-resident texture.
    pub fn is_resident(&self, key: TileKey) -> bool {
        self.resident.contains_key(&key)
    }

    /// Number of GPU-resident tiles.
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// The worker pool, for status queries on the underlying cache.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Tears the view down: destroys every resident texture, then shuts the
    /// pool down with the given grace period.
    pub fn shutdown(mut self, uploader: &mut U, grace: Duration) {
        for (key, tile) in self.resident.drain() {
            uploader.discard(key, tile.handle);
        }
        self.pool.shutdown(grace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{CountingFetcher, MemoryStore, StubDecoder};
    use crate::cache::{TileAcquirer, TileCache, TileStatus};
    use crate::upload::upload_channel;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    struct RecordingUploader {
        uploads: Vec<TileKey>,
        discards: Vec<TileKey>,
        next_id: u32,
    }

    impl RecordingUploader {
        fn new() -> Self {
            Self {
                uploads: Vec::new(),
                discards: Vec::new(),
                next_id: 0,
            }
        }
    }

    impl TextureUploader for RecordingUploader {
        type Handle = u32;

        fn upload(&mut self, key: TileKey, tile: &UploadedTile) -> u32 {
            assert_eq!(key, tile.key);
            self.uploads.push(key);
            self.next_id += 1;
            self.next_id
        }

        fn discard(&mut self, key: TileKey, _handle: u32) {
            self.discards.push(key);
        }
    }

    fn view_with(fetcher: CountingFetcher) -> (TileView<RecordingUploader>, Arc<dyn TileAcquirer>) {
        let cache: Arc<dyn TileAcquirer> =
            Arc::new(TileCache::new(MemoryStore::new(), fetcher, StubDecoder));
        let (tx, rx) = upload_channel();
        let pool = WorkerPool::spawn(Arc::clone(&cache), tx, 2).unwrap();
        (TileView::new(pool, rx), cache)
    }

    /// Runs frames until the predicate holds or the timeout passes.
    fn frames_until<F>(
        view: &mut TileView<RecordingUploader>,
        viewport: &Viewport,
        uploader: &mut RecordingUploader,
        timeout: Duration,
        mut done: F,
    ) -> bool
    where
        F: FnMut(&TileView<RecordingUploader>) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            view.frame(viewport, uploader);
            if done(view) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_visible_tiles_covers_viewport() {
        let viewport = Viewport::new(800, 600, 3);
        let keys = viewport.visible_tiles(256);
        // ceil(800/256) = 4 columns, ceil(600/256) = 3 rows.
        assert_eq!(keys.len(), 12);
        assert!(keys.contains(&TileKey::new(3, 0, 0)));
        assert!(keys.contains(&TileKey::new(3, 3, 2)));
        assert!(!keys.contains(&TileKey::new(3, 4, 0)));
    }

    #[test]
    fn test_visible_tiles_clamped_to_pyramid() {
        // Zoom 1 has only 2x2 tiles no matter how large the window is.
        let viewport = Viewport::new(4000, 4000, 1);
        assert_eq!(viewport.visible_tiles(256).len(), 4);

        // An origin at the pyramid edge leaves a single column.
        let viewport = Viewport::new(800, 300, 1).with_origin(1, 0);
        let keys = viewport.visible_tiles(256);
        assert_eq!(keys, vec![TileKey::new(1, 1, 0), TileKey::new(1, 1, 1)]);
    }

    #[test]
    fn test_visible_tiles_origin_past_edge_is_empty() {
        let viewport = Viewport::new(800, 600, 1).with_origin(5, 5);
        assert!(viewport.visible_tiles(256).is_empty());
    }

    #[test]
    fn test_frame_makes_visible_tile_resident() {
        let (mut view, _cache) = view_with(CountingFetcher::ok(vec![1, 2, 3, 4]));
        let mut uploader = RecordingUploader::new();
        let viewport = Viewport::new(100, 100, 0); // single tile pyramid

        let key = TileKey::new(0, 0, 0);
        assert!(frames_until(
            &mut view,
            &viewport,
            &mut uploader,
            Duration::from_secs(2),
            |v| v.is_resident(key),
        ));

        assert_eq!(uploader.uploads, vec![key]);
        let placements = view.placements(&viewport);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].key, key);
        assert_eq!(placements[0].x_px, 0);
        assert_eq!(placements[0].y_px, 0);

        view.shutdown(&mut uploader, Duration::from_secs(1));
        assert_eq!(uploader.discards, vec![key]);
    }

    #[test]
    fn test_resident_tile_not_resubmitted() {
        let fetcher = CountingFetcher::ok(vec![1, 2, 3, 4]);
        let cache = Arc::new(TileCache::new(MemoryStore::new(), fetcher, StubDecoder));
        let acquirer: Arc<dyn TileAcquirer> = cache.clone();
        let (tx, rx) = upload_channel();
        let pool = WorkerPool::spawn(acquirer, tx, 2).unwrap();
        let mut view: TileView<RecordingUploader> = TileView::new(pool, rx);
        let mut uploader = RecordingUploader::new();
        let viewport = Viewport::new(100, 100, 0);

        let key = TileKey::new(0, 0, 0);
        assert!(frames_until(
            &mut view,
            &viewport,
            &mut uploader,
            Duration::from_secs(2),
            |v| v.is_resident(key),
        ));

        // Many further frames: no new fetches, no new uploads.
        for _ in 0..20 {
            view.frame(&viewport, &mut uploader);
        }
        assert_eq!(cache.fetcher().call_count(), 1);
        assert_eq!(uploader.uploads.len(), 1);

        view.shutdown(&mut uploader, Duration::from_secs(1));
    }

    #[test]
    fn test_failed_tile_never_becomes_resident() {
        let (mut view, cache) = view_with(CountingFetcher::status(404));
        let mut uploader = RecordingUploader::new();
        let viewport = Viewport::new(100, 100, 0);
        let key = TileKey::new(0, 0, 0);

        let resident = frames_until(
            &mut view,
            &viewport,
            &mut uploader,
            Duration::from_millis(300),
            |v| v.is_resident(key),
        );
        assert!(!resident);
        assert_eq!(cache.status(key), TileStatus::Failed);
        assert!(uploader.uploads.is_empty());
        assert!(view.placements(&viewport).is_empty());

        view.shutdown(&mut uploader, Duration::from_secs(1));
    }

    #[test]
    fn test_retry_resubmits_failed_tile() {
        let (mut view, cache) = view_with(CountingFetcher::status(500));
        let mut uploader = RecordingUploader::new();
        let viewport = Viewport::new(100, 100, 0);
        let key = TileKey::new(0, 0, 0);

        frames_until(
            &mut view,
            &viewport,
            &mut uploader,
            Duration::from_secs(2),
            |v| v.pool().cache().status(key) == TileStatus::Failed,
        );

        assert!(view.retry(key));
        // The retry claim is live again; a second retry while in flight or
        // failed-later is refused until the state settles.
        let deadline = Instant::now() + Duration::from_secs(2);
        while cache.status(key) != TileStatus::Failed && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(cache.status(key), TileStatus::Failed);
        assert!(cache.last_error(key).unwrap().contains("500"));

        view.shutdown(&mut uploader, Duration::from_secs(1));
    }

    #[test]
    fn test_eviction_respects_budget_and_visibility() {
        let (mut view, cache) = view_with(CountingFetcher::ok(vec![1, 2, 3, 4]));
        view = view.with_resident_budget(Some(2));
        let mut uploader = RecordingUploader::new();

        // Make all four zoom-1 tiles resident.
        let wide = Viewport::new(512, 512, 1);
        assert!(frames_until(
            &mut view,
            &wide,
            &mut uploader,
            Duration::from_secs(2),
            |v| v.resident_count() == 4,
        ));

        // Shrink to one visible tile: the budget pass trims to 2 residents,
        // keeping the visible one.
        let narrow = Viewport::new(256, 256, 1);
        view.frame(&narrow, &mut uploader);

        assert_eq!(view.resident_count(), 2);
        assert!(view.is_resident(TileKey::new(1, 0, 0)));
        assert_eq!(uploader.discards.len(), 2);
        for &key in &uploader.discards {
            // Evicted records are gone from the cache too, so the tiles can
            // be re-acquired (from disk) when they come back into view.
            assert_eq!(cache.status(key), TileStatus::Unrequested);
        }

        view.shutdown(&mut uploader, Duration::from_secs(1));
    }
}
