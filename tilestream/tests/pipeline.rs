//! End-to-end pipeline tests: disk store, fetcher, decode, worker pool,
//! upload queue and view model wired together with a scripted HTTP client.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tilestream::cache::{TileAcquirer, TileCache, TileStatus};
use tilestream::coord::TileKey;
use tilestream::decode::ImageDecoder;
use tilestream::fetch::{FetchError, HttpClient, HttpTileFetcher};
use tilestream::pool::WorkerPool;
use tilestream::store::{DiskTileStore, TileStore};
use tilestream::upload::{upload_channel, UploadedTile};
use tilestream::view::{TextureUploader, TileView, Viewport};

/// Encodes a solid-colour PNG the size of a real tile payload.
fn png_bytes(rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba(rgba));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Scripted HTTP client: serves a fixed PNG body, or 404 for matching URLs.
struct ScriptedClient {
    body: Vec<u8>,
    not_found: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn serving(body: Vec<u8>) -> Self {
        Self {
            body,
            not_found: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn not_found_for(mut self, url_fragment: impl Into<String>) -> Self {
        self.not_found.push(url_fragment.into());
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HttpClient for ScriptedClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.not_found.iter().any(|f| url.contains(f)) {
            return Err(FetchError::Status {
                status: 404,
                url: url.to_string(),
            });
        }
        Ok(self.body.clone())
    }
}

struct RecordingUploader {
    uploads: Vec<TileKey>,
    next_id: u32,
}

impl RecordingUploader {
    fn new() -> Self {
        Self {
            uploads: Vec::new(),
            next_id: 0,
        }
    }
}

impl TextureUploader for RecordingUploader {
    type Handle = u32;

    fn upload(&mut self, key: TileKey, tile: &UploadedTile) -> u32 {
        // Decoded output is always RGBA: 4 bytes per pixel.
        assert_eq!(
            tile.pixels.len(),
            (tile.width * tile.height * 4) as usize,
            "pixel buffer must be tightly packed RGBA"
        );
        self.uploads.push(key);
        self.next_id += 1;
        self.next_id
    }

    fn discard(&mut self, _key: TileKey, _handle: u32) {}
}

type TestCache = TileCache<DiskTileStore, HttpTileFetcher<ScriptedClient>, ImageDecoder>;

fn build(
    root: &std::path::Path,
    client: ScriptedClient,
    workers: usize,
) -> (Arc<TestCache>, WorkerPool, tilestream::upload::UploadReceiver) {
    let fetcher = HttpTileFetcher::new(client, "https://tiles.example/{z}/{x}/{y}.png");
    let cache = Arc::new(TileCache::new(
        DiskTileStore::new(root),
        fetcher,
        ImageDecoder,
    ));
    let acquirer: Arc<dyn TileAcquirer> = cache.clone();
    let (tx, rx) = upload_channel();
    let pool = WorkerPool::spawn(acquirer, tx, workers).unwrap();
    (cache, pool, rx)
}

fn frames_until_resident(
    view: &mut TileView<RecordingUploader>,
    viewport: &Viewport,
    uploader: &mut RecordingUploader,
    key: TileKey,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        view.frame(viewport, uploader);
        if view.is_resident(key) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn fresh_tile_is_fetched_cached_and_uploaded() {
    let dir = tempfile::tempdir().unwrap();
    let body = png_bytes([200, 100, 50, 255]);
    let (cache, pool, uploads) = build(dir.path(), ScriptedClient::serving(body.clone()), 4);

    let mut view = TileView::new(pool, uploads);
    let mut uploader = RecordingUploader::new();
    let viewport = Viewport::new(256, 256, 1);
    let key = TileKey::new(1, 0, 0);

    assert!(frames_until_resident(
        &mut view,
        &viewport,
        &mut uploader,
        key,
        Duration::from_secs(5),
    ));

    // Exactly one fetch despite a submit attempt every frame.
    assert_eq!(cache.fetcher().http_client().call_count(), 1);
    assert_eq!(cache.status(key), TileStatus::Ready);

    // Write-back landed on disk with the exact served bytes.
    assert_eq!(cache.store().get(key).unwrap(), Some(body));
    assert!(dir.path().join("1/0/0.png").is_file());

    // The resident set yields a placement for the renderer.
    let placements = view.placements(&viewport);
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].key, key);
    assert_eq!((placements[0].x_px, placements[0].y_px), (0, 0));
    assert_eq!(uploader.uploads, vec![key]);

    view.shutdown(&mut uploader, Duration::from_secs(1));
}

#[test]
fn http_404_leaves_failed_record_no_disk_entry_no_residency() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::serving(png_bytes([0, 0, 0, 255])).not_found_for("/1/0/0.png");
    let (cache, pool, uploads) = build(dir.path(), client, 2);

    let mut view = TileView::new(pool, uploads);
    let mut uploader = RecordingUploader::new();
    let viewport = Viewport::new(256, 256, 1);
    let key = TileKey::new(1, 0, 0);

    assert!(!frames_until_resident(
        &mut view,
        &viewport,
        &mut uploader,
        key,
        Duration::from_millis(500),
    ));

    assert_eq!(cache.status(key), TileStatus::Failed);
    assert!(cache.last_error(key).unwrap().contains("404"));
    assert_eq!(cache.store().get(key).unwrap(), None);
    assert!(uploader.uploads.is_empty());

    view.shutdown(&mut uploader, Duration::from_secs(1));
}

#[test]
fn failure_of_one_key_does_not_affect_others() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::serving(png_bytes([10, 20, 30, 255])).not_found_for("/1/0/0.png");
    let (cache, pool, uploads) = build(dir.path(), client, 4);

    let mut view = TileView::new(pool, uploads);
    let mut uploader = RecordingUploader::new();
    // Zoom 1 viewport covering all four tiles; (1,0,0) is scripted to 404.
    let viewport = Viewport::new(512, 512, 1);

    let deadline = Instant::now() + Duration::from_secs(5);
    while view.resident_count() < 3 && Instant::now() < deadline {
        view.frame(&viewport, &mut uploader);
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(view.resident_count(), 3);
    assert!(!view.is_resident(TileKey::new(1, 0, 0)));
    assert_eq!(cache.status(TileKey::new(1, 0, 0)), TileStatus::Failed);
    assert_eq!(cache.status(TileKey::new(1, 1, 1)), TileStatus::Ready);

    view.shutdown(&mut uploader, Duration::from_secs(1));
}

#[test]
fn concurrent_submissions_of_fresh_key_fetch_once() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, pool, uploads) = build(dir.path(), ScriptedClient::serving(png_bytes([1, 2, 3, 255])), 4);

    let key = TileKey::new(2, 1, 1);
    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| pool.submit(key));
        }
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while uploads.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(uploads.drain().count(), 1);
    assert_eq!(cache.fetcher().http_client().call_count(), 1);

    pool.shutdown(Duration::from_secs(1));
}

#[test]
fn disk_hit_skips_network_entirely() {
    let dir = tempfile::tempdir().unwrap();
    let key = TileKey::new(3, 2, 5);

    // Seed the disk cache out of band.
    DiskTileStore::new(dir.path())
        .put(key, &png_bytes([9, 9, 9, 255]))
        .unwrap();

    let (cache, pool, uploads) = build(dir.path(), ScriptedClient::serving(Vec::new()), 2);

    assert!(pool.submit(key));
    let deadline = Instant::now() + Duration::from_secs(5);
    while uploads.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let tile = uploads.try_recv().unwrap();
    assert_eq!(tile.key, key);
    assert_eq!((tile.width, tile.height), (4, 4));
    assert_eq!(cache.fetcher().http_client().call_count(), 0);

    pool.shutdown(Duration::from_secs(1));
}
