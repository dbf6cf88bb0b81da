//! Assembly of the production pipeline from a [`Config`].

use std::sync::Arc;

use tracing::info;

use super::config::Config;
use super::error::AppError;
use crate::cache::{TileAcquirer, TileCache};
use crate::decode::ImageDecoder;
use crate::fetch::{HttpTileFetcher, ReqwestClient};
use crate::pool::WorkerPool;
use crate::store::DiskTileStore;
use crate::upload::{upload_channel, UploadReceiver};

/// The concrete cache type assembled by [`bootstrap`].
pub type DefaultTileCache = TileCache<DiskTileStore, HttpTileFetcher<ReqwestClient>, ImageDecoder>;

/// A running pipeline: the worker pool plus the consumer half of the upload
/// queue.
///
/// Keep this on the render thread and wrap it in a
/// [`TileView`](crate::view::TileView):
///
/// ```no_run
/// use tilestream::app::{bootstrap, Config};
/// use tilestream::view::TileView;
/// # use tilestream::coord::TileKey;
/// # use tilestream::upload::UploadedTile;
/// # use tilestream::view::TextureUploader;
/// # struct MyUploader;
/// # impl TextureUploader for MyUploader {
/// #     type Handle = u32;
/// #     fn upload(&mut self, _: TileKey, _: &UploadedTile) -> u32 { 0 }
/// #     fn discard(&mut self, _: TileKey, _: u32) {}
/// # }
///
/// let config = Config::new("/var/cache/tilestream");
/// let pipeline = bootstrap(&config).unwrap();
/// let view: TileView<MyUploader> = TileView::new(pipeline.pool, pipeline.uploads)
///     .with_tile_size(config.tile_size_px)
///     .with_resident_budget(config.resident_budget);
/// ```
pub struct Pipeline {
    pub pool: WorkerPool,
    pub uploads: UploadReceiver,
}

/// Builds the production pipeline: disk store, HTTP fetcher, image decoder,
/// worker pool and upload channel.
pub fn bootstrap(config: &Config) -> Result<Pipeline, AppError> {
    let client = ReqwestClient::with_timeout(config.request_timeout)?;
    let fetcher = HttpTileFetcher::new(client, config.url_template.clone())
        .with_subdomains(config.subdomains.clone());
    let store = DiskTileStore::new(config.cache_dir.clone())
        .with_extension(config.tile_extension.clone());

    let cache: Arc<dyn TileAcquirer> = Arc::new(TileCache::new(store, fetcher, ImageDecoder));
    let (upload_tx, uploads) = upload_channel();
    let pool = WorkerPool::spawn(cache, upload_tx, config.worker_count)?;

    info!(
        cache_dir = %config.cache_dir.display(),
        workers = pool.worker_count(),
        template = %config.url_template,
        "tile pipeline started"
    );
    Ok(Pipeline { pool, uploads })
}
