//! Tilestream - asynchronous tile acquisition for slippy-map rendering.
//!
//! A raster map is drawn from square image tiles addressed by
//! `(zoom, column, row)`. The hard part is not drawing a textured quad; it
//! is getting tiles from a remote server onto the GPU without ever blocking
//! the render thread and without duplicating in-flight work. This crate is
//! that pipeline:
//!
//! ```text
//! viewport ──► visible TileKeys ──► WorkerPool ──► TileCache::fulfil
//!                                                  (disk ► network ► decode)
//!                 render thread ◄── UploadQueue ◄── decoded RGBA
//!                 (texture upload, resident set)
//! ```
//!
//! - [`coord`] - tile addressing.
//! - [`store`] - persistent disk cache, one file per tile, atomic writes.
//! - [`fetch`] - blocking HTTP fetch against a templated tile-server URL.
//! - [`decode`] - raw bytes to RGBA pixels.
//! - [`cache`] - the per-tile state machine with in-flight de-duplication.
//! - [`pool`] - background workers running the blocking acquisition ladder.
//! - [`upload`] - the single-consumer hand-off to the render thread.
//! - [`view`] - per-frame integration and the GPU resident set.
//! - [`app`] - configuration and pipeline assembly.
//!
//! Windowing, input and the actual quad rendering are the embedding
//! application's business; it implements [`view::TextureUploader`] and calls
//! [`view::TileView::frame`] once per frame on the render thread.

pub mod app;
pub mod cache;
pub mod coord;
pub mod decode;
pub mod fetch;
pub mod pool;
pub mod store;
pub mod upload;
pub mod view;

pub use app::{bootstrap, AppError, Config, Pipeline};
pub use cache::{TileAcquirer, TileCache, TileError, TileStatus};
pub use coord::TileKey;
pub use decode::{DecodeError, DecodedTile, ImageDecoder, TileDecoder};
pub use fetch::{FetchError, HttpTileFetcher, ReqwestClient, TileFetcher};
pub use pool::WorkerPool;
pub use store::{DiskTileStore, StoreError, TileStore};
pub use upload::{upload_channel, UploadReceiver, UploadSender, UploadedTile};
pub use view::{TextureUploader, TilePlacement, TileView, Viewport};
