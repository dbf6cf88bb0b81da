//! Application wiring: configuration and pipeline bootstrap.
//!
//! [`Config`] is the single configuration surface for the pipeline;
//! [`bootstrap`] assembles the production collaborators (disk store, HTTP
//! fetcher, image decoder, worker pool, upload channel) from it. The
//! embedding application keeps the returned [`Pipeline`] on its render
//! thread and wraps it in a [`crate::view::TileView`].

mod bootstrap;
mod config;
mod error;

pub use bootstrap::{bootstrap, DefaultTileCache, Pipeline};
pub use config::Config;
pub use error::AppError;
