//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::{DEFAULT_TIMEOUT, DEFAULT_URL_TEMPLATE};
use crate::pool::DEFAULT_WORKER_COUNT;
use crate::store::DEFAULT_EXTENSION;
use crate::view::DEFAULT_TILE_SIZE;

/// Default grace period granted to in-flight workers at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration surface for the tile pipeline.
///
/// Builder-style setters; only the cache root is mandatory.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tilestream::app::Config;
///
/// let config = Config::new("/var/cache/tilestream")
///     .with_worker_count(8)
///     .with_request_timeout(Duration::from_secs(10))
///     .with_resident_budget(Some(128));
/// assert_eq!(config.worker_count, 8);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the persistent tile cache.
    pub cache_dir: PathBuf,

    /// Tile-server URL template with `{z}`/`{x}`/`{y}` (and optional `{s}`)
    /// placeholders.
    pub url_template: String,

    /// Subdomain shards substituted for `{s}`.
    pub subdomains: Vec<String>,

    /// Number of background worker threads.
    pub worker_count: usize,

    /// Edge length of a square tile, in pixels.
    pub tile_size_px: u32,

    /// Bound on each HTTP request.
    pub request_timeout: Duration,

    /// Optional cap on GPU-resident tiles (`None` = unbounded).
    pub resident_budget: Option<usize>,

    /// How long shutdown waits for in-flight acquisitions.
    pub shutdown_grace: Duration,

    /// File extension for tiles in the disk cache.
    pub tile_extension: String,
}

impl Config {
    /// Configuration with defaults for the OpenStreetMap standard layer.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            subdomains: vec!["a".into(), "b".into(), "c".into()],
            worker_count: DEFAULT_WORKER_COUNT,
            tile_size_px: DEFAULT_TILE_SIZE,
            request_timeout: DEFAULT_TIMEOUT,
            resident_budget: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            tile_extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    pub fn with_subdomains(mut self, subdomains: Vec<String>) -> Self {
        self.subdomains = subdomains;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_tile_size(mut self, tile_size_px: u32) -> Self {
        self.tile_size_px = tile_size_px;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_resident_budget(mut self, budget: Option<usize>) -> Self {
        self.resident_budget = budget;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_tile_extension(mut self, extension: impl Into<String>) -> Self {
        self.tile_extension = extension.into();
        self
    }
}
