//! Remote tile fetching over HTTP.
//!
//! A fetch is a single blocking GET against a templated tile-server URL with
//! `{z}`, `{x}`, `{y}` substituted from the key and `{s}` rotated over a
//! configured subdomain list. Every request carries a fixed identifying
//! `User-Agent`. The fetcher performs no retries - retry policy belongs to
//! the caller.
//!
//! HTTP transport sits behind the [`HttpClient`] trait so tests can inject a
//! mock and count calls.

use std::time::Duration;

use thiserror::Error;

use crate::coord::TileKey;

/// Identifying header sent with every tile request.
pub const USER_AGENT: &str = concat!("tilestream/", env!("CARGO_PKG_VERSION"));

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default slippy-map URL template (OpenStreetMap standard layer).
pub const DEFAULT_URL_TEMPLATE: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Errors from a tile fetch.
///
/// Every variant is local and recoverable: a failed fetch marks one tile
/// `Failed` and nothing else.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Transport-level failure: connection refused, DNS, timeout, TLS.
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
}

/// Trait for HTTP GET operations.
///
/// This abstraction allows dependency injection of a mock client in tests.
pub trait HttpClient: Send + Sync {
    /// Performs a blocking HTTP GET and returns the response body.
    ///
    /// Any non-2xx status must be reported as [`FetchError::Status`].
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Real HTTP client implementation using `reqwest::blocking`.
///
/// The client is built once with a bounded request timeout and the fixed
/// [`USER_AGENT`], so both apply to every request it issues.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client with the default 30 second timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Transport(format!("failed to read response: {}", e)))
    }
}

/// Fetches raw tile bytes for a key.
pub trait TileFetcher: Send + Sync {
    /// Issues one blocking GET for the tile. No retries.
    fn fetch(&self, key: TileKey) -> Result<Vec<u8>, FetchError>;
}

/// [`TileFetcher`] backed by a templated tile-server URL.
///
/// # URL template
///
/// Placeholders `{z}`, `{x}` (column) and `{y}` (row) are substituted from
/// the key. `{s}`, if present, is replaced with one of the configured
/// subdomains, chosen deterministically from the key so repeated requests
/// for the same tile hit the same shard while the overall load spreads.
///
/// # Example
///
/// ```
/// use tilestream::coord::TileKey;
/// use tilestream::fetch::{FetchError, HttpClient, HttpTileFetcher};
///
/// struct NoopClient;
/// impl HttpClient for NoopClient {
///     fn get(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
///         Ok(Vec::new())
///     }
/// }
///
/// let fetcher = HttpTileFetcher::new(NoopClient, "https://tiles.example/{z}/{x}/{y}.png");
/// assert_eq!(
///     fetcher.build_url(TileKey::new(3, 4, 2)),
///     "https://tiles.example/3/4/2.png"
/// );
/// ```
pub struct HttpTileFetcher<C: HttpClient> {
    http_client: C,
    template: String,
    subdomains: Vec<String>,
}

impl<C: HttpClient> HttpTileFetcher<C> {
    /// Creates a fetcher for the given URL template with no subdomain list.
    pub fn new(http_client: C, template: impl Into<String>) -> Self {
        Self {
            http_client,
            template: template.into(),
            subdomains: Vec::new(),
        }
    }

    /// The underlying HTTP client.
    pub fn http_client(&self) -> &C {
        &self.http_client
    }

    /// Set the subdomain shards substituted for `{s}`.
    pub fn with_subdomains(mut self, subdomains: Vec<String>) -> Self {
        self.subdomains = subdomains;
        self
    }

    /// Builds the request URL for the given key.
    pub fn build_url(&self, key: TileKey) -> String {
        let mut url = self
            .template
            .replace("{z}", &key.zoom().to_string())
            .replace("{x}", &key.column().to_string())
            .replace("{y}", &key.row().to_string());
        if url.contains("{s}") {
            url = url.replace("{s}", self.subdomain_for(key));
        }
        url
    }

    /// Deterministic shard choice: same key, same subdomain.
    fn subdomain_for(&self, key: TileKey) -> &str {
        if self.subdomains.is_empty() {
            return "";
        }
        let index = (key.column() as u64 + key.row() as u64 + u64::from(key.zoom()))
            % self.subdomains.len() as u64;
        &self.subdomains[index as usize]
    }
}

impl<C: HttpClient> TileFetcher for HttpTileFetcher<C> {
    fn fetch(&self, key: TileKey) -> Result<Vec<u8>, FetchError> {
        let url = self.build_url(key);
        self.http_client.get(&url)
    }
}
