//! The tile cache state machine.
//!
//! [`TileCache`] orchestrates the persistent store and the remote fetcher
//! behind a single acquisition contract with one record per key:
//!
//! ```text
//! Unrequested ──claim──► Fetching ──► Decoding ──► Ready
//!                            │             │
//!                            └──────┬──────┘
//!                                 Failed ──retry──► Unrequested
//! ```
//!
//! Record creation is an atomic check-and-set under a single lock; a key
//! with an existing record cannot be claimed again. That one operation is
//! the in-flight de-duplication guarantee: a viewport rescanned every frame
//! re-requesting the same visible tile never fans out duplicate network or
//! disk work. Transitions are monotonic forward, except `Failed` which an
//! explicit [`retry`](TileAcquirer::retry) resets; the cache never retries
//! on its own.
//!
//! The lock guards only state transitions. All blocking work (disk read,
//! HTTP GET, write-back, decode) runs with the lock released, so concurrent
//! acquisitions of distinct keys proceed independently.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::coord::TileKey;
use crate::decode::{DecodeError, DecodedTile, TileDecoder};
use crate::fetch::{FetchError, TileFetcher};
use crate::store::{StoreError, TileStore};

/// Lifecycle of a tile within the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    /// No record exists for the key.
    Unrequested,
    /// A worker owns the key and is reading disk / fetching the network.
    Fetching,
    /// Raw bytes are in hand and being decoded.
    Decoding,
    /// Decoded pixels were produced and handed to the upload queue.
    Ready,
    /// Acquisition failed; see [`TileAcquirer::last_error`]. Stays failed
    /// until an explicit retry.
    Failed,
}

/// Terminal per-tile error: the union of the three recoverable failure
/// classes. A failed tile is simply a tile that never becomes `Ready`; it
/// does not affect any other key.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("disk cache: {0}")]
    Store(#[from] StoreError),

    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),

    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
}

/// Per-key record. At most one exists per key at any time.
#[derive(Debug)]
struct TileRecord {
    status: TileStatus,
    /// Rendered error descriptor, kept for diagnostics after a failure.
    error: Option<String>,
}

/// Object-safe acquisition interface over [`TileCache`].
///
/// The worker pool and view model hold `Arc<dyn TileAcquirer>` so they stay
/// independent of the concrete store / fetcher / decoder types.
pub trait TileAcquirer: Send + Sync {
    /// Atomically create the record for `key` in `Fetching` state.
    ///
    /// Returns `false` when a record already exists in any state - the
    /// caller must not start work for the key. This check-and-set is the
    /// de-duplication invariant, applied both at the pool's submission
    /// boundary and at the head of a direct acquisition.
    fn try_claim(&self, key: TileKey) -> bool;

    /// Run the acquisition ladder for a key whose claim the caller holds:
    /// disk lookup, on miss network fetch plus best-effort write-back,
    /// then decode. Sets the record to `Ready` or `Failed`.
    fn fulfil(&self, key: TileKey) -> Result<DecodedTile, TileError>;

    /// Drop an unfulfilled claim, returning the key to `Unrequested`.
    ///
    /// Used when queued work is discarded at shutdown.
    fn release(&self, key: TileKey);

    /// Reset a `Failed` key to `Unrequested` so it can be re-acquired.
    ///
    /// Returns `false` if the key was not in `Failed` state. The cache
    /// never does this automatically.
    fn retry(&self, key: TileKey) -> bool;

    /// Eviction hook: remove a settled (`Ready` or `Failed`) record.
    ///
    /// Returns `false` for absent or in-flight records; an in-flight record
    /// must not be removed or its key could be claimed twice.
    fn evict(&self, key: TileKey) -> bool;

    /// Current status of a key (`Unrequested` when no record exists).
    fn status(&self, key: TileKey) -> TileStatus;

    /// Error descriptor retained from the last failure of this key.
    fn last_error(&self, key: TileKey) -> Option<String>;

    /// Claim and fulfil in one call.
    ///
    /// Returns `None` when the claim is refused because the key is already
    /// in flight, ready or failed elsewhere - the caller starts no work.
    fn acquire(&self, key: TileKey) -> Option<Result<DecodedTile, TileError>> {
        if self.try_claim(key) {
            Some(self.fulfil(key))
        } else {
            None
        }
    }
}

/// Multi-tier tile cache: persistent store in front of the network, decoded
/// output handed to the caller exactly once per key.
///
/// Generic over its collaborators so tests can inject mocks; production code
/// uses `DiskTileStore` + `HttpTileFetcher<ReqwestClient>` + `ImageDecoder`
/// (see [`crate::app::bootstrap`]).
pub struct TileCache<S, F, D> {
    store: S,
    fetcher: F,
    decoder: D,
    records: Mutex<HashMap<TileKey, TileRecord>>,
}

impl<S, F, D> TileCache<S, F, D>
where
    S: TileStore,
    F: TileFetcher,
    D: TileDecoder,
{
    pub fn new(store: S, fetcher: F, decoder: D) -> Self {
        Self {
            store,
            fetcher,
            decoder,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Number of records currently held (any state).
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// The persistent store collaborator.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The remote fetcher collaborator.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn set_status(&self, key: TileKey, status: TileStatus) {
        if let Some(record) = self.records.lock().get_mut(&key) {
            record.status = status;
        }
    }

    /// The acquisition ladder. Runs without the record lock held.
    fn run(&self, key: TileKey) -> Result<DecodedTile, TileError> {
        let raw = match self.store.get(key) {
            Ok(Some(bytes)) => {
                debug!(%key, size_bytes = bytes.len(), "disk cache hit");
                bytes
            }
            Ok(None) => self.download(key)?,
            Err(e) => {
                // A broken disk read is treated as a miss, not a failure.
                warn!(%key, error = %e, "disk read failed, falling through to network");
                self.download(key)?
            }
        };

        self.set_status(key, TileStatus::Decoding);
        let tile = self.decoder.decode(&raw)?;
        debug!(%key, width = tile.width, height = tile.height, "tile decoded");
        Ok(tile)
    }

    fn download(&self, key: TileKey) -> Result<Vec<u8>, TileError> {
        let bytes = self.fetcher.fetch(key)?;
        debug!(%key, size_bytes = bytes.len(), "tile fetched");
        if let Err(e) = self.store.put(key, &bytes) {
            // The bytes are still usable for this session.
            warn!(%key, error = %e, "disk write-back failed");
        }
        Ok(bytes)
    }
}

impl<S, F, D> TileAcquirer for TileCache<S, F, D>
where
    S: TileStore,
    F: TileFetcher,
    D: TileDecoder,
{
    fn try_claim(&self, key: TileKey) -> bool {
        match self.records.lock().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(TileRecord {
                    status: TileStatus::Fetching,
                    error: None,
                });
                true
            }
        }
    }

    fn fulfil(&self, key: TileKey) -> Result<DecodedTile, TileError> {
        match self.run(key) {
            Ok(tile) => {
                self.set_status(key, TileStatus::Ready);
                Ok(tile)
            }
            Err(e) => {
                let mut records = self.records.lock();
                if let Some(record) = records.get_mut(&key) {
                    record.status = TileStatus::Failed;
                    record.error = Some(e.to_string());
                }
                drop(records);
                warn!(%key, error = %e, "tile acquisition failed");
                Err(e)
            }
        }
    }

    fn release(&self, key: TileKey) {
        let mut records = self.records.lock();
        if records
            .get(&key)
            .is_some_and(|r| r.status == TileStatus::Fetching)
        {
            records.remove(&key);
        }
    }

    fn retry(&self, key: TileKey) -> bool {
        let mut records = self.records.lock();
        if records
            .get(&key)
            .is_some_and(|r| r.status == TileStatus::Failed)
        {
            records.remove(&key);
            true
        } else {
            false
        }
    }

    fn evict(&self, key: TileKey) -> bool {
        let mut records = self.records.lock();
        match records.get(&key).map(|r| r.status) {
            Some(TileStatus::Ready) | Some(TileStatus::Failed) => {
                records.remove(&key);
                true
            }
            _ => false,
        }
    }

    fn status(&self, key: TileKey) -> TileStatus {
        self.records
            .lock()
            .get(&key)
            .map(|r| r.status)
            .unwrap_or(TileStatus::Unrequested)
    }

    fn last_error(&self, key: TileKey) -> Option<String> {
        self.records.lock().get(&key).and_then(|r| r.error.clone())
    }
}
