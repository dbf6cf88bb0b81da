//! Background worker pool for tile acquisition.
//!
//! A fixed set of OS threads pulls pending [`TileKey`]s from an unbounded
//! work queue and runs the cache's acquisition ladder. All blocking work
//! (disk, network, decode) happens here; the render thread only ever calls
//! the non-blocking [`WorkerPool::submit`].
//!
//! De-duplication is enforced at the submission boundary: `submit` claims
//! the key via the cache's check-and-set before enqueueing, so a key that is
//! already in flight, ready or failed is a no-op. A worker therefore always
//! owns the claim for every key it pops.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::cache::TileAcquirer;
use crate::coord::TileKey;
use crate::upload::{UploadSender, UploadedTile};

/// Default number of worker threads.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Poll interval while waiting out the shutdown grace period.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bounded pool of background workers feeding the upload queue.
pub struct WorkerPool {
    tx: Sender<TileKey>,
    rx: Receiver<TileKey>,
    handles: Vec<JoinHandle<()>>,
    cache: Arc<dyn TileAcquirer>,
}

impl WorkerPool {
    /// Spawns `worker_count` threads (clamped to at least one).
    ///
    /// # Errors
    ///
    /// Fails only if the OS refuses to spawn a thread.
    pub fn spawn(
        cache: Arc<dyn TileAcquirer>,
        uploads: UploadSender,
        worker_count: usize,
    ) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<TileKey>();
        let mut handles = Vec::new();
        for index in 0..worker_count.max(1) {
            let rx = rx.clone();
            let cache = Arc::clone(&cache);
            let uploads = uploads.clone();
            let handle = thread::Builder::new()
                .name(format!("tile-worker-{index}"))
                .spawn(move || worker_loop(rx, cache, uploads))?;
            handles.push(handle);
        }
        Ok(Self {
            tx,
            rx,
            handles,
            cache,
        })
    }

    /// Requests acquisition of a tile.
    ///
    /// No-op returning `false` when the key already has a record in any
    /// state (`Fetching`, `Decoding`, `Ready` or `Failed`) - the per-frame
    /// viewport rescan can call this freely without fanning out duplicate
    /// work. Returns `true` when the key was claimed and enqueued.
    pub fn submit(&self, key: TileKey) -> bool {
        if !self.cache.try_claim(key) {
            return false;
        }
        if self.tx.send(key).is_err() {
            // Workers are gone; don't strand the claim.
            self.cache.release(key);
            return false;
        }
        true
    }

    /// The cache this pool feeds, for retry/eviction/status queries.
    pub fn cache(&self) -> &Arc<dyn TileAcquirer> {
        &self.cache
    }

    /// Number of submitted keys not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Shuts the pool down.
    ///
    /// Queued-but-unstarted keys are dropped and their claims released so
    /// they return to `Unrequested`. In-flight acquisitions may finish
    /// within the grace period; workers still busy after it are abandoned
    /// (their threads exit once the current acquisition returns).
    pub fn shutdown(self, grace: Duration) {
        let Self {
            tx,
            rx,
            handles,
            cache,
        } = self;

        // Closing the sender stops further pickups once the queue is empty.
        drop(tx);
        let mut dropped = 0usize;
        while let Ok(key) = rx.try_recv() {
            cache.release(key);
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "dropped queued tile requests at shutdown");
        }

        let deadline = Instant::now() + grace;
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL_INTERVAL);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(
                    worker = ?handle.thread().name(),
                    "worker still in flight after grace period, abandoning"
                );
            }
        }
    }
}

fn worker_loop(rx: Receiver<TileKey>, cache: Arc<dyn TileAcquirer>, uploads: UploadSender) {
    // The claim was taken at submit time; fulfil directly.
    while let Ok(key) = rx.recv() {
        match cache.fulfil(key) {
            Ok(tile) => {
                if uploads.send(UploadedTile::new(key, tile)).is_err() {
                    debug!(%key, "upload consumer gone, dropping decoded tile");
                }
            }
            Err(_) => {
                // Already logged and recorded on the key by the cache;
                // the pool keeps running.
            }
        }
    }
}
