//! Upload queue: the worker-to-render-thread hand-off.
//!
//! A multi-producer, single-consumer, unbounded channel carrying decoded
//! pixel buffers. Producers are worker threads on acquisition success; the
//! sole consumer is the render thread, which drains non-blockingly each
//! frame. This is the only path by which tile data crosses into
//! render-thread-owned state - no worker thread ever touches a GPU resource.
//!
//! The channel preserves each producer's completion order, but completion
//! order has no relation to submission order: a small tile submitted late
//! can arrive before a large one submitted early.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::coord::TileKey;
use crate::decode::DecodedTile;

/// A decoded tile in transit to the render thread.
///
/// Owns its RGBA pixel buffer; ownership passes to the consumer, which frees
/// the buffer when (and only when) the texture upload happens.
#[derive(Debug)]
pub struct UploadedTile {
    pub key: TileKey,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl UploadedTile {
    pub fn new(key: TileKey, tile: DecodedTile) -> Self {
        Self {
            key,
            pixels: tile.pixels,
            width: tile.width,
            height: tile.height,
        }
    }
}

/// Creates a connected sender/receiver pair.
///
/// The receiver is deliberately not `Clone`: exactly one consumer exists.
pub fn upload_channel() -> (UploadSender, UploadReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (UploadSender { tx }, UploadReceiver { rx })
}

/// Producer half, cloned into every worker thread.
#[derive(Clone)]
pub struct UploadSender {
    tx: Sender<UploadedTile>,
}

impl UploadSender {
    /// Hands a decoded tile to the render thread.
    ///
    /// Returns the tile back if the consumer is gone (render loop shut
    /// down); the caller just drops it.
    pub fn send(&self, tile: UploadedTile) -> Result<(), UploadedTile> {
        self.tx.send(tile).map_err(|e| e.0)
    }
}

/// Consumer half, owned by the render thread.
pub struct UploadReceiver {
    rx: Receiver<UploadedTile>,
}

impl UploadReceiver {
    /// Drains every tile currently queued without blocking.
    ///
    /// The per-frame drain is bounded by queue size, not a time budget:
    /// uploads are cheap relative to the frame and draining fully keeps the
    /// queue from growing across frames.
    pub fn drain(&self) -> impl Iterator<Item = UploadedTile> + '_ {
        self.rx.try_iter()
    }

    /// Receives a single tile without blocking.
    pub fn try_recv(&self) -> Option<UploadedTile> {
        match self.rx.try_recv() {
            Ok(tile) => Some(tile),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Number of tiles currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
