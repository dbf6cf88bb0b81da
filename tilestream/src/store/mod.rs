//! Persistent byte store for fetched tiles.
//!
//! The disk cache holds one file per tile under
//! `<root>/<zoom>/<column>/<row>.<ext>`, creating intermediate directories on
//! demand. Writes go to a temporary sibling path and are renamed into place,
//! so a concurrent reader never observes a partially written tile.
//!
//! Absence is a normal outcome, not an error: `get` returns `Ok(None)` for a
//! tile that has never been cached. I/O failures surface as [`StoreError`]
//! and are treated by the cache as a miss that falls through to the network.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::coord::TileKey;

/// Default file extension for stored tiles.
pub const DEFAULT_EXTENSION: &str = "png";

/// Monotonic counter distinguishing temp files written by concurrent writers.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem error (permissions, disk full, ...).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Disk-backed byte cache keyed by [`TileKey`].
///
/// Implementations must be safe to call from many worker threads; the
/// temp-file-then-rename write protocol keeps same-key races harmless even
/// though the cache's de-duplication normally prevents them.
pub trait TileStore: Send + Sync {
    /// Look up the raw bytes for a tile.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` on a cache hit
    /// - `Ok(None)` when the tile has never been cached
    /// - `Err(_)` on a filesystem failure
    fn get(&self, key: TileKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Persist the raw bytes for a tile, replacing any previous entry.
    fn put(&self, key: TileKey, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Filesystem implementation of [`TileStore`].
///
/// # Example
///
/// ```no_run
/// use tilestream::coord::TileKey;
/// use tilestream::store::{DiskTileStore, TileStore};
///
/// let store = DiskTileStore::new("/var/cache/tilestream");
/// store.put(TileKey::new(1, 0, 0), &[0xFF, 0xD8]).unwrap();
/// assert!(store.get(TileKey::new(1, 0, 0)).unwrap().is_some());
/// ```
pub struct DiskTileStore {
    root: PathBuf,
    extension: String,
}

impl DiskTileStore {
    /// Creates a store rooted at the given cache directory.
    ///
    /// The directory itself is created lazily on the first `put`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// Override the file extension used for stored tiles.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Returns the cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the file backing a tile.
    fn tile_path(&self, key: TileKey) -> PathBuf {
        self.root.join(key.file_path(&self.extension))
    }
}

impl TileStore for DiskTileStore {
    fn get(&self, key: TileKey) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.tile_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: TileKey, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.tile_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename keeps concurrent readers from seeing a torn file.
        let temp = path.with_extension(format!(
            "{}.tmp-{}",
            self.extension,
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = fs::write(&temp, bytes) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }
}
