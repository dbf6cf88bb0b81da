//! Tile addressing for the slippy-map pyramid.
//!
//! A tile is one cell of a quadtree zoom grid: at zoom level `z` the pyramid
//! has `2^z` columns and `2^z` rows. `TileKey` is the sole identifier used by
//! every layer of the pipeline - the disk store, the in-flight record map,
//! the worker queue and the GPU resident set all key on it.
//!
//! The cache layers deliberately do not validate that a key lies inside the
//! pyramid; clamping to `[0, 2^zoom)` is the viewport's job (see
//! [`crate::view::Viewport`]).

use std::fmt;
use std::path::PathBuf;

/// Identifies a single tile in the zoom pyramid.
///
/// Keys are plain values: `Copy`, hashable and totally ordered (by zoom,
/// then column, then row) so they work in sets, maps and sorted queues.
///
/// # Example
///
/// ```
/// use tilestream::coord::TileKey;
///
/// let key = TileKey::new(3, 4, 2);
/// assert_eq!(key.zoom(), 3);
/// assert_eq!(key.to_string(), "3/4/2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    zoom: u8,
    column: u32,
    row: u32,
}

impl TileKey {
    /// Creates a new tile key.
    ///
    /// # Arguments
    ///
    /// * `zoom` - Zoom level of the pyramid
    /// * `column` - Column index (west to east)
    /// * `row` - Row index (north to south)
    pub const fn new(zoom: u8, column: u32, row: u32) -> Self {
        Self { zoom, column, row }
    }

    /// Get the zoom level.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Get the column index.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Get the row index.
    pub fn row(&self) -> u32 {
        self.row
    }

    /// Deterministic `zoom/column/row` encoding.
    ///
    /// Used as the disk-cache subpath and as a stable textual index.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.zoom, self.column, self.row)
    }

    /// Relative file path for this tile with the given extension,
    /// e.g. `3/4/2.png`.
    pub fn file_path(&self, extension: &str) -> PathBuf {
        PathBuf::from(self.zoom.to_string())
            .join(self.column.to_string())
            .join(format!("{}.{}", self.row, extension))
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}

/// Number of tiles along one axis at the given zoom level (`2^zoom`),
/// saturating at `u32::MAX` for zoom levels beyond the representable range.
pub fn tiles_across(zoom: u8) -> u32 {
    1u32.checked_shl(u32::from(zoom)).unwrap_or(u32::MAX)
}
