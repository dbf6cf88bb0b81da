//! Raster decoding of raw tile bytes.
//!
//! Decoding always forces a 4-channel RGBA output so the GPU upload path is
//! format-agnostic: whatever the tile server returns (PNG, JPEG, ...), the
//! render thread only ever sees `width * height * 4` bytes.

use thiserror::Error;

/// Errors from tile decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes were not a supported raster image.
    #[error("malformed tile image: {0}")]
    Malformed(#[from] image::ImageError),
}

/// A decoded tile ready for GPU upload.
///
/// `pixels` is tightly packed RGBA8, row-major, `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTile {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decodes raw tile bytes into an RGBA pixel buffer.
pub trait TileDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedTile, DecodeError>;
}

/// [`TileDecoder`] backed by the `image` crate.
///
/// Format is sniffed from the bytes; anything `image` can load works, which
/// covers the raster formats common tile servers return.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl TileDecoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedTile, DecodeError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedTile {
            pixels: rgba.into_raw(),
            width,
            height,
        })
    }
}
