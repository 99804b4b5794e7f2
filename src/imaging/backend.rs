//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the four pixel operations the collage
//! pipeline needs: identify, decode, resize, and encode. Everything above it
//! (loader, compositor, exporter) is backend-agnostic.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests swap in a recording mock.

use super::params::{OutputFormat, Quality};
use image::{DynamicImage, RgbaImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unrecognized image data: {0}")]
    UnknownFormat(String),
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error("Encode failed: {0}")]
    EncodeFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Trait for image processing backends.
///
/// Operations work on in-memory buffers: the loader hands over fetched bytes,
/// and the exporter takes encoded bytes back. Nothing here touches the
/// filesystem or network.
pub trait ImageBackend: Sync {
    /// Read dimensions from the image header without a full decode.
    ///
    /// The loader calls this first to refuse oversized sources cheaply.
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError>;

    /// Decode fetched bytes into a raster.
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError>;

    /// Resample to exactly `width` x `height` (aspect is the caller's concern).
    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> RgbaImage;

    /// Encode a painted canvas.
    fn encode(
        &self,
        canvas: &RgbaImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError>;
}
