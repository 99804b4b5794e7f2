//! Pure Rust image backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Decode (JPEG, PNG, WebP, GIF) | `image::ImageReader` with format sniffing |
//! | Resize | `image::imageops::resize` with `Lanczos3` filter |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (alpha flattened to RGB) |

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::params::{OutputFormat, Quality};
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder, ImageReader, RgbaImage};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Open an in-memory reader with the format guessed from magic bytes.
fn sniffed_reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, BackendError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(BackendError::UnknownFormat(format!(
            "{} bytes with no recognizable image signature",
            bytes.len()
        )));
    }
    Ok(reader)
}

impl ImageBackend for RustBackend {
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError> {
        let (width, height) = sniffed_reader(bytes)?
            .into_dimensions()
            .map_err(|e| BackendError::DecodeFailed(format!("Failed to read dimensions: {}", e)))?;
        Ok(Dimensions { width, height })
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError> {
        sniffed_reader(bytes)?
            .decode()
            .map_err(|e| BackendError::DecodeFailed(e.to_string()))
    }

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> RgbaImage {
        let rgba = image.to_rgba8();
        if rgba.dimensions() == (width, height) {
            return rgba;
        }
        image::imageops::resize(&rgba, width, height, FilterType::Lanczos3)
    }

    fn encode(
        &self,
        canvas: &RgbaImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError> {
        let mut out = Vec::new();
        match format {
            OutputFormat::Png => image::codecs::png::PngEncoder::new(&mut out)
                .write_image(
                    canvas.as_raw(),
                    canvas.width(),
                    canvas.height(),
                    image::ExtendedColorType::Rgba8,
                )
                .map_err(|e| BackendError::EncodeFailed(format!("PNG encode failed: {}", e)))?,
            OutputFormat::Jpeg => {
                // JPEG has no alpha channel; the canvas is opaque anyway.
                let rgb = DynamicImage::ImageRgba8(canvas.clone()).to_rgb8();
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.value() as u8)
                    .write_image(
                        rgb.as_raw(),
                        rgb.width(),
                        rgb.height(),
                        image::ExtendedColorType::Rgb8,
                    )
                    .map_err(|e| {
                        BackendError::EncodeFailed(format!("JPEG encode failed: {}", e))
                    })?
            }
        }
        Ok(out)
    }
}
