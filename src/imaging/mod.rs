//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify / decode** | `image::ImageReader` (format sniffed from bytes) |
//! | **Resize** | Lanczos3 via `image::imageops::resize` |
//! | **Encode** | PNG / JPEG encoders from `image` |
//! | **Watermark** | `font8x8` bitmap glyphs |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for placement math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Watermark**: text stamping on a painted canvas

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;
pub mod watermark;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{Rect, contain_fit, glyph_scale, watermark_font_px};
pub use params::{Color, OutputFormat, ParseColorError, Quality};
pub use rust_backend::RustBackend;
pub use watermark::{WatermarkParams, draw_watermark, text_width};
