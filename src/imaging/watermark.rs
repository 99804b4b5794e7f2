//! Bitmap-font watermark rendering.
//!
//! Text is drawn with the 8×8 `font8x8` glyphs, magnified by an integer
//! factor. Characters without a glyph (em-dashes, emoji) render as `?`
//! rather than being dropped, so the text width stays predictable.

use super::calculations::{glyph_scale, watermark_font_px};
use super::params::Color;
use font8x8::{BASIC_FONTS, LATIN_FONTS, UnicodeFonts};
use image::RgbaImage;

const GLYPH_PX: u32 = 8;

/// A single line of watermark text and where its baseline sits.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkParams {
    pub text: String,
    pub color: Color,
    /// Left edge of the first glyph.
    pub x: u32,
    /// Baseline: the bottom row of the glyph cells.
    pub baseline: u32,
    /// Target font size in pixels (rounded to a multiple of 8).
    pub font_px: u32,
}

impl WatermarkParams {
    /// Bottom-left watermark for a square canvas, inset by `margin`.
    pub fn bottom_left(text: &str, color: Color, canvas_size: u32, margin: u32, scale: f64) -> Self {
        Self {
            text: text.to_string(),
            color,
            x: margin,
            baseline: canvas_size.saturating_sub(margin),
            font_px: watermark_font_px(canvas_size, scale),
        }
    }
}

fn glyph_for(ch: char) -> [u8; 8] {
    BASIC_FONTS
        .get(ch)
        .or_else(|| LATIN_FONTS.get(ch))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

/// Rendered width of `text` in pixels at the given font size.
pub fn text_width(text: &str, font_px: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_PX * glyph_scale(font_px)
}

/// Draw the watermark onto the canvas, clipping anything out of bounds.
pub fn draw_watermark(canvas: &mut RgbaImage, params: &WatermarkParams) {
    if params.text.is_empty() || params.font_px == 0 {
        return;
    }

    let scale = glyph_scale(params.font_px) as i64;
    let top = params.baseline as i64 - GLYPH_PX as i64 * scale;
    let (width, height) = (canvas.width() as i64, canvas.height() as i64);
    let pixel = params.color.to_rgba();

    let mut cursor_x = params.x as i64;
    for ch in params.text.chars() {
        let glyph = glyph_for(ch);
        for (row_idx, row_bits) in glyph.iter().enumerate() {
            for col_idx in 0..GLYPH_PX as i64 {
                if (row_bits >> col_idx) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col_idx * scale;
                let py = top + row_idx as i64 * scale;
                for sy in 0..scale {
                    for sx in 0..scale {
                        let (tx, ty) = (px + sx, py + sy);
                        if tx >= 0 && ty >= 0 && tx < width && ty < height {
                            canvas.put_pixel(tx as u32, ty as u32, pixel);
                        }
                    }
                }
            }
        }
        cursor_x += GLYPH_PX as i64 * scale;
    }
}
