//! Pure calculation functions for placement geometry.
//!
//! All functions here are pure and testable without any I/O or images.

/// An axis-aligned rectangle in canvas pixels.
///
/// Geometry stays fractional until rasterization: a 1000px canvas split into
/// two 485px cells with 10px gutters is exact, but three cells are not.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Snap to whole pixels as `(x, y, width, height)`.
    ///
    /// Edges are rounded independently, so two rects that share an edge in
    /// fractional space share it after snapping too.
    pub fn to_pixels(&self) -> (i64, i64, u32, u32) {
        let x0 = self.x.round() as i64;
        let y0 = self.y.round() as i64;
        let x1 = self.right().round() as i64;
        let y1 = self.bottom().round() as i64;
        (x0, y0, (x1 - x0).max(0) as u32, (y1 - y0).max(0) as u32)
    }
}

/// Contain-fit an image inside a cell.
///
/// Scales uniformly by `min(cell_w / img_w, cell_h / img_h)` and centers the
/// result, leaving background visible on the non-limiting axis.
///
/// When `allow_upscale` is false the scale is clamped to 1.0, so small images
/// are centered at their natural size instead of being enlarged.
///
/// # Examples
/// ```
/// # use collagist::imaging::{Rect, contain_fit};
/// let cell = Rect { x: 10.0, y: 10.0, width: 485.0, height: 485.0 };
/// // 970x485 landscape → full width, centered vertically
/// let drawn = contain_fit((970, 485), &cell, true);
/// assert_eq!((drawn.width, drawn.height), (485.0, 242.5));
/// assert_eq!(drawn.y, 10.0 + (485.0 - 242.5) / 2.0);
/// ```
pub fn contain_fit(image: (u32, u32), cell: &Rect, allow_upscale: bool) -> Rect {
    let (img_w, img_h) = (image.0.max(1) as f64, image.1.max(1) as f64);

    let mut scale = (cell.width / img_w).min(cell.height / img_h);
    if !allow_upscale {
        scale = scale.min(1.0);
    }

    let width = img_w * scale;
    let height = img_h * scale;

    Rect {
        x: cell.x + (cell.width - width) / 2.0,
        y: cell.y + (cell.height - height) / 2.0,
        width,
        height,
    }
}

/// Watermark font size in pixels for a canvas edge.
///
/// `floor(canvas_size * scale)`; the stock scale is 0.035, so a 1000px
/// collage gets 35px text.
pub fn watermark_font_px(canvas_size: u32, scale: f64) -> u32 {
    (canvas_size as f64 * scale).floor().max(0.0) as u32
}

/// Integer magnification for an 8px bitmap font to approximate `font_px`.
///
/// Never below 1, so the watermark stays legible on tiny canvases.
pub fn glyph_scale(font_px: u32) -> u32 {
    ((font_px as f64 / 8.0).round() as u32).max(1)
}
