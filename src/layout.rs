//! Layout engine: templates → destination cells.
//!
//! A [`Template`] names a layout strategy. [`layout`] turns it, together with
//! an item count, canvas width and padding, into the cells the compositor
//! paints. The function is pure and deterministic; cells are recomputed on
//! every render pass rather than cached.
//!
//! ## Template families
//!
//! | Template | Grid | Canvas | Fit |
//! |---|---|---|---|
//! | `grid2x2` | 2 × 2 | square | contain |
//! | `grid3x3` | 3 × 3 | square | contain |
//! | `stripH` | 1 × 4 | square | contain |
//! | `stripV` | 4 × 1 | square | contain |
//! | `classic` | ⌈n/2⌉ × 2 | grows with n | stretch |
//! | `polaroid` | ⌈n/3⌉ × 3 | grows with n | stretch |
//!
//! `social`, `masonry`, `diagonal`, `custom` and `manual` are recognized names
//! without a layout algorithm yet; asking for them is an error, not a silent
//! fallback.
//!
//! ## Truncation
//!
//! Canvas templates hold at most `rows * cols` images. Extra images are
//! dropped without error: `layout` returns `min(n, rows * cols)` cells and the
//! caller only loads that many.

use crate::imaging::Rect;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A destination region on the canvas.
pub type Cell = Rect;

#[derive(Error, Debug, PartialEq)]
pub enum LayoutError {
    #[error("unknown template '{0}'")]
    UnknownTemplate(String),
    #[error("template '{0}' has no layout algorithm yet")]
    Unsupported(Template),
    #[error("canvas size must be positive")]
    EmptyCanvas,
    #[error("canvas of {width}x{height}px exceeds the {max}px edge limit")]
    CanvasTooLarge { width: u64, height: u64, max: u32 },
    #[error("padding {padding}px leaves no room for {cols} columns / {rows} rows on a {size}px canvas")]
    PaddingTooLarge {
        padding: u32,
        size: u32,
        rows: u32,
        cols: u32,
    },
}

/// Rows and columns of a template's grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutSpec {
    pub rows: u32,
    pub cols: u32,
}

impl LayoutSpec {
    pub fn capacity(&self) -> usize {
        (self.rows * self.cols) as usize
    }
}

/// How an image is scaled into its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    /// Uniform scale, centered, letterboxed.
    Contain,
    /// Scale each axis independently to cover the whole cell.
    Stretch,
}

/// Named layout strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Template {
    #[serde(rename = "grid2x2")]
    Grid2x2,
    #[serde(rename = "grid3x3")]
    Grid3x3,
    #[serde(rename = "stripH")]
    StripH,
    #[serde(rename = "stripV")]
    StripV,
    #[serde(rename = "classic")]
    Classic,
    #[serde(rename = "polaroid")]
    Polaroid,
    #[serde(rename = "social")]
    Social,
    #[serde(rename = "masonry")]
    Masonry,
    #[serde(rename = "diagonal")]
    Diagonal,
    #[serde(rename = "custom")]
    Custom,
    #[serde(rename = "manual")]
    Manual,
}

impl Template {
    pub const ALL: [Template; 11] = [
        Template::Grid2x2,
        Template::Grid3x3,
        Template::StripH,
        Template::StripV,
        Template::Classic,
        Template::Polaroid,
        Template::Social,
        Template::Masonry,
        Template::Diagonal,
        Template::Custom,
        Template::Manual,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Template::Grid2x2 => "grid2x2",
            Template::Grid3x3 => "grid3x3",
            Template::StripH => "stripH",
            Template::StripV => "stripV",
            Template::Classic => "classic",
            Template::Polaroid => "polaroid",
            Template::Social => "social",
            Template::Masonry => "masonry",
            Template::Diagonal => "diagonal",
            Template::Custom => "custom",
            Template::Manual => "manual",
        }
    }

    /// Fixed grid for square-canvas templates.
    fn fixed_grid(self) -> Option<LayoutSpec> {
        let (rows, cols) = match self {
            Template::Grid2x2 => (2, 2),
            Template::Grid3x3 => (3, 3),
            Template::StripH => (1, 4),
            Template::StripV => (4, 1),
            _ => return None,
        };
        Some(LayoutSpec { rows, cols })
    }

    /// Column count for tile-sheet templates.
    pub fn tile_columns(self) -> Option<u32> {
        match self {
            Template::Classic => Some(2),
            Template::Polaroid => Some(3),
            _ => None,
        }
    }

    /// True for templates that paint onto a square `size × size` canvas.
    pub fn is_square_canvas(self) -> bool {
        self.fixed_grid().is_some()
    }

    /// True for tile sheets whose height grows with the image count.
    pub fn is_tile_sheet(self) -> bool {
        self.tile_columns().is_some()
    }

    pub fn is_supported(self) -> bool {
        self.is_square_canvas() || self.is_tile_sheet()
    }

    pub fn fit_mode(self) -> FitMode {
        if self.is_tile_sheet() {
            FitMode::Stretch
        } else {
            FitMode::Contain
        }
    }

    /// Grid for `item_count` images.
    pub fn spec(self, item_count: usize) -> Result<LayoutSpec, LayoutError> {
        if let Some(spec) = self.fixed_grid() {
            return Ok(spec);
        }
        match self.tile_columns() {
            Some(cols) => Ok(LayoutSpec {
                rows: (item_count as u32).div_ceil(cols),
                cols,
            }),
            None => Err(LayoutError::Unsupported(self)),
        }
    }

    /// Maximum number of images placed; `None` when unbounded.
    pub fn capacity(self) -> Option<usize> {
        self.fixed_grid().map(|spec| spec.capacity())
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Template {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Template::ALL
            .into_iter()
            .find(|t| t.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LayoutError::UnknownTemplate(s.to_string()))
    }
}

/// Largest canvas edge, in pixels, on either axis.
pub const MAX_CANVAS_EDGE: u32 = 16_384;

fn too_large(width: u64, height: u64) -> LayoutError {
    LayoutError::CanvasTooLarge {
        width,
        height,
        max: MAX_CANVAS_EDGE,
    }
}

/// Edge length of one cell along an axis with `count` tracks.
fn track_extent(size: u32, padding: u32, count: u32) -> f64 {
    (size as f64 - padding as f64 * (count as f64 + 1.0)) / count as f64
}

/// Compute destination cells for `item_count` images.
///
/// Cell width is `(canvas_size − padding·(cols+1)) / cols` and height follows
/// the same formula with rows. Tile sheets use square cells of that width.
/// Index `i` lands in row `i / cols`, column `i % cols`.
///
/// Returns exactly `min(item_count, capacity)` cells.
pub fn layout(
    template: Template,
    item_count: usize,
    canvas_size: u32,
    padding: u32,
) -> Result<Vec<Cell>, LayoutError> {
    let spec = template.spec(item_count)?;
    if canvas_size == 0 {
        return Err(LayoutError::EmptyCanvas);
    }
    if canvas_size > MAX_CANVAS_EDGE {
        return Err(too_large(canvas_size as u64, canvas_size as u64));
    }

    let cols_extent = track_extent(canvas_size, padding, spec.cols);
    let rows_extent = if template.is_tile_sheet() {
        cols_extent
    } else {
        track_extent(canvas_size, padding, spec.rows.max(1))
    };
    if cols_extent < 1.0 || rows_extent < 1.0 {
        return Err(LayoutError::PaddingTooLarge {
            padding,
            size: canvas_size,
            rows: spec.rows,
            cols: spec.cols,
        });
    }

    let placed = match template.capacity() {
        Some(cap) => item_count.min(cap),
        None => item_count,
    };
    let pad = padding as f64;

    Ok((0..placed)
        .map(|i| {
            let row = (i as u32 / spec.cols) as f64;
            let col = (i as u32 % spec.cols) as f64;
            Rect {
                x: pad + col * (cols_extent + pad),
                y: pad + row * (rows_extent + pad),
                width: cols_extent,
                height: rows_extent,
            }
        })
        .collect())
}

/// Pixel dimensions of the canvas a template paints onto.
///
/// Square templates are `size × size`. Tile sheets are `size` wide and as
/// tall as their rows need (at least one row, so an empty sheet still has a
/// visible background). Fails when either edge exceeds [`MAX_CANVAS_EDGE`].
pub fn canvas_dimensions(
    template: Template,
    item_count: usize,
    canvas_size: u32,
    padding: u32,
) -> Result<(u32, u32), LayoutError> {
    let spec = template.spec(item_count)?;
    if canvas_size > MAX_CANVAS_EDGE {
        return Err(too_large(canvas_size as u64, canvas_size as u64));
    }
    if template.is_square_canvas() {
        return Ok((canvas_size, canvas_size));
    }
    let tile = track_extent(canvas_size, padding, spec.cols);
    let rows = spec.rows.max(1) as f64;
    let height = (rows * tile + padding as f64 * (rows + 1.0)).round().max(1.0);
    if height > MAX_CANVAS_EDGE as f64 {
        return Err(too_large(canvas_size as u64, height as u64));
    }
    Ok((canvas_size, height as u32))
}
