//! Compositor: decoded images + layout → painted canvas.
//!
//! Every render is a full repaint onto a fresh raster:
//!
//! 1. Fill the whole canvas with the background color.
//! 2. For each cell, fill the placeholder color, then draw the cell's image
//!    (contain-fit for square templates, stretched for tile sheets).
//! 3. Stamp the watermark bottom-left (square templates only).
//!
//! The result is a [`CanvasArtifact`] that records where every image went, so
//! callers and tests can check placement without reading pixels back.

use crate::config::CollageConfig;
use crate::imaging::{
    Color, ImageBackend, OutputFormat, Rect, WatermarkParams, contain_fit, draw_watermark,
};
use crate::layout::{
    Cell, FitMode, LayoutError, MAX_CANVAS_EDGE, Template, canvas_dimensions, layout,
};
use crate::loader::{DecodedImage, LoadFailure};
use image::{RgbaImage, imageops};

/// Watermark text and style.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSettings {
    pub text: String,
    pub color: Color,
    /// Font size as a fraction of the canvas edge.
    pub scale: f64,
}

/// Everything the compositor needs besides the images.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeOptions {
    /// Canvas width; also the height for square templates.
    pub canvas_size: u32,
    pub padding: u32,
    pub background: Color,
    pub cell_background: Color,
    pub allow_upscale: bool,
    pub watermark: Option<WatermarkSettings>,
}

impl ComposeOptions {
    /// Derive options for a template from config.
    ///
    /// Square templates use `size` and the configured padding. Tile sheets
    /// ignore `size`: their width is `columns × tile_size`, without gutters
    /// or watermark. Fails if the width exceeds [`MAX_CANVAS_EDGE`].
    pub fn resolve(
        template: Template,
        size: u32,
        config: &CollageConfig,
    ) -> Result<Self, LayoutError> {
        let base = Self {
            canvas_size: size,
            padding: config.canvas.padding,
            background: config.canvas.background,
            cell_background: config.canvas.cell_background,
            allow_upscale: config.canvas.allow_upscale,
            watermark: config.watermark.enabled.then(|| WatermarkSettings {
                text: config.watermark.text.clone(),
                color: config.watermark.color,
                scale: config.watermark.scale,
            }),
        };
        let canvas_size = match template.tile_columns() {
            Some(cols) => cols
                .checked_mul(config.tiles.tile_size)
                .filter(|width| *width <= MAX_CANVAS_EDGE),
            None => Some(size).filter(|size| *size <= MAX_CANVAS_EDGE),
        };
        let Some(canvas_size) = canvas_size else {
            let width = match template.tile_columns() {
                Some(cols) => cols as u64 * config.tiles.tile_size as u64,
                None => size as u64,
            };
            return Err(LayoutError::CanvasTooLarge {
                width,
                height: width,
                max: MAX_CANVAS_EDGE,
            });
        };
        if template.is_tile_sheet() {
            Ok(Self {
                canvas_size,
                padding: 0,
                watermark: None,
                ..base
            })
        } else {
            Ok(base)
        }
    }
}

/// Where one input image ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    /// Input position, equal to the cell index.
    pub index: usize,
    /// `None` when the slot's image failed to load.
    pub image_id: Option<String>,
    pub cell: Cell,
    /// Rectangle the image was drawn into; `None` for an empty cell.
    pub drawn: Option<Rect>,
}

/// An image that was selected but is not on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedImage {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub reason: String,
}

impl From<&LoadFailure> for SkippedImage {
    fn from(failure: &LoadFailure) -> Self {
        Self {
            index: failure.index,
            id: failure.image.id.clone(),
            title: failure.image.title.clone(),
            reason: failure.error.to_string(),
        }
    }
}

/// A fully painted canvas, ready to encode.
#[derive(Debug, Clone)]
pub struct CanvasArtifact {
    pub image: RgbaImage,
    pub template: Template,
    pub format: OutputFormat,
    pub placements: Vec<Placement>,
    /// Failed images under the tolerant policy.
    pub skipped: Vec<SkippedImage>,
    /// Some pixels came from a host that did not grant CORS.
    pub tainted: bool,
    /// Session run that painted this canvas.
    pub generation: u64,
}

impl CanvasArtifact {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Number of cells with an image drawn in them.
    pub fn drawn_count(&self) -> usize {
        self.placements.iter().filter(|p| p.drawn.is_some()).count()
    }
}

/// Square templates export lossless PNG; tile sheets export JPEG.
pub fn output_format(template: Template) -> OutputFormat {
    if template.is_tile_sheet() {
        OutputFormat::Jpeg
    } else {
        OutputFormat::Png
    }
}

/// Paint `slots` onto a new canvas.
///
/// `slots[i]` goes into cell `i`. `None` slots keep their cell and show the
/// placeholder fill. Slots past the template's capacity are ignored.
#[tracing::instrument(skip_all, fields(template = %template, slots = slots.len()))]
pub fn compose<B: ImageBackend>(
    backend: &B,
    template: Template,
    slots: &[Option<DecodedImage>],
    options: &ComposeOptions,
) -> Result<CanvasArtifact, LayoutError> {
    let cells = layout(template, slots.len(), options.canvas_size, options.padding)?;
    let (width, height) =
        canvas_dimensions(template, slots.len(), options.canvas_size, options.padding)?;

    let mut canvas = RgbaImage::from_pixel(width, height, options.background.to_rgba());
    let fit = template.fit_mode();

    let mut placements = Vec::with_capacity(cells.len());
    for (index, (cell, slot)) in cells.iter().zip(slots).enumerate() {
        fill_rect(&mut canvas, cell, options.cell_background);
        let drawn = slot.as_ref().and_then(|image| {
            paint_image(backend, &mut canvas, image, cell, fit, options.allow_upscale)
        });
        placements.push(Placement {
            index,
            image_id: slot.as_ref().map(|image| image.source.id.clone()),
            cell: *cell,
            drawn,
        });
    }

    if template.is_square_canvas()
        && let Some(watermark) = &options.watermark
    {
        let params = WatermarkParams::bottom_left(
            &watermark.text,
            watermark.color,
            options.canvas_size,
            options.padding,
            watermark.scale,
        );
        draw_watermark(&mut canvas, &params);
    }

    let tainted = slots.iter().flatten().any(|image| !image.cors_granted);
    tracing::debug!(width, height, cells = cells.len(), tainted, "canvas painted");

    Ok(CanvasArtifact {
        image: canvas,
        template,
        format: output_format(template),
        placements,
        skipped: Vec::new(),
        tainted,
        generation: 0,
    })
}

fn paint_image<B: ImageBackend>(
    backend: &B,
    canvas: &mut RgbaImage,
    image: &DecodedImage,
    cell: &Cell,
    fit: FitMode,
    allow_upscale: bool,
) -> Option<Rect> {
    let drawn = match fit {
        FitMode::Contain => contain_fit(
            (image.pixel_width, image.pixel_height),
            cell,
            allow_upscale,
        ),
        FitMode::Stretch => *cell,
    };
    let (x, y, w, h) = drawn.to_pixels();
    if w == 0 || h == 0 {
        return None;
    }
    let resized = backend.resize(&image.handle, w, h);
    imageops::overlay(canvas, &resized, x, y);
    Some(drawn)
}

fn fill_rect(canvas: &mut RgbaImage, rect: &Rect, color: Color) {
    let (x, y, w, h) = rect.to_pixels();
    let clamp_x = |v: i64| v.clamp(0, canvas.width() as i64) as u32;
    let clamp_y = |v: i64| v.clamp(0, canvas.height() as i64) as u32;
    let (x0, x1) = (clamp_x(x), clamp_x(x + w as i64));
    let (y0, y1) = (clamp_y(y), clamp_y(y + h as i64));
    let pixel = color.to_rgba();
    for py in y0..y1 {
        for px in x0..x1 {
            canvas.put_pixel(px, py, pixel);
        }
    }
}
