//! # Collagist
//!
//! Compose photos from a gallery into a single collage image, then download
//! it, share it, or bundle the originals into a ZIP.
//!
//! # Architecture: Load → Lay Out → Paint → Export
//!
//! ```text
//! 1. Load      ImageRef[]         →  DecodedImage slots   (bounded, settle-all)
//! 2. Lay out   template + count   →  Cell[]               (pure geometry)
//! 3. Paint     slots + cells      →  CanvasArtifact       (full repaint + watermark)
//! 4. Export    CanvasArtifact     →  PNG/JPEG file, share, or images.zip
//! ```
//!
//! Each stage can be driven on its own, and the geometry and formatting
//! stages are pure functions, so most of the crate is tested without
//! touching the network or encoding a real image.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`loader`] | Fetch + decode with bounded concurrency, per-item results, CORS verdicts |
//! | [`layout`] | Templates and the cell geometry for each |
//! | [`compositor`] | Paints cells onto a canvas, contain-fit or stretched, plus watermark |
//! | [`export`] | Download sinks, share targets with fallback, share-intent links, ZIP archives |
//! | [`session`] | One-shot [`session::compose_collage`] and the stateful [`session::CollageSession`] |
//! | [`gallery`] | Read-only client for the gallery API |
//! | [`cache`] | Bounded (LRU) decode cache reused across re-renders |
//! | [`config`] | `config.toml` loading, validation, and stock defaults |
//! | [`imaging`] | Pure-Rust pixel work: decode, resize, encode, bitmap text |
//! | [`types`] | Image references, access modes, request context |
//! | [`output`] | CLI output formatting for pipeline events and listings |
//!
//! # Design Decisions
//!
//! ## One Owner Per Canvas
//!
//! A [`session::CollageSession`] owns its canvas. A second compose while one
//! is in flight is rejected outright rather than queued, and every run carries
//! a generation number so a run overtaken by a template or size change can
//! never overwrite a newer canvas.
//!
//! ## Failures Are Per Image
//!
//! The loader never lets one bad URL cancel the others. All requests settle,
//! then a [`loader::LoadPolicy`] decides: `fail-fast` rejects the batch,
//! `tolerant` paints what loaded and reports the rest with empty cells kept
//! in place.
//!
//! ## Taint Is Checked Up Front
//!
//! Each image reference carries an access mode and each decoded image records
//! whether its host granted CORS. A canvas with an ungranted image is refused
//! before painting, instead of failing late at encode time.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding, Lanczos3 resampling and PNG/JPEG encoding come from the `image`
//! crate; the watermark is drawn with `font8x8` bitmap glyphs. No system
//! libraries or font files are needed.

pub mod cache;
pub mod compositor;
pub mod config;
pub mod export;
pub mod gallery;
pub mod imaging;
pub mod layout;
pub mod loader;
pub mod output;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
