//! CLI output formatting for collage runs and gallery listings.
//!
//! # Information-First Display
//!
//! Images are shown by their position in the selection and their title, with
//! details (pixel size, failure reason, gallery id) on indented context lines.
//! Positions are 1-based and zero-padded so they line up with archive entry
//! names (`image1.jpg` is `001`).
//!
//! # Output Format
//!
//! ## Compose
//!
//! ```text
//! ==> grid2x2: loading 4 images (run 1)
//! 001 dusk (970x485)
//! 002 dawn FAILED
//!     fetch failed: HTTP 404 for https://cdn.example.com/dawn.jpg
//! Composed 1000x1000 (3 drawn, 1 skipped)
//! Saved Sona-One-Collage.png (48213 bytes) → out/Sona-One-Collage.png
//! ```
//!
//! ## List
//!
//! ```text
//! Page 1/3 (42 photos)
//! 001 Dusk (2021)
//!     Id: 65f0c1
//!     Image: http://localhost:4000/uploads/dusk.jpg
//! ```
//!
//! # Architecture
//!
//! Each display has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::compositor::SkippedImage;
use crate::export::Network;
use crate::gallery::{GalleryItem, ListPage};
use crate::session::PipelineEvent;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn skipped_lines(skipped: &[SkippedImage]) -> Vec<String> {
    skipped
        .iter()
        .map(|s| {
            format!(
                "{}Skipped: {} {} ({})",
                indent(1),
                format_index(s.index + 1),
                s.title,
                s.reason
            )
        })
        .collect()
}

// ============================================================================
// Pipeline events
// ============================================================================

/// Format one pipeline event as display lines.
pub fn format_event(event: &PipelineEvent) -> Vec<String> {
    match event {
        PipelineEvent::RunStarted {
            generation,
            template,
            total,
        } => vec![format!(
            "==> {}: loading {} (run {})",
            template,
            plural(*total, "image"),
            generation
        )],
        PipelineEvent::ImageLoaded {
            index,
            title,
            width,
            height,
        } => vec![format!(
            "{} {} ({}x{})",
            format_index(index + 1),
            title,
            width,
            height
        )],
        PipelineEvent::ImageFailed {
            index,
            title,
            reason,
        } => vec![
            format!("{} {} FAILED", format_index(index + 1), title),
            format!("{}{}", indent(1), reason),
        ],
        PipelineEvent::Composed {
            width,
            height,
            drawn,
            skipped,
            ..
        } => {
            let mut lines = vec![if skipped.is_empty() {
                format!("Composed {}x{} ({} drawn)", width, height, drawn)
            } else {
                format!(
                    "Composed {}x{} ({} drawn, {} skipped)",
                    width,
                    height,
                    drawn,
                    skipped.len()
                )
            }];
            lines.extend(skipped_lines(skipped));
            lines
        }
        PipelineEvent::Saved {
            filename,
            size,
            path,
        } => vec![match path {
            Some(path) => format!("Saved {} ({} bytes) → {}", filename, size, path.display()),
            None => format!("Saved {} ({} bytes)", filename, size),
        }],
        PipelineEvent::Shared { filename } => vec![format!("Shared {}", filename)],
        PipelineEvent::ShareFellBack { filename } => vec![format!(
            "Sharing unsupported, {} downloaded instead",
            filename
        )],
        PipelineEvent::Archived {
            filename,
            entries,
            skipped,
        } => {
            let mut lines = vec![if skipped.is_empty() {
                format!("Archived {} ({})", filename, plural(*entries, "image"))
            } else {
                format!(
                    "Archived {} ({}, {} skipped)",
                    filename,
                    plural(*entries, "image"),
                    skipped.len()
                )
            }];
            lines.extend(skipped_lines(skipped));
            lines
        }
    }
}

pub fn print_event(event: &PipelineEvent) {
    for line in format_event(event) {
        println!("{}", line);
    }
}

// ============================================================================
// Share links
// ============================================================================

/// Format one `Network: url` line per share intent.
pub fn format_share_links(links: &[(Network, reqwest::Url)]) -> Vec<String> {
    if links.is_empty() {
        return vec!["No shareable web images".to_string()];
    }
    let mut lines = vec!["Share links:".to_string()];
    lines.extend(
        links
            .iter()
            .map(|(network, url)| format!("{}{}: {}", indent(1), network, url)),
    );
    lines
}

pub fn print_share_links(links: &[(Network, reqwest::Url)]) {
    for line in format_share_links(links) {
        println!("{}", line);
    }
}

// ============================================================================
// Gallery listing
// ============================================================================

/// Format a gallery page, numbering items by their position across pages.
pub fn format_list_page(page: &ListPage<GalleryItem>, asset_base: &str) -> Vec<String> {
    let mut lines = vec![format!(
        "Page {}/{} ({})",
        page.page,
        page.total_pages.max(1),
        plural(page.total_docs as usize, "photo")
    )];
    let offset = (page.page.saturating_sub(1) as usize) * page.limit as usize;
    for (i, item) in page.docs.iter().enumerate() {
        let header = match item.year {
            Some(year) => format!("{} {} ({})", format_index(offset + i + 1), item.photo_name, year),
            None => format!("{} {}", format_index(offset + i + 1), item.photo_name),
        };
        lines.push(header);
        lines.push(format!("{}Id: {}", indent(1), item.id));
        let image = item.to_image_ref(asset_base, Default::default());
        lines.push(format!("{}Image: {}", indent(1), image.url));
        if let Some(desc) = item.description.as_deref().filter(|d| !d.is_empty()) {
            lines.push(format!("{}Description: {}", indent(1), truncate_desc(desc, 60)));
        }
    }
    if page.has_next_page {
        lines.push(format!("More: --page {}", page.page + 1));
    }
    lines
}

pub fn print_list_page(page: &ListPage<GalleryItem>, asset_base: &str) {
    for line in format_list_page(page, asset_base) {
        println!("{}", line);
    }
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate_desc(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
