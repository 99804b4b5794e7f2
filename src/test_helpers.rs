//! Shared test utilities for the collagist test suite.
//!
//! In-memory stand-ins for everything that would otherwise touch the network
//! or the filesystem: a fetcher serving canned bytes, a download sink that
//! keeps files in a vector, and a share target that records what it was
//! given.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let fetcher = StaticFetcher::new()
//!     .with_image("https://img.test/a.jpg", mock_image_bytes(40, 20, [255, 0, 0]))
//!     .with_status("https://img.test/b.jpg", 404);
//! let sink = MemorySink::new();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, Rgba, RgbaImage};

use crate::export::{
    DownloadSink, EncodedImage, ExportError, ExportedFile, SharePayload, ShareError, ShareTarget,
};
use crate::loader::{DecodedImage, FetchError, FetchedImage, Fetcher};
use crate::types::ImageRef;

// =========================================================================
// Images
// =========================================================================

/// A decoded single-color image, as if loaded from `https://img.test/{id}.jpg`.
pub fn solid_decoded(id: &str, width: u32, height: u32, rgb: [u8; 3]) -> DecodedImage {
    let pixel = Rgba([rgb[0], rgb[1], rgb[2], 255]);
    let handle = Arc::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width, height, pixel,
    )));
    DecodedImage {
        source: ImageRef::new(id, format!("https://img.test/{id}.jpg"), id),
        pixel_width: width,
        pixel_height: height,
        handle,
        cors_granted: true,
    }
}

// =========================================================================
// Fetcher
// =========================================================================

/// Serves canned responses by URL. Unknown URLs answer 404.
///
/// Each fetch yields once before answering, so concurrent fetches really
/// overlap and `peak_in_flight` measures the loader's bound.
#[derive(Default)]
pub struct StaticFetcher {
    responses: HashMap<String, Result<Vec<u8>, u16>>,
    tainted: HashSet<String>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), Ok(bytes));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_string(), Err(status));
        self
    }

    /// Serve this URL without a CORS grant.
    pub fn with_tainted(mut self, url: &str) -> Self {
        self.tainted.insert(url.to_string());
        self
    }

    /// URLs requested so far, in request order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Fetcher for StaticFetcher {
    async fn fetch(&self, image: &ImageRef) -> Result<FetchedImage, FetchError> {
        self.calls.lock().unwrap().push(image.url.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.responses.get(&image.url) {
            Some(Ok(bytes)) => Ok(FetchedImage {
                bytes: bytes.clone(),
                cors_granted: !self.tainted.contains(&image.url),
            }),
            Some(Err(status)) => Err(FetchError::Status {
                status: *status,
                url: image.url.clone(),
            }),
            None => Err(FetchError::Status {
                status: 404,
                url: image.url.clone(),
            }),
        }
    }
}

// =========================================================================
// Sinks and share targets
// =========================================================================

/// Keeps downloads in memory.
#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<(String, Vec<u8>)> {
        self.saved.lock().unwrap().clone()
    }
}

impl DownloadSink for MemorySink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<ExportedFile, ExportError> {
        self.saved
            .lock()
            .unwrap()
            .push((filename.to_string(), bytes.to_vec()));
        Ok(ExportedFile {
            filename: filename.to_string(),
            size: bytes.len(),
            path: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ShareBehavior {
    Accept,
    /// Advertises support, then refuses at invoke time.
    Refuse,
    Fail,
}

/// Share target that records `"title: filename"` for every accepted share.
pub struct RecordingShare {
    behavior: ShareBehavior,
    shared: Mutex<Vec<String>>,
}

impl RecordingShare {
    fn with_behavior(behavior: ShareBehavior) -> Self {
        Self {
            behavior,
            shared: Mutex::new(Vec::new()),
        }
    }

    pub fn supported() -> Self {
        Self::with_behavior(ShareBehavior::Accept)
    }

    pub fn refusing() -> Self {
        Self::with_behavior(ShareBehavior::Refuse)
    }

    pub fn failing() -> Self {
        Self::with_behavior(ShareBehavior::Fail)
    }

    pub fn shared(&self) -> Vec<String> {
        self.shared.lock().unwrap().clone()
    }
}

impl ShareTarget for RecordingShare {
    fn can_share(&self, _file: &EncodedImage) -> bool {
        true
    }

    async fn share(&self, payload: SharePayload<'_>) -> Result<(), ShareError> {
        match self.behavior {
            ShareBehavior::Accept => {
                self.shared
                    .lock()
                    .unwrap()
                    .push(format!("{}: {}", payload.title, payload.file.filename));
                Ok(())
            }
            ShareBehavior::Refuse => Err(ShareError::Unsupported),
            ShareBehavior::Fail => Err(ShareError::Failed("target crashed".into())),
        }
    }
}
