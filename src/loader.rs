//! Image loader: references → decoded rasters.
//!
//! ## Settle-all, then aggregate
//!
//! Every requested image produces its own result. One 404 never cancels its
//! siblings; the loader waits until all requests settle, then the caller
//! picks an aggregation with [`LoadPolicy`]:
//!
//! - `FailFast` treats any failure as fatal for the batch.
//! - `Tolerant` keeps the successes and reports the failures alongside.
//!
//! Results keep input order regardless of completion order, so index `i`
//! always maps to layout cell `i`.
//!
//! ## Bounded fan-out
//!
//! At most `max_concurrent` fetches are in flight. The requests are futures
//! driven by one order-preserving stream on the caller's task; no threads
//! are spawned, and decoding happens on the same task as it settles.
//!
//! ## Cross-origin access
//!
//! When an app origin is configured, a cross-origin image only counts as
//! exportable if the response grants CORS for the request's [`AccessMode`]
//! (see [`cors_granted`]). The verdict rides along on [`DecodedImage`] so the
//! session can refuse to compose a tainted canvas up front.
//!
//! ## Cancellation
//!
//! `is_cancelled` is consulted before each fetch starts. Requests already on
//! the wire finish, but nothing new is issued once a run is superseded.

use crate::cache::{CachedDecode, DecodeCache};
use crate::imaging::{BackendError, ImageBackend};
use crate::types::{AccessMode, ImageRef, RequestContext};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use reqwest::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN, HeaderMap, HeaderName, ORIGIN,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Transport(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid image source: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        if err.is_timeout() {
            FetchError::Timeout(url)
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
                url,
            }
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Why a single image did not make it onto the canvas.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("decode failed: {0}")]
    Decode(#[from] BackendError),
    #[error("image is {width}x{height}, over the {max_pixels}-pixel limit")]
    TooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },
    #[error("cancelled before the request was issued")]
    Cancelled,
}

/// A per-item failure, tied back to its input position.
#[derive(Debug)]
pub struct LoadFailure {
    pub index: usize,
    pub image: ImageRef,
    pub error: LoadError,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} '{}' ({}): {}",
            self.index + 1,
            self.image.title,
            self.image.url,
            self.error
        )
    }
}

/// Raw bytes from a fetch plus the host's CORS verdict.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub cors_granted: bool,
}

/// A decoded raster owned by one compositor run.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub source: ImageRef,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub handle: Arc<DynamicImage>,
    pub cors_granted: bool,
}

/// Source of image bytes.
///
/// The production implementation is [`HttpFetcher`]; tests use an in-memory
/// map. Implementations may suspend freely, but must not assume they run on
/// their own thread.
pub trait Fetcher: Sync {
    fn fetch(
        &self,
        image: &ImageRef,
    ) -> impl Future<Output = Result<FetchedImage, FetchError>> + Send;
}

/// How a batch with failures is aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadPolicy {
    /// Any failed item fails the whole batch.
    #[default]
    FailFast,
    /// Failed items are reported; successes continue.
    Tolerant,
}

impl FromStr for LoadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail-fast" => Ok(LoadPolicy::FailFast),
            "tolerant" => Ok(LoadPolicy::Tolerant),
            other => Err(format!(
                "unknown policy '{other}' (expected fail-fast or tolerant)"
            )),
        }
    }
}

impl LoadPolicy {
    /// Apply the policy to a settled batch.
    pub fn apply(self, report: LoadReport) -> Result<LoadReport, Vec<LoadFailure>> {
        match self {
            LoadPolicy::FailFast if !report.failures.is_empty() => Err(report.failures),
            _ => Ok(report),
        }
    }
}

/// Per-item outcome of [`load_images`].
pub type ItemResult = Result<DecodedImage, LoadFailure>;

/// A settled batch: one slot per input (None where it failed), plus failures.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub slots: Vec<Option<DecodedImage>>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn loaded(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True if any loaded image came from a host that did not grant CORS.
    pub fn is_tainted(&self) -> bool {
        self.slots.iter().flatten().any(|img| !img.cors_granted)
    }
}

/// Split per-item results into slots and failures, keeping input order.
pub fn settle(results: Vec<ItemResult>) -> LoadReport {
    let mut report = LoadReport::default();
    for result in results {
        match result {
            Ok(image) => report.slots.push(Some(image)),
            Err(failure) => {
                report.slots.push(None);
                report.failures.push(failure);
            }
        }
    }
    report
}

/// Knobs for one load batch.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions<'a> {
    pub max_concurrent: usize,
    pub cache: Option<&'a DecodeCache>,
    /// Sources with more pixels than this are refused before decoding.
    pub max_source_pixels: u64,
}

impl Default for LoadOptions<'_> {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            cache: None,
            max_source_pixels: 100_000_000,
        }
    }
}

/// Fetch and decode every image, at most `max_concurrent` at a time.
///
/// Suspends until every item settles. `on_settled` fires once per item as it
/// completes (useful for progress output); the returned vector is in input
/// order.
#[tracing::instrument(skip_all, fields(count = images.len(), max_concurrent = options.max_concurrent))]
pub async fn load_images<F, B, C, P>(
    fetcher: &F,
    backend: &B,
    images: &[ImageRef],
    options: &LoadOptions<'_>,
    is_cancelled: C,
    on_settled: P,
) -> Vec<ItemResult>
where
    F: Fetcher,
    B: ImageBackend,
    C: Fn() -> bool,
    P: Fn(usize, &ItemResult),
{
    let is_cancelled = &is_cancelled;
    let on_settled = &on_settled;
    let cache = options.cache;
    let max_pixels = options.max_source_pixels;

    stream::iter(images.iter().enumerate())
        .map(|(index, image)| async move {
            let result = load_one(fetcher, backend, image, cache, max_pixels, is_cancelled)
                .await
                .map_err(|error| LoadFailure {
                    index,
                    image: image.clone(),
                    error,
                });
            match &result {
                Ok(decoded) => tracing::debug!(
                    index,
                    url = %image.url,
                    width = decoded.pixel_width,
                    height = decoded.pixel_height,
                    "image loaded"
                ),
                Err(failure) => tracing::warn!(index, url = %image.url, error = %failure.error, "image failed"),
            }
            on_settled(index, &result);
            result
        })
        .buffered(options.max_concurrent.max(1))
        .collect()
        .await
}

async fn load_one<F, B, C>(
    fetcher: &F,
    backend: &B,
    image: &ImageRef,
    cache: Option<&DecodeCache>,
    max_pixels: u64,
    is_cancelled: &C,
) -> Result<DecodedImage, LoadError>
where
    F: Fetcher,
    B: ImageBackend,
    C: Fn() -> bool,
{
    if let Some(hit) = cache.and_then(|c| c.get(image)) {
        return Ok(decoded_from(image, hit.image, hit.cors_granted));
    }
    if is_cancelled() {
        return Err(LoadError::Cancelled);
    }

    let fetched = fetcher.fetch(image).await?;
    let dims = backend.identify(&fetched.bytes)?;
    if dims.pixels() > max_pixels {
        return Err(LoadError::TooLarge {
            width: dims.width,
            height: dims.height,
            max_pixels,
        });
    }
    let handle = Arc::new(backend.decode(&fetched.bytes)?);

    if let Some(cache) = cache {
        cache.insert(
            image,
            CachedDecode {
                image: Arc::clone(&handle),
                cors_granted: fetched.cors_granted,
            },
        );
    }
    Ok(decoded_from(image, handle, fetched.cors_granted))
}

fn decoded_from(image: &ImageRef, handle: Arc<DynamicImage>, cors_granted: bool) -> DecodedImage {
    DecodedImage {
        source: image.clone(),
        pixel_width: handle.width(),
        pixel_height: handle.height(),
        handle,
        cors_granted,
    }
}

// =============================================================================
// HTTP / filesystem fetcher
// =============================================================================

/// Where an image source string points.
#[derive(Debug, PartialEq)]
enum Source {
    Local(PathBuf),
    Remote(reqwest::Url),
}

fn classify_source(source: &str) -> Result<Source, FetchError> {
    match reqwest::Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Source::Remote(url)),
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map(Source::Local)
            .map_err(|_| FetchError::InvalidUrl(source.to_string())),
        // `C:\photos\a.jpg` parses as scheme "c"
        Ok(url) if url.scheme().len() == 1 => Ok(Source::Local(PathBuf::from(source))),
        Ok(url) => Err(FetchError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            url.scheme(),
            source
        ))),
        Err(_) => Ok(Source::Local(PathBuf::from(source))),
    }
}

/// Decide whether a response lets the app origin read the image pixels.
///
/// With no app origin configured every source is treated as same-origin.
/// Same-origin URLs never need CORS. Otherwise anonymous requests need
/// `Access-Control-Allow-Origin` of `*` or the app origin, and credentialed
/// requests need the exact origin plus `Access-Control-Allow-Credentials: true`.
pub fn cors_granted(
    app_origin: Option<&str>,
    url: &reqwest::Url,
    access: AccessMode,
    headers: &HeaderMap,
) -> bool {
    let Some(app_origin) = app_origin.map(|o| o.trim_end_matches('/')) else {
        return true;
    };
    if url.origin().ascii_serialization() == app_origin {
        return true;
    }

    let header = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
    let allow_origin = header(ACCESS_CONTROL_ALLOW_ORIGIN);
    match access {
        AccessMode::Anonymous => allow_origin == Some("*") || allow_origin == Some(app_origin),
        AccessMode::Credentialed => {
            allow_origin == Some(app_origin)
                && header(ACCESS_CONTROL_ALLOW_CREDENTIALS)
                    .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        }
    }
}

/// Fetches remote images over HTTP(S) and local ones from disk.
pub struct HttpFetcher {
    client: reqwest::Client,
    context: RequestContext,
    app_origin: Option<String>,
}

impl HttpFetcher {
    pub fn new(
        context: RequestContext,
        app_origin: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::from_reqwest)?;
        Ok(Self {
            client,
            context,
            app_origin,
        })
    }

    async fn fetch_remote(
        &self,
        url: reqwest::Url,
        access: AccessMode,
    ) -> Result<FetchedImage, FetchError> {
        let mut request = self.client.get(url.clone());
        if access == AccessMode::Credentialed
            && let Some(token) = &self.context.token
        {
            request = request.bearer_auth(token);
        }
        if let Some(origin) = &self.app_origin {
            request = request.header(ORIGIN, origin.as_str());
        }

        let response = request.send().await.map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let cors_granted = cors_granted(self.app_origin.as_deref(), &url, access, response.headers());
        if !cors_granted {
            tracing::warn!(url = %url, %access, "host did not grant CORS; canvas will be tainted");
        }
        let bytes = response.bytes().await.map_err(FetchError::from_reqwest)?;
        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            cors_granted,
        })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, image: &ImageRef) -> Result<FetchedImage, FetchError> {
        match classify_source(&image.url)? {
            Source::Local(path) => {
                let bytes = tokio::fs::read(&path).await?;
                Ok(FetchedImage {
                    bytes,
                    cors_granted: true,
                })
            }
            Source::Remote(url) => self.fetch_remote(url, image.access).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp, mock_image_bytes};
    use crate::test_helpers::StaticFetcher;
    use reqwest::header::HeaderValue;
    use std::cell::Cell as StdCell;

    fn refs(n: usize) -> Vec<ImageRef> {
        (0..n)
            .map(|i| ImageRef::new(i.to_string(), format!("https://img.test/{i}.jpg"), format!("img{i}")))
            .collect()
    }

    fn fetcher_for(images: &[ImageRef]) -> StaticFetcher {
        let mut fetcher = StaticFetcher::new();
        for (i, img) in images.iter().enumerate() {
            fetcher = fetcher.with_image(&img.url, mock_image_bytes(100 + i as u32, 50, [9, 9, 9]));
        }
        fetcher
    }

    // =========================================================================
    // load_images
    // =========================================================================

    #[tokio::test]
    async fn loads_all_in_input_order() {
        let images = refs(5);
        let fetcher = fetcher_for(&images);
        let backend = MockBackend::new();

        let results = load_images(&fetcher, &backend, &images, &LoadOptions::default(), || false, |_, _| {}).await;

        let widths: Vec<u32> = results.iter().map(|r| r.as_ref().unwrap().pixel_width).collect();
        assert_eq!(widths, vec![100, 101, 102, 103, 104]);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_siblings() {
        let images = refs(3);
        let fetcher = fetcher_for(&images).with_status(&images[1].url, 404);
        let backend = MockBackend::new();

        let results = load_images(&fetcher, &backend, &images, &LoadOptions::default(), || false, |_, _| {}).await;

        assert!(results[0].is_ok());
        assert!(results[2].is_ok());
        let failure = results[1].as_ref().unwrap_err();
        assert_eq!(failure.index, 1);
        assert!(matches!(
            failure.error,
            LoadError::Fetch(FetchError::Status { status: 404, .. })
        ));
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test]
    async fn undecodable_bytes_are_a_decode_failure() {
        let images = refs(1);
        let fetcher = StaticFetcher::new().with_image(&images[0].url, b"<html>oops</html>".to_vec());
        let backend = MockBackend::new();

        let results = load_images(&fetcher, &backend, &images, &LoadOptions::default(), || false, |_, _| {}).await;
        assert!(matches!(results[0], Err(LoadFailure { error: LoadError::Decode(_), .. })));
    }

    #[tokio::test]
    async fn oversized_source_is_refused_before_decode() {
        let images = refs(2);
        let fetcher = StaticFetcher::new()
            .with_image(&images[0].url, mock_image_bytes(100, 100, [1, 2, 3]))
            .with_image(&images[1].url, mock_image_bytes(200, 100, [1, 2, 3]));
        let backend = MockBackend::new();
        let options = LoadOptions {
            max_source_pixels: 10_000,
            ..LoadOptions::default()
        };

        let results = load_images(&fetcher, &backend, &images, &options, || false, |_, _| {}).await;

        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(LoadFailure {
                error: LoadError::TooLarge {
                    width: 200,
                    height: 100,
                    max_pixels: 10_000
                },
                ..
            })
        ));
        let decodes = backend
            .get_operations()
            .into_iter()
            .filter(|op| matches!(op, RecordedOp::Decode { .. }))
            .count();
        assert_eq!(decodes, 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let images = refs(7);
        let fetcher = fetcher_for(&images);
        let backend = MockBackend::new();
        let options = LoadOptions {
            max_concurrent: 2,
            ..LoadOptions::default()
        };

        let results = load_images(&fetcher, &backend, &images, &options, || false, |_, _| {}).await;

        assert_eq!(results.len(), 7);
        assert_eq!(fetcher.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_new_requests() {
        let images = refs(4);
        let fetcher = fetcher_for(&images);
        let backend = MockBackend::new();
        let settled = StdCell::new(0);
        let options = LoadOptions {
            max_concurrent: 1,
            ..LoadOptions::default()
        };

        // Cancel once the first image has settled.
        let results = load_images(
            &fetcher,
            &backend,
            &images,
            &options,
            || settled.get() >= 1,
            |_, _| settled.set(settled.get() + 1),
        )
        .await;

        assert!(results[0].is_ok());
        assert!(
            results[1..]
                .iter()
                .all(|r| matches!(r, Err(LoadFailure { error: LoadError::Cancelled, .. })))
        );
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn cache_skips_second_fetch() {
        let images = refs(2);
        let fetcher = fetcher_for(&images);
        let backend = MockBackend::new();
        let cache = DecodeCache::new(8);
        let options = LoadOptions {
            max_concurrent: 4,
            cache: Some(&cache),
            ..LoadOptions::default()
        };

        load_images(&fetcher, &backend, &images, &options, || false, |_, _| {}).await;
        let again = load_images(&fetcher, &backend, &images, &options, || false, |_, _| {}).await;

        assert!(again.iter().all(|r| r.is_ok()));
        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(cache.stats().hits, 2);
    }

    #[tokio::test]
    async fn taint_flag_travels_with_decoded_image() {
        let images = refs(2);
        let fetcher = fetcher_for(&images).with_tainted(&images[1].url);
        let backend = MockBackend::new();

        let results = load_images(&fetcher, &backend, &images, &LoadOptions::default(), || false, |_, _| {}).await;
        let report = settle(results);
        assert!(report.is_tainted());
        assert!(!report.slots[1].as_ref().unwrap().cors_granted);
    }

    // =========================================================================
    // settle / policy
    // =========================================================================

    fn failure(index: usize) -> LoadFailure {
        LoadFailure {
            index,
            image: ImageRef::new(index.to_string(), "u", "t"),
            error: LoadError::Cancelled,
        }
    }

    #[test]
    fn settle_keeps_slots_aligned_with_input() {
        let report = settle(vec![Err(failure(0)), Err(failure(1))]);
        assert_eq!(report.slots.len(), 2);
        assert_eq!(report.loaded(), 0);
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn fail_fast_rejects_any_failure() {
        let report = settle(vec![Err(failure(0))]);
        let err = LoadPolicy::FailFast.apply(report).unwrap_err();
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn tolerant_passes_failures_through() {
        let report = settle(vec![Err(failure(3))]);
        let report = LoadPolicy::Tolerant.apply(report).unwrap();
        assert_eq!(report.failures[0].index, 3);
    }

    #[test]
    fn policy_parses_from_cli_strings() {
        assert_eq!("tolerant".parse::<LoadPolicy>().unwrap(), LoadPolicy::Tolerant);
        assert_eq!("fail-fast".parse::<LoadPolicy>().unwrap(), LoadPolicy::FailFast);
        assert!("lenient".parse::<LoadPolicy>().is_err());
    }

    #[test]
    fn failure_display_names_image() {
        let f = LoadFailure {
            index: 1,
            image: ImageRef::new("7", "https://x/y.jpg", "Dusk"),
            error: LoadError::Fetch(FetchError::Status {
                status: 404,
                url: "https://x/y.jpg".into(),
            }),
        };
        assert_eq!(
            f.to_string(),
            "#2 'Dusk' (https://x/y.jpg): fetch failed: HTTP 404 for https://x/y.jpg"
        );
    }

    // =========================================================================
    // classify_source / cors_granted
    // =========================================================================

    #[test]
    fn classify_distinguishes_remote_and_local() {
        assert!(matches!(
            classify_source("https://cdn.test/a.jpg").unwrap(),
            Source::Remote(_)
        ));
        assert_eq!(
            classify_source("photos/a.jpg").unwrap(),
            Source::Local(PathBuf::from("photos/a.jpg"))
        );
        assert!(matches!(
            classify_source("ftp://host/a.jpg"),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    fn url(s: &str) -> reqwest::Url {
        reqwest::Url::parse(s).unwrap()
    }

    #[test]
    fn cors_not_required_without_app_origin() {
        assert!(cors_granted(None, &url("https://cdn.test/a.jpg"), AccessMode::Anonymous, &HeaderMap::new()));
    }

    #[test]
    fn same_origin_needs_no_headers() {
        assert!(cors_granted(
            Some("https://app.test/"),
            &url("https://app.test/uploads/a.jpg"),
            AccessMode::Credentialed,
            &HeaderMap::new()
        ));
    }

    #[test]
    fn anonymous_cross_origin_accepts_wildcard_or_exact() {
        let origin = Some("https://app.test");
        let target = url("https://cdn.test/a.jpg");

        let mut wildcard = HeaderMap::new();
        wildcard.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        assert!(cors_granted(origin, &target, AccessMode::Anonymous, &wildcard));

        let mut exact = HeaderMap::new();
        exact.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("https://app.test"));
        assert!(cors_granted(origin, &target, AccessMode::Anonymous, &exact));

        assert!(!cors_granted(origin, &target, AccessMode::Anonymous, &HeaderMap::new()));
    }

    #[test]
    fn credentialed_cross_origin_needs_exact_origin_and_credentials() {
        let origin = Some("https://app.test");
        let target = url("https://cdn.test/a.jpg");

        let mut wildcard = HeaderMap::new();
        wildcard.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        wildcard.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        assert!(!cors_granted(origin, &target, AccessMode::Credentialed, &wildcard));

        let mut exact = HeaderMap::new();
        exact.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("https://app.test"));
        assert!(!cors_granted(origin, &target, AccessMode::Credentialed, &exact));
        exact.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        assert!(cors_granted(origin, &target, AccessMode::Credentialed, &exact));
    }

    // =========================================================================
    // HttpFetcher against a local server
    // =========================================================================

    /// Accept one connection, answer it with `response`, and return the
    /// request head lowercased.
    async fn serve_once(listener: &tokio::net::TcpListener, response: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            head.extend_from_slice(&buf[..n]);
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&head).to_lowercase()
    }

    async fn local_server() -> (tokio::net::TcpListener, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    fn remote_fetcher(token: &str) -> HttpFetcher {
        let ctx = RequestContext::new("http://api.test").with_token(token);
        HttpFetcher::new(ctx, Some("https://app.test".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn remote_credentialed_fetch_sends_token_and_reads_cors() {
        let (listener, base) = local_server().await;
        let image = ImageRef::new("1", format!("{base}/a.jpg"), "a").with_access(AccessMode::Credentialed);
        let response = "HTTP/1.1 200 OK\r\n\
                        Content-Length: 3\r\n\
                        Access-Control-Allow-Origin: https://app.test\r\n\
                        Access-Control-Allow-Credentials: true\r\n\
                        Connection: close\r\n\r\nabc";

        let fetcher = remote_fetcher("t0k");
        let (request, fetched) = tokio::join!(serve_once(&listener, response), fetcher.fetch(&image));

        assert!(request.starts_with("get /a.jpg http/1.1"));
        assert!(request.contains("authorization: bearer t0k"));
        assert!(request.contains("origin: https://app.test"));
        let fetched = fetched.unwrap();
        assert_eq!(fetched.bytes, b"abc");
        assert!(fetched.cors_granted);
    }

    #[tokio::test]
    async fn remote_anonymous_fetch_without_cors_is_tainted() {
        let (listener, base) = local_server().await;
        let image = ImageRef::new("1", format!("{base}/b.jpg"), "b");
        let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";

        let fetcher = remote_fetcher("t0k");
        let (request, fetched) = tokio::join!(serve_once(&listener, response), fetcher.fetch(&image));

        assert!(!request.contains("authorization"));
        let fetched = fetched.unwrap();
        assert_eq!(fetched.bytes, b"ok");
        assert!(!fetched.cors_granted);
    }

    #[tokio::test]
    async fn remote_error_status_is_reported() {
        let (listener, base) = local_server().await;
        let url = format!("{base}/missing.jpg");
        let image = ImageRef::new("1", url.clone(), "missing");
        let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

        let fetcher = remote_fetcher("t0k");
        let (_, fetched) = tokio::join!(serve_once(&listener, response), fetcher.fetch(&image));

        match fetched {
            Err(FetchError::Status { status, url: failed }) => {
                assert_eq!(status, 404);
                assert_eq!(failed, url);
            }
            other => panic!("expected HTTP status error, got {other:?}"),
        }
    }
}
