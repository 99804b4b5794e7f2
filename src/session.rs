//! Collage session: one canvas, one run at a time.
//!
//! [`compose_collage`] is the one-shot pipeline (plan → load → paint). A
//! [`CollageSession`] wraps the same stages for interactive use, where the
//! user keeps changing template, size and selection:
//!
//! - The session is the only owner of the canvas. A compose request while a
//!   run is in flight is rejected with [`CollageError::Busy`].
//! - Every run gets a generation number. [`CollageSession::invalidate`] bumps
//!   it; a run whose generation is stale stops issuing fetches and ends with
//!   [`CollageError::Superseded`] without touching the current artifact.
//! - Progress is tracked by an explicit [`SessionState`] machine:
//!
//! ```text
//! Idle → Loading → LaidOut → Composing → Composed → Downloading → Idle
//!           ↓                                    ↘ Sharing     → Idle
//!       LoadFailed → Idle
//! ```
//!
//! Any failure returns the session to `Idle`. A previously composed artifact
//! survives failed and superseded runs.

use crate::cache::{CacheStats, DecodeCache};
use crate::compositor::{CanvasArtifact, ComposeOptions, SkippedImage, compose};
use crate::config::CollageConfig;
use crate::export::{
    self, ArchiveBlob, ArchiveOptions, DownloadSink, ExportError, ExportSettings, ExportedFile,
    ShareError, ShareOutcome, ShareTarget,
};
use crate::imaging::ImageBackend;
use crate::layout::{LayoutError, Template, layout};
use crate::loader::{Fetcher, LoadFailure, LoadOptions, LoadReport, load_images, settle};
use crate::types::ImageRef;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollageError {
    #[error("{} image(s) failed to load: {}", .0.len(), list_failures(.0))]
    LoadFailure(Vec<LoadFailure>),
    #[error("cannot encode canvas: {0}")]
    EncodeFailure(ExportError),
    #[error("sharing is not supported here")]
    ShareUnsupported,
    #[error("{} image(s) could not be fetched for the archive: {}", .0.len(), list_failures(.0))]
    ArchiveFetchFailure(Vec<LoadFailure>),
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),
    #[error("a collage run is already in progress")]
    Busy,
    #[error("run {generation} was superseded by a newer request")]
    Superseded { generation: u64 },
    #[error("cannot go from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export failed: {0}")]
    Export(ExportError),
}

fn list_failures(failures: &[LoadFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ExportError> for CollageError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Tainted | ExportError::Encode(_) => CollageError::EncodeFailure(err),
            ExportError::ArchiveFetch(failures) => CollageError::ArchiveFetchFailure(failures),
            ExportError::Share(ShareError::Unsupported) => CollageError::ShareUnsupported,
            ExportError::Io(e) => CollageError::Io(e),
            other => CollageError::Export(other),
        }
    }
}

/// Where a session is in its render/export cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    LoadFailed,
    LaidOut,
    Composing,
    Composed,
    Downloading,
    Sharing,
}

impl SessionState {
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Idle | Composed, Loading)
                | (Loading, LoadFailed | LaidOut)
                | (LaidOut, Composing)
                | (Composing, Composed)
                | (Idle | Composed, Downloading | Sharing)
                | (_, Idle)
        )
    }

    /// A run or export is in flight.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            SessionState::Loading
                | SessionState::LaidOut
                | SessionState::Composing
                | SessionState::Downloading
                | SessionState::Sharing
        )
    }
}

/// Progress reported to whoever renders output.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    RunStarted {
        generation: u64,
        template: Template,
        total: usize,
    },
    ImageLoaded {
        index: usize,
        title: String,
        width: u32,
        height: u32,
    },
    ImageFailed {
        index: usize,
        title: String,
        reason: String,
    },
    Composed {
        generation: u64,
        width: u32,
        height: u32,
        drawn: usize,
        skipped: Vec<SkippedImage>,
    },
    Saved {
        filename: String,
        size: usize,
        path: Option<PathBuf>,
    },
    Shared {
        filename: String,
    },
    ShareFellBack {
        filename: String,
    },
    Archived {
        filename: String,
        entries: usize,
        skipped: Vec<SkippedImage>,
    },
}

// =============================================================================
// Pipeline stages
// =============================================================================

/// A validated run: which images are used and how the canvas looks.
#[derive(Debug, Clone)]
struct Plan {
    template: Template,
    selected: Vec<ImageRef>,
    options: ComposeOptions,
}

/// Validate the layout and drop images past the template's capacity before
/// anything is fetched.
fn plan(
    images: &[ImageRef],
    template: Template,
    size: u32,
    config: &CollageConfig,
) -> Result<Plan, CollageError> {
    let options = ComposeOptions::resolve(template, size, config)?;
    let cells = layout(template, images.len(), options.canvas_size, options.padding)?;
    let take = match template.capacity() {
        Some(_) => cells.len(),
        None => images.len(),
    };
    if take < images.len() {
        tracing::debug!(dropped = images.len() - take, "selection truncated to template capacity");
    }
    Ok(Plan {
        template,
        selected: images[..take].to_vec(),
        options,
    })
}

async fn load_stage<F, B, C, P>(
    fetcher: &F,
    backend: &B,
    plan: &Plan,
    config: &CollageConfig,
    cache: Option<&DecodeCache>,
    is_cancelled: C,
    on_settled: P,
) -> Result<LoadReport, Vec<LoadFailure>>
where
    F: Fetcher,
    B: ImageBackend,
    C: Fn() -> bool,
    P: Fn(usize, &crate::loader::ItemResult),
{
    let options = LoadOptions {
        max_concurrent: config.loading.max_concurrent,
        cache,
        max_source_pixels: config.loading.max_source_pixels(),
    };
    let results = load_images(
        fetcher,
        backend,
        &plan.selected,
        &options,
        is_cancelled,
        on_settled,
    )
    .await;
    config.loading.policy.apply(settle(results))
}

fn paint_stage<B: ImageBackend>(
    backend: &B,
    plan: &Plan,
    report: &LoadReport,
) -> Result<CanvasArtifact, CollageError> {
    // A tainted canvas could be painted but never exported, so refuse early.
    if report.is_tainted() {
        return Err(CollageError::EncodeFailure(ExportError::Tainted));
    }
    let mut artifact = compose(backend, plan.template, &report.slots, &plan.options)?;
    artifact.skipped = report.failures.iter().map(SkippedImage::from).collect();
    Ok(artifact)
}

/// Load `images`, lay them out with `template`, and paint the canvas.
///
/// `size` is the edge of square canvases; tile sheets size themselves from
/// `[tiles]`. Fails with [`CollageError::LoadFailure`] under the fail-fast
/// policy if any image fails.
#[tracing::instrument(skip_all, fields(template = %template, count = images.len()))]
pub async fn compose_collage<F: Fetcher, B: ImageBackend>(
    fetcher: &F,
    backend: &B,
    images: &[ImageRef],
    template: Template,
    size: u32,
    config: &CollageConfig,
) -> Result<CanvasArtifact, CollageError> {
    let plan = plan(images, template, size, config)?;
    let report = load_stage(fetcher, backend, &plan, config, None, || false, |_, _| {})
        .await
        .map_err(CollageError::LoadFailure)?;
    paint_stage(backend, &plan, &report)
}

// =============================================================================
// Session
// =============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns one canvas and serializes access to it.
pub struct CollageSession<F, B> {
    fetcher: F,
    backend: B,
    config: CollageConfig,
    state: Mutex<SessionState>,
    artifact: Mutex<Option<Arc<CanvasArtifact>>>,
    generation: AtomicU64,
    cache: Option<DecodeCache>,
    events: Option<Sender<PipelineEvent>>,
}

impl<F: Fetcher, B: ImageBackend> CollageSession<F, B> {
    pub fn new(fetcher: F, backend: B, config: CollageConfig) -> Self {
        let cache = config
            .loading
            .memoize
            .then(|| DecodeCache::new(config.loading.cache_capacity));
        Self {
            fetcher,
            backend,
            config,
            state: Mutex::new(SessionState::Idle),
            artifact: Mutex::new(None),
            generation: AtomicU64::new(0),
            cache,
            events: None,
        }
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &CollageConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Generation of the most recent run or invalidation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The current canvas, if one is composed.
    pub fn artifact(&self) -> Option<Arc<CanvasArtifact>> {
        lock(&self.artifact).clone()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(DecodeCache::stats)
    }

    /// Decoded images currently held for reuse.
    pub fn cached_images(&self) -> usize {
        self.cache.as_ref().map_or(0, DecodeCache::len)
    }

    /// Mark the current canvas stale (template, size or selection changed).
    ///
    /// Any in-flight run stops issuing fetches and will end as superseded.
    pub fn invalidate(&self) {
        // Bumped under the artifact lock so a finishing run cannot slip a
        // stale canvas in between the bump and the take.
        let mut current = lock(&self.artifact);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        current.take();
        let mut state = lock(&self.state);
        if *state == SessionState::Composed {
            *state = SessionState::Idle;
        }
        tracing::debug!(generation, "session invalidated");
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            tx.send(event).ok();
        }
    }

    fn transition(&self, to: SessionState) -> Result<(), CollageError> {
        let mut state = lock(&self.state);
        if !state.can_transition(to) {
            return Err(CollageError::InvalidTransition { from: *state, to });
        }
        tracing::trace!(from = ?*state, to = ?to, "session transition");
        *state = to;
        Ok(())
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Start a run: reject if busy, then claim the canvas with a new generation.
    fn begin_run(&self) -> Result<u64, CollageError> {
        let mut state = lock(&self.state);
        if state.is_busy() {
            return Err(CollageError::Busy);
        }
        if !state.can_transition(SessionState::Loading) {
            return Err(CollageError::InvalidTransition {
                from: *state,
                to: SessionState::Loading,
            });
        }
        *state = SessionState::Loading;
        Ok(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Compose a new canvas, replacing the current one on success.
    #[tracing::instrument(skip_all, fields(template = %template, count = images.len()))]
    pub async fn compose(
        &self,
        images: &[ImageRef],
        template: Template,
        size: u32,
    ) -> Result<Arc<CanvasArtifact>, CollageError> {
        if self.state().is_busy() {
            return Err(CollageError::Busy);
        }
        let plan = plan(images, template, size, &self.config)?;
        let generation = self.begin_run()?;
        self.emit(PipelineEvent::RunStarted {
            generation,
            template,
            total: plan.selected.len(),
        });

        let result = self.run(&plan, generation).await;
        if result.is_err() {
            *lock(&self.state) = SessionState::Idle;
        }
        result
    }

    async fn run(&self, plan: &Plan, generation: u64) -> Result<Arc<CanvasArtifact>, CollageError> {
        let loaded = load_stage(
            &self.fetcher,
            &self.backend,
            plan,
            &self.config,
            self.cache.as_ref(),
            || self.is_stale(generation),
            |index, result| self.emit(item_event(index, result)),
        )
        .await;
        if self.is_stale(generation) {
            tracing::info!(generation, "run superseded during loading");
            return Err(CollageError::Superseded { generation });
        }
        let report = match loaded {
            Ok(report) => report,
            Err(failures) => {
                self.transition(SessionState::LoadFailed)?;
                return Err(CollageError::LoadFailure(failures));
            }
        };

        self.transition(SessionState::LaidOut)?;
        self.transition(SessionState::Composing)?;
        let mut artifact = paint_stage(&self.backend, plan, &report)?;
        artifact.generation = generation;

        let artifact = Arc::new(artifact);
        {
            let mut current = lock(&self.artifact);
            if self.is_stale(generation) {
                return Err(CollageError::Superseded { generation });
            }
            *current = Some(Arc::clone(&artifact));
            self.transition(SessionState::Composed)?;
        }

        self.emit(PipelineEvent::Composed {
            generation,
            width: artifact.width(),
            height: artifact.height(),
            drawn: artifact.drawn_count(),
            skipped: artifact.skipped.clone(),
        });
        Ok(artifact)
    }

    /// Claim the current artifact for an export, moving into `to`.
    fn begin_export(&self, to: SessionState) -> Result<Arc<CanvasArtifact>, CollageError> {
        // Artifact before state, the same order as `invalidate` and `run`.
        let current = lock(&self.artifact);
        let mut state = lock(&self.state);
        if state.is_busy() {
            return Err(CollageError::Busy);
        }
        match current.as_ref() {
            Some(artifact) if state.can_transition(to) => {
                *state = to;
                Ok(Arc::clone(artifact))
            }
            _ => Err(CollageError::InvalidTransition { from: *state, to }),
        }
    }

    fn finish_export(&self) {
        *lock(&self.state) = SessionState::Idle;
    }

    fn settings(&self) -> ExportSettings {
        ExportSettings::from_config(&self.config.export)
    }

    /// Encode the current canvas and save it through `sink`.
    pub fn export_download<S: DownloadSink>(&self, sink: &S) -> Result<ExportedFile, CollageError> {
        let artifact = self.begin_export(SessionState::Downloading)?;
        let result = export::export_download(&self.backend, &artifact, sink, &self.settings());
        self.finish_export();
        let file = result?;
        self.emit(PipelineEvent::Saved {
            filename: file.filename.clone(),
            size: file.size,
            path: file.path.clone(),
        });
        Ok(file)
    }

    /// Share the current canvas, downloading it if `target` cannot share.
    pub async fn export_share<T: ShareTarget, S: DownloadSink>(
        &self,
        target: &T,
        sink: &S,
    ) -> Result<ShareOutcome, CollageError> {
        let artifact = self.begin_export(SessionState::Sharing)?;
        let result =
            export::export_share(&self.backend, &artifact, target, sink, &self.settings()).await;
        self.finish_export();
        let outcome = result?;
        match &outcome {
            ShareOutcome::Shared { filename } => self.emit(PipelineEvent::Shared {
                filename: filename.clone(),
            }),
            ShareOutcome::FellBack(file) => {
                self.emit(PipelineEvent::ShareFellBack {
                    filename: file.filename.clone(),
                });
                self.emit(PipelineEvent::Saved {
                    filename: file.filename.clone(),
                    size: file.size,
                    path: file.path.clone(),
                });
            }
        }
        Ok(outcome)
    }

    /// Bundle the selected originals into a ZIP and save it.
    ///
    /// Works on the selection, not the canvas, so it does not touch the
    /// session state.
    pub async fn export_archive<S: DownloadSink>(
        &self,
        images: &[ImageRef],
        sink: &S,
    ) -> Result<(ArchiveBlob, ExportedFile), CollageError> {
        let options = ArchiveOptions {
            filename: self.config.export.archive_filename.clone(),
            max_concurrent: self.config.loading.max_concurrent,
            policy: self.config.loading.policy,
        };
        let blob = export::export_archive(&self.fetcher, images, &options).await?;
        let file = sink.save(&blob.filename, &blob.bytes)?;
        self.emit(PipelineEvent::Archived {
            filename: blob.filename.clone(),
            entries: blob.entries.len(),
            skipped: blob.skipped.iter().map(SkippedImage::from).collect(),
        });
        self.emit(PipelineEvent::Saved {
            filename: file.filename.clone(),
            size: file.size,
            path: file.path.clone(),
        });
        Ok((blob, file))
    }
}

fn item_event(index: usize, result: &crate::loader::ItemResult) -> PipelineEvent {
    match result {
        Ok(image) => PipelineEvent::ImageLoaded {
            index,
            title: image.source.title.clone(),
            width: image.pixel_width,
            height: image.pixel_height,
        },
        Err(failure) => PipelineEvent::ImageFailed {
            index,
            title: failure.image.title.clone(),
            reason: failure.error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::NoShare;
    use crate::imaging::backend::tests::{MockBackend, mock_image_bytes};
    use crate::loader::LoadPolicy;
    use crate::test_helpers::{MemorySink, StaticFetcher};

    fn refs(n: usize) -> Vec<ImageRef> {
        (0..n)
            .map(|i| ImageRef::new(i.to_string(), format!("https://img.test/{i}.jpg"), format!("img{i}")))
            .collect()
    }

    fn serving(images: &[ImageRef]) -> StaticFetcher {
        images.iter().fold(StaticFetcher::new(), |f, img| {
            f.with_image(&img.url, mock_image_bytes(970, 485, [10, 20, 30]))
        })
    }

    fn tolerant() -> CollageConfig {
        let mut config = CollageConfig::default();
        config.loading.policy = LoadPolicy::Tolerant;
        config
    }

    // =========================================================================
    // compose_collage
    // =========================================================================

    #[tokio::test]
    async fn compose_collage_grid2x2() {
        let images = refs(4);
        let artifact = compose_collage(
            &serving(&images),
            &MockBackend::new(),
            &images,
            Template::Grid2x2,
            1000,
            &CollageConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!((artifact.width(), artifact.height()), (1000, 1000));
        assert_eq!(artifact.drawn_count(), 4);
    }

    #[tokio::test]
    async fn strip_fail_fast_gives_load_failure() {
        let images = refs(4);
        let fetcher = serving(&images)
            .with_status(&images[1].url, 404)
            .with_status(&images[3].url, 500);

        let result = compose_collage(
            &fetcher,
            &MockBackend::new(),
            &images,
            Template::StripH,
            800,
            &CollageConfig::default(),
        )
        .await;

        match result {
            Err(CollageError::LoadFailure(failures)) => {
                let indexes: Vec<usize> = failures.iter().map(|f| f.index).collect();
                assert_eq!(indexes, vec![1, 3]);
            }
            other => panic!("expected LoadFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn strip_tolerant_renders_survivors() {
        let images = refs(4);
        let fetcher = serving(&images)
            .with_status(&images[1].url, 404)
            .with_status(&images[3].url, 500);

        let artifact = compose_collage(
            &fetcher,
            &MockBackend::new(),
            &images,
            Template::StripH,
            800,
            &tolerant(),
        )
        .await
        .unwrap();

        assert_eq!(artifact.placements.len(), 4);
        assert_eq!(artifact.drawn_count(), 2);
        let skipped: Vec<usize> = artifact.skipped.iter().map(|s| s.index).collect();
        assert_eq!(skipped, vec![1, 3]);
    }

    #[tokio::test]
    async fn over_capacity_selection_is_not_fetched() {
        let images = refs(6);
        let fetcher = serving(&images);

        let artifact = compose_collage(
            &fetcher,
            &MockBackend::new(),
            &images,
            Template::Grid2x2,
            1000,
            &CollageConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(artifact.placements.len(), 4);
        assert_eq!(fetcher.calls().len(), 4);
    }

    #[tokio::test]
    async fn unsupported_template_fails_before_fetching() {
        let images = refs(2);
        let fetcher = serving(&images);

        let result = compose_collage(
            &fetcher,
            &MockBackend::new(),
            &images,
            Template::Diagonal,
            1000,
            &CollageConfig::default(),
        )
        .await;

        assert!(matches!(
            result,
            Err(CollageError::Layout(LayoutError::Unsupported(Template::Diagonal)))
        ));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn tainted_selection_is_encode_failure() {
        let images = refs(2);
        let fetcher = serving(&images).with_tainted(&images[0].url);

        let result = compose_collage(
            &fetcher,
            &MockBackend::new(),
            &images,
            Template::Grid2x2,
            1000,
            &CollageConfig::default(),
        )
        .await;

        assert!(matches!(
            result,
            Err(CollageError::EncodeFailure(ExportError::Tainted))
        ));
    }

    // =========================================================================
    // State machine
    // =========================================================================

    #[test]
    fn transitions_follow_cycle() {
        use SessionState::*;
        assert!(Idle.can_transition(Loading));
        assert!(Loading.can_transition(LaidOut));
        assert!(Loading.can_transition(LoadFailed));
        assert!(LoadFailed.can_transition(Idle));
        assert!(LaidOut.can_transition(Composing));
        assert!(Composing.can_transition(Composed));
        assert!(Composed.can_transition(Downloading));
        assert!(Composed.can_transition(Sharing));
        assert!(Sharing.can_transition(Idle));
    }

    #[test]
    fn illegal_transitions_rejected() {
        use SessionState::*;
        assert!(!Idle.can_transition(Composing));
        assert!(!Loading.can_transition(Composed));
        assert!(!LoadFailed.can_transition(LaidOut));
        assert!(!Downloading.can_transition(Sharing));
        assert!(!Sharing.can_transition(Loading));
    }

    // =========================================================================
    // Session
    // =========================================================================

    #[tokio::test]
    async fn session_compose_stores_artifact() {
        let images = refs(4);
        let session = CollageSession::new(serving(&images), MockBackend::new(), CollageConfig::default());

        let artifact = session.compose(&images, Template::Grid2x2, 1000).await.unwrap();

        assert_eq!(session.state(), SessionState::Composed);
        assert_eq!(artifact.generation, 1);
        assert!(Arc::ptr_eq(&artifact, &session.artifact().unwrap()));
    }

    #[tokio::test]
    async fn failed_run_keeps_previous_artifact() {
        let images = refs(4);
        let fetcher = serving(&images).with_status("https://img.test/missing.jpg", 404);
        let session = CollageSession::new(fetcher, MockBackend::new(), CollageConfig::default());

        let first = session.compose(&images, Template::Grid2x2, 1000).await.unwrap();
        let mut broken = images.clone();
        broken[0] = ImageRef::new("x", "https://img.test/missing.jpg", "missing");
        let result = session.compose(&broken, Template::Grid2x2, 1000).await;

        assert!(matches!(result, Err(CollageError::LoadFailure(_))));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(Arc::ptr_eq(&first, &session.artifact().unwrap()));
    }

    #[tokio::test]
    async fn second_compose_while_loading_is_busy() {
        let images = refs(4);
        let session = CollageSession::new(serving(&images), MockBackend::new(), CollageConfig::default());

        let (first, second) = tokio::join!(
            session.compose(&images, Template::Grid2x2, 1000),
            session.compose(&images, Template::Grid3x3, 1000),
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(CollageError::Busy)));
        assert_eq!(session.artifact().unwrap().template, Template::Grid2x2);
    }

    #[tokio::test]
    async fn invalidate_supersedes_in_flight_run() {
        let images = refs(3);
        let mut config = CollageConfig::default();
        config.loading.max_concurrent = 1;
        let session = CollageSession::new(serving(&images), MockBackend::new(), config);

        let (result, ()) = tokio::join!(session.compose(&images, Template::Grid2x2, 1000), async {
            session.invalidate();
        });

        assert!(matches!(result, Err(CollageError::Superseded { generation: 1 })));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.artifact().is_none());
    }

    #[tokio::test]
    async fn invalidate_drops_composed_canvas() {
        let images = refs(1);
        let session = CollageSession::new(serving(&images), MockBackend::new(), CollageConfig::default());
        session.compose(&images, Template::Grid2x2, 1000).await.unwrap();

        session.invalidate();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.artifact().is_none());
        assert!(matches!(
            session.export_download(&MemorySink::new()),
            Err(CollageError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn rerender_uses_decode_cache() {
        let images = refs(4);
        let session = CollageSession::new(serving(&images), MockBackend::new(), CollageConfig::default());

        session.compose(&images, Template::Grid2x2, 1000).await.unwrap();
        session.invalidate();
        session.compose(&images, Template::StripV, 600).await.unwrap();

        assert_eq!(session.cache_stats().unwrap().hits, 4);
        assert_eq!(session.artifact().unwrap().generation, 3);
    }

    #[tokio::test]
    async fn changing_selections_keep_cache_bounded() {
        let images = refs(20);
        let mut config = CollageConfig::default();
        config.loading.cache_capacity = 6;
        let session = CollageSession::new(serving(&images), MockBackend::new(), config);

        for selection in images.chunks(4) {
            session.compose(selection, Template::Grid2x2, 400).await.unwrap();
            session.invalidate();
            assert!(session.cached_images() <= 6);
        }

        assert_eq!(session.cached_images(), 6);
        let stats = session.cache_stats().unwrap();
        assert_eq!(stats.misses, 20);
        assert_eq!(stats.evicted, 14);
    }

    #[test]
    fn invalidate_racing_compose_never_leaves_a_stale_canvas() {
        use std::sync::atomic::AtomicBool;

        let images = refs(4);
        let session = CollageSession::new(serving(&images), MockBackend::new(), CollageConfig::default());
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    session.invalidate();
                    std::thread::yield_now();
                }
            });

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            for _ in 0..200 {
                match runtime.block_on(session.compose(&images, Template::Grid2x2, 200)) {
                    Ok(artifact) => assert!(artifact.generation <= session.generation()),
                    Err(CollageError::Superseded { .. }) => {}
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
                assert!(!session.state().is_busy());
            }
            done.store(true, Ordering::SeqCst);
        });

        match session.artifact() {
            Some(artifact) => {
                assert_eq!(artifact.generation, session.generation());
                assert_eq!(session.state(), SessionState::Composed);
            }
            None => assert_ne!(session.state(), SessionState::Composed),
        }
    }

    #[tokio::test]
    async fn download_then_download_again() {
        let images = refs(2);
        let session = CollageSession::new(serving(&images), MockBackend::new(), CollageConfig::default());
        let sink = MemorySink::new();
        session.compose(&images, Template::Grid2x2, 1000).await.unwrap();

        session.export_download(&sink).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        session.export_download(&sink).unwrap();

        assert_eq!(sink.saved().len(), 2);
    }

    #[tokio::test]
    async fn download_without_canvas_is_rejected() {
        let session = CollageSession::new(StaticFetcher::new(), MockBackend::new(), CollageConfig::default());
        assert!(matches!(
            session.export_download(&MemorySink::new()),
            Err(CollageError::InvalidTransition {
                from: SessionState::Idle,
                to: SessionState::Downloading
            })
        ));
    }

    #[tokio::test]
    async fn encode_failure_returns_to_idle() {
        let images = refs(1);
        let session = CollageSession::new(serving(&images), MockBackend::failing_encoder(), CollageConfig::default());
        session.compose(&images, Template::Grid2x2, 1000).await.unwrap();

        let result = session.export_download(&MemorySink::new());

        assert!(matches!(result, Err(CollageError::EncodeFailure(_))));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.artifact().is_some());
    }

    #[tokio::test]
    async fn events_trace_the_run() {
        let images = refs(2);
        let fetcher = serving(&images).with_status(&images[1].url, 404);
        let (tx, rx) = std::sync::mpsc::channel();
        let session = CollageSession::new(fetcher, MockBackend::new(), tolerant()).with_events(tx);

        session.compose(&images, Template::Grid2x2, 1000).await.unwrap();
        session.export_share(&NoShare, &MemorySink::new()).await.unwrap();
        drop(session);

        let events: Vec<PipelineEvent> = rx.iter().collect();
        assert!(matches!(events[0], PipelineEvent::RunStarted { generation: 1, total: 2, .. }));
        assert!(events.iter().any(|e| matches!(e, PipelineEvent::ImageFailed { index: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, PipelineEvent::Composed { drawn: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, PipelineEvent::ShareFellBack { .. })));
    }

    #[tokio::test]
    async fn archive_scenario_through_session() {
        let images = refs(3);
        let fetcher = serving(&images).with_status(&images[1].url, 404);
        let sink = MemorySink::new();

        let strict = CollageSession::new(fetcher, MockBackend::new(), CollageConfig::default());
        let result = strict.export_archive(&images, &sink).await;
        assert!(matches!(result, Err(CollageError::ArchiveFetchFailure(ref f)) if f.len() == 1));
        assert!(sink.saved().is_empty());

        let fetcher = serving(&images).with_status(&images[1].url, 404);
        let lenient = CollageSession::new(fetcher, MockBackend::new(), tolerant());
        let (blob, file) = lenient.export_archive(&images, &sink).await.unwrap();
        let names: Vec<&str> = blob.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["image1.jpg", "image3.jpg"]);
        assert_eq!(file.filename, "images.zip");
    }

    #[test]
    fn export_errors_map_to_taxonomy() {
        assert!(matches!(
            CollageError::from(ExportError::Tainted),
            CollageError::EncodeFailure(_)
        ));
        assert!(matches!(
            CollageError::from(ExportError::Share(ShareError::Unsupported)),
            CollageError::ShareUnsupported
        ));
        assert!(matches!(
            CollageError::from(ExportError::ArchiveFetch(vec![])),
            CollageError::ArchiveFetchFailure(_)
        ));
    }
}
