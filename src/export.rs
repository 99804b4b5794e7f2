//! Artifact exporter: painted canvas → file, share, or ZIP of originals.
//!
//! Three ways out:
//!
//! - [`export_download`] encodes the canvas and hands it to a
//!   [`DownloadSink`] (the CLI writes into the output directory).
//! - [`export_share`] offers the encoded file to a [`ShareTarget`]. When the
//!   target cannot take it, the file goes to the download sink instead and the
//!   outcome says so.
//! - [`export_archive`] fetches the selected originals and stores them in one
//!   ZIP as `image1.jpg`, `image2.jpg`, ... by input position.
//!
//! Export never repaints. A canvas is encoded exactly as the compositor left
//! it, and a tainted canvas is refused before any encoding starts.

use crate::compositor::CanvasArtifact;
use crate::config::ExportConfig;
use crate::imaging::{BackendError, ImageBackend, OutputFormat, Quality};
use crate::loader::{FetchError, Fetcher, LoadError, LoadFailure, LoadPolicy};
use crate::types::ImageRef;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("canvas contains images from hosts that did not grant CORS; it cannot be exported")]
    Tainted,
    #[error("encode failed: {0}")]
    Encode(#[from] BackendError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("share failed: {0}")]
    Share(ShareError),
    #[error("could not fetch {} of the selected images", .0.len())]
    ArchiveFetch(Vec<LoadFailure>),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("invalid share link: {0}")]
    ShareLink(String),
}

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("sharing files is not supported here")]
    Unsupported,
    #[error("share command failed: {0}")]
    Failed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Naming and encoding settings for exported collages.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub basename: String,
    pub jpeg_quality: Quality,
    pub share_title: String,
    pub share_text: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self::from_config(&ExportConfig::default())
    }
}

impl ExportSettings {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            basename: config.collage_basename.clone(),
            jpeg_quality: Quality::new(config.jpeg_quality),
            share_title: config.share_title.clone(),
            share_text: config.share_text.clone(),
        }
    }
}

/// An encoded canvas with its download name.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub filename: String,
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// `data:<mime>;base64,<payload>`
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), BASE64.encode(&self.bytes))
    }
}

/// A file handed to a [`DownloadSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub filename: String,
    pub size: usize,
    /// Where the sink put it, if it lives on disk.
    pub path: Option<PathBuf>,
}

/// Destination for downloads.
pub trait DownloadSink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<ExportedFile, ExportError>;
}

/// Writes downloads into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for DirectorySink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<ExportedFile, ExportError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        std::fs::write(&path, bytes)?;
        tracing::info!(path = %path.display(), size = bytes.len(), "file saved");
        Ok(ExportedFile {
            filename: filename.to_string(),
            size: bytes.len(),
            path: Some(path),
        })
    }
}

/// What a share target is asked to send.
#[derive(Debug, Clone, Copy)]
pub struct SharePayload<'a> {
    pub title: &'a str,
    pub text: &'a str,
    pub file: &'a EncodedImage,
}

/// A platform share mechanism.
pub trait ShareTarget: Sync {
    /// Whether this target accepts the file at all.
    fn can_share(&self, file: &EncodedImage) -> bool;

    fn share(&self, payload: SharePayload<'_>)
    -> impl Future<Output = Result<(), ShareError>> + Send;
}

/// A host with no share mechanism; every share falls back to download.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShare;

impl ShareTarget for NoShare {
    fn can_share(&self, _file: &EncodedImage) -> bool {
        false
    }

    async fn share(&self, _payload: SharePayload<'_>) -> Result<(), ShareError> {
        Err(ShareError::Unsupported)
    }
}

/// Shares by writing the file to a staging directory and running a command
/// with its path as the last argument.
#[derive(Debug, Clone)]
pub struct CommandShare {
    program: String,
    args: Vec<String>,
    staging_dir: PathBuf,
}

impl CommandShare {
    /// Build from an argv list such as `["open", "-a", "Mail"]`.
    ///
    /// Returns `None` for an empty list.
    pub fn from_argv(argv: &[String], staging_dir: impl Into<PathBuf>) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            staging_dir: staging_dir.into(),
        })
    }
}

impl ShareTarget for CommandShare {
    fn can_share(&self, _file: &EncodedImage) -> bool {
        true
    }

    async fn share(&self, payload: SharePayload<'_>) -> Result<(), ShareError> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let path = self.staging_dir.join(&payload.file.filename);
        tokio::fs::write(&path, &payload.file.bytes).await?;

        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(&path)
            .env("COLLAGIST_SHARE_TITLE", payload.title)
            .env("COLLAGIST_SHARE_TEXT", payload.text)
            .status()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ShareError::Unsupported,
                _ => ShareError::Io(e),
            })?;
        if !status.success() {
            return Err(ShareError::Failed(format!("{} exited with {status}", self.program)));
        }
        Ok(())
    }
}

/// Result of [`export_share`].
#[derive(Debug, Clone, PartialEq)]
pub enum ShareOutcome {
    Shared { filename: String },
    /// The target could not share; the file was downloaded instead.
    FellBack(ExportedFile),
}

/// Encode a painted canvas in its template's format.
pub fn encode_artifact<B: ImageBackend>(
    backend: &B,
    artifact: &CanvasArtifact,
    settings: &ExportSettings,
) -> Result<EncodedImage, ExportError> {
    if artifact.tainted {
        return Err(ExportError::Tainted);
    }
    let bytes = backend.encode(&artifact.image, artifact.format, settings.jpeg_quality)?;
    Ok(EncodedImage {
        filename: format!("{}.{}", settings.basename, artifact.format.extension()),
        format: artifact.format,
        bytes,
    })
}

/// Encode the canvas and save it through the sink.
#[tracing::instrument(skip_all, fields(template = %artifact.template))]
pub fn export_download<B: ImageBackend, S: DownloadSink>(
    backend: &B,
    artifact: &CanvasArtifact,
    sink: &S,
    settings: &ExportSettings,
) -> Result<ExportedFile, ExportError> {
    let file = encode_artifact(backend, artifact, settings)?;
    sink.save(&file.filename, &file.bytes)
}

/// Offer the encoded canvas to a share target, downloading it if the target
/// cannot take it.
#[tracing::instrument(skip_all, fields(template = %artifact.template))]
pub async fn export_share<B, T, S>(
    backend: &B,
    artifact: &CanvasArtifact,
    target: &T,
    sink: &S,
    settings: &ExportSettings,
) -> Result<ShareOutcome, ExportError>
where
    B: ImageBackend,
    T: ShareTarget,
    S: DownloadSink,
{
    let file = encode_artifact(backend, artifact, settings)?;

    if target.can_share(&file) {
        let payload = SharePayload {
            title: &settings.share_title,
            text: &settings.share_text,
            file: &file,
        };
        match target.share(payload).await {
            Ok(()) => {
                return Ok(ShareOutcome::Shared {
                    filename: file.filename,
                });
            }
            Err(ShareError::Unsupported) => {}
            Err(e) => return Err(ExportError::Share(e)),
        }
    }

    tracing::warn!(filename = %file.filename, "sharing unsupported, downloading instead");
    let saved = sink.save(&file.filename, &file.bytes)?;
    Ok(ShareOutcome::FellBack(saved))
}

// =============================================================================
// Share links
// =============================================================================

/// Social networks with a web share intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    WhatsApp,
    Facebook,
    Twitter,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::WhatsApp, Network::Facebook, Network::Twitter];

    pub fn name(self) -> &'static str {
        match self {
            Network::WhatsApp => "WhatsApp",
            Network::Facebook => "Facebook",
            Network::Twitter => "Twitter",
        }
    }

    fn intent(self, image_urls: &[String]) -> (&'static str, &'static str, String) {
        match self {
            Network::WhatsApp => (
                "https://wa.me/",
                "text",
                format!("Check these images: {}", image_urls.join(", ")),
            ),
            Network::Facebook => (
                "https://www.facebook.com/sharer/sharer.php",
                "u",
                image_urls.join(","),
            ),
            Network::Twitter => ("https://twitter.com/intent/tweet", "url", image_urls.join(",")),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Share-intent URLs that post the selected image URLs to each network.
///
/// WhatsApp gets a message listing the URLs; Facebook and Twitter get the
/// URLs comma-joined as the shared link.
pub fn share_links(image_urls: &[String]) -> Result<Vec<(Network, reqwest::Url)>, ExportError> {
    Network::ALL
        .into_iter()
        .map(|network| {
            let (base, key, value) = network.intent(image_urls);
            reqwest::Url::parse_with_params(base, [(key, value)])
                .map(|url| (network, url))
                .map_err(|e| ExportError::ShareLink(format!("{network}: {e}")))
        })
        .collect()
}

// =============================================================================
// Archive
// =============================================================================

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub filename: String,
    pub max_concurrent: usize,
    pub policy: LoadPolicy,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            filename: "images.zip".to_string(),
            max_concurrent: 6,
            policy: LoadPolicy::FailFast,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    /// Input position of the image.
    pub index: usize,
    pub name: String,
    pub size: usize,
}

/// A finished ZIP plus what went into it.
#[derive(Debug)]
pub struct ArchiveBlob {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub entries: Vec<ArchiveEntry>,
    /// Images left out under the tolerant policy.
    pub skipped: Vec<LoadFailure>,
}

/// Entry name for the image at zero-based `index`.
pub fn archive_entry_name(index: usize) -> String {
    format!("image{}.jpg", index + 1)
}

/// Fetch every selected original and pack them into one ZIP.
///
/// Entries are stored uncompressed: the payloads are already-compressed
/// image files. Under [`LoadPolicy::Tolerant`] failed images are skipped but
/// survivors keep the name of their input position.
#[tracing::instrument(skip_all, fields(count = images.len()))]
pub async fn export_archive<F: Fetcher>(
    fetcher: &F,
    images: &[ImageRef],
    options: &ArchiveOptions,
) -> Result<ArchiveBlob, ExportError> {
    let results: Vec<Result<Vec<u8>, LoadFailure>> = stream::iter(images.iter().enumerate())
        .map(|(index, image)| async move {
            fetcher
                .fetch(image)
                .await
                .map(|fetched| fetched.bytes)
                .map_err(|error: FetchError| LoadFailure {
                    index,
                    image: image.clone(),
                    error: LoadError::Fetch(error),
                })
        })
        .buffered(options.max_concurrent.max(1))
        .collect()
        .await;

    let mut fetched = Vec::new();
    let mut failures = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(bytes) => fetched.push((index, bytes)),
            Err(failure) => {
                tracing::warn!(index, error = %failure.error, "archive fetch failed");
                failures.push(failure);
            }
        }
    }
    if options.policy == LoadPolicy::FailFast && !failures.is_empty() {
        return Err(ExportError::ArchiveFetch(failures));
    }

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let entry_options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    let mut entries = Vec::with_capacity(fetched.len());
    for (index, bytes) in &fetched {
        let name = archive_entry_name(*index);
        writer.start_file(name.as_str(), entry_options)?;
        writer.write_all(bytes)?;
        entries.push(ArchiveEntry {
            index: *index,
            name,
            size: bytes.len(),
        });
    }
    let bytes = writer.finish()?.into_inner();

    Ok(ArchiveBlob {
        filename: options.filename.clone(),
        bytes,
        entries,
        skipped: failures,
    })
}
