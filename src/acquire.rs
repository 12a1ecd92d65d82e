#![forbid(unsafe_code)]

//! Acquisition gateway: runs an extractor for a source URL, finds the file it
//! produced and turns its metadata into a [`VideoRecord`].
//!
//! Failures come back as an [`AcquisitionFailure`] whose kind is picked by
//! matching the extractor's raw error text against [`FAILURE_PHRASES`].

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::library::{UNKNOWN_TITLE, VideoRecord, bytes_to_mb};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionErrorKind {
    AuthenticationRequired,
    FormatUnavailable,
    PremiumRequired,
    PrivateContent,
    ContentUnavailable,
    MissingExternalTool,
    Unclassified,
}

impl AcquisitionErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "authentication_required",
            Self::FormatUnavailable => "format_unavailable",
            Self::PremiumRequired => "premium_required",
            Self::PrivateContent => "private_content",
            Self::ContentUnavailable => "content_unavailable",
            Self::MissingExternalTool => "missing_external_tool",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for AcquisitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known phrases in extractor output, checked in order. First match wins.
pub const FAILURE_PHRASES: &[(&str, AcquisitionErrorKind)] = &[
    ("ffmpeg is not installed", AcquisitionErrorKind::MissingExternalTool),
    ("is not installed or not in PATH", AcquisitionErrorKind::MissingExternalTool),
    ("Requested format is not available", AcquisitionErrorKind::FormatUnavailable),
    ("Sign in to confirm you're not a bot", AcquisitionErrorKind::AuthenticationRequired),
    ("This video is available for Premium users only", AcquisitionErrorKind::PremiumRequired),
    ("This video is only available for Premium users", AcquisitionErrorKind::PremiumRequired),
    ("Private video", AcquisitionErrorKind::PrivateContent),
    ("Video unavailable", AcquisitionErrorKind::ContentUnavailable),
];

pub fn classify_failure(text: &str) -> AcquisitionErrorKind {
    FAILURE_PHRASES
        .iter()
        .find(|(phrase, _)| text.contains(phrase))
        .map(|(_, kind)| *kind)
        .unwrap_or(AcquisitionErrorKind::Unclassified)
}

/// A failed acquisition. `detail` keeps the raw text for diagnostics.
#[derive(Debug, Clone, Error)]
#[error("acquisition failed ({kind}): {detail}")]
pub struct AcquisitionFailure {
    pub kind: AcquisitionErrorKind,
    pub detail: String,
}

impl AcquisitionFailure {
    pub fn from_output(text: impl Into<String>) -> Self {
        let detail = text.into();
        Self {
            kind: classify_failure(&detail),
            detail,
        }
    }

    fn unclassified(detail: impl Into<String>) -> Self {
        Self {
            kind: AcquisitionErrorKind::Unclassified,
            detail: detail.into(),
        }
    }

    /// Text suitable for showing to the person who submitted the URL.
    pub fn user_message(&self) -> String {
        match self.kind {
            AcquisitionErrorKind::MissingExternalTool if self.detail.contains("ffmpeg") => {
                "Download failed: FFmpeg is not installed. Please install FFmpeg or use a different format.".to_string()
            }
            AcquisitionErrorKind::FormatUnavailable => {
                "Could not find the requested video format. The video might be restricted or unavailable.".to_string()
            }
            AcquisitionErrorKind::AuthenticationRequired => {
                "YouTube requires authentication. Your cookies may be invalid or expired. Please update your youtube_cookies.txt file.".to_string()
            }
            AcquisitionErrorKind::PremiumRequired => {
                "This video requires a YouTube Premium subscription.".to_string()
            }
            AcquisitionErrorKind::PrivateContent => {
                "This video is private and cannot be accessed.".to_string()
            }
            AcquisitionErrorKind::ContentUnavailable => {
                "This video is unavailable. It may have been removed or set to private.".to_string()
            }
            AcquisitionErrorKind::MissingExternalTool | AcquisitionErrorKind::Unclassified => {
                format!("Download failed: {}", self.detail)
            }
        }
    }
}

/// Where and under which name the extractor must write its output.
#[derive(Debug, Clone)]
pub struct ExtractionRequest<'a> {
    pub source_url: &'a str,
    pub output_dir: &'a Path,
    /// Unique token every produced file name must start with.
    pub file_stem: &'a str,
}

impl ExtractionRequest<'_> {
    /// yt-dlp style template, e.g. `/data/downloads/<id>.%(ext)s`.
    pub fn output_template(&self) -> PathBuf {
        self.output_dir.join(format!("{}.%(ext)s", self.file_stem))
    }
}

/// Metadata reported by an extractor after a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub duration_seconds: Option<u64>,
    pub thumbnail_url: Option<String>,
}

/// Raw failure text from an extractor.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ExtractorFailure(pub String);

/// The external tool that fetches media. Implementations block until done.
pub trait Extractor: Send + Sync {
    fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<ExtractedMetadata, ExtractorFailure>;
}

#[derive(Clone)]
pub struct Gateway {
    extractor: Arc<dyn Extractor>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self { extractor }
    }

    /// Runs the extractor once for `source_url`. Never retries.
    pub fn acquire(
        &self,
        source_url: &str,
        storage_dir: &Path,
    ) -> Result<VideoRecord, AcquisitionFailure> {
        let id = Uuid::new_v4().to_string();
        let request = ExtractionRequest {
            source_url,
            output_dir: storage_dir,
            file_stem: &id,
        };

        info!(%source_url, %id, "starting download");
        let metadata = self.extractor.extract(&request).map_err(|err| {
            let failure = AcquisitionFailure::from_output(err.0);
            error!(kind = %failure.kind, "download error: {}", failure.detail);
            failure
        })?;

        let produced = find_produced_file(storage_dir, &id).ok_or_else(|| {
            error!(%id, "extractor reported success but produced no file");
            AcquisitionFailure::unclassified("File was not downloaded correctly")
        })?;
        let size_bytes = fs::metadata(&produced)
            .map(|meta| meta.len())
            .map_err(|err| {
                AcquisitionFailure::unclassified(format!(
                    "reading {}: {err}",
                    produced.display()
                ))
            })?;
        let filename = produced
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .ok_or_else(|| AcquisitionFailure::unclassified("produced file has no usable name"))?;

        let title = metadata
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
        info!(%id, %title, %filename, "download completed");

        Ok(VideoRecord {
            id,
            title,
            filename,
            duration_seconds: metadata.duration_seconds.unwrap_or(0),
            thumbnail_url: metadata.thumbnail_url.unwrap_or_default(),
            source_url: source_url.to_string(),
            file_size_mb: bytes_to_mb(size_bytes),
        })
    }
}

/// First regular file (by name) in `dir` matching `<stem>.*`.
fn find_produced_file(dir: &Path, stem: &str) -> Option<PathBuf> {
    let prefix = format!("{stem}.");
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    matches.into_iter().next()
}
