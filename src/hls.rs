//! HLS bundle download: fetch a master playlist, collapse it onto its best variant,
//! point segment references at a local directory and fetch every segment.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use indicatif::ProgressBar;
use reqwest::Url;
use tracing::{info, instrument};

use crate::{
    error::{JobError, ManifestError},
    fetch::Fetcher,
};

pub mod playlist;
pub mod resolver;
pub mod rewriter;
pub mod segments;

pub use playlist::PlaylistDocument;
pub use resolver::{Variant, best_variant, resolve_master, variants};
pub use rewriter::{rewrite_playlist, rewrite_references};
pub use segments::fetch_segments;

pub const PLAYLIST_FILE_NAME: &str = "master.m3u8";
pub const SEGMENT_DIR: &str = "ts_files";

/// How relative playlist references are turned into absolute URLs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BaseResolution {
    /// Against the directory of the source URL, for every playlist level
    #[default]
    #[value(name = "source")]
    SourceDirectory,
    /// Against the URL of the playlist containing the reference (RFC 8216)
    #[value(name = "playlist")]
    EnclosingPlaylist,
}

/// A manifest being downloaded into its own local directory
#[derive(Debug, Clone)]
pub struct ManifestContext {
    source_url: String,
    local_directory: PathBuf,
    resolution: BaseResolution,
}

impl ManifestContext {
    pub fn new(source_url: impl Into<String>, local_directory: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            local_directory: local_directory.into(),
            resolution: BaseResolution::default(),
        }
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: BaseResolution) -> Self {
        self.resolution = resolution;
        self
    }

    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    #[must_use]
    pub fn local_directory(&self) -> &Path {
        &self.local_directory
    }

    #[must_use]
    pub fn playlist_path(&self) -> PathBuf {
        self.local_directory.join(PLAYLIST_FILE_NAME)
    }

    #[must_use]
    pub fn segment_dir(&self) -> PathBuf {
        self.local_directory.join(SEGMENT_DIR)
    }

    /// Absolute URL of `reference`, found inside the playlist served at `playlist_url`
    ///
    /// With [`BaseResolution::SourceDirectory`] `playlist_url` is ignored and the
    /// reference is appended to the parent path of the source URL, even for
    /// references read from a variant playlist living elsewhere.
    ///
    /// # Errors
    /// Errors when `playlist_url` cannot serve as a base for `reference`
    pub fn resolve(&self, playlist_url: &str, reference: &str) -> Result<String, ManifestError> {
        match self.resolution {
            BaseResolution::SourceDirectory => {
                Ok(format!("{}/{reference}", parent_path(&self.source_url)))
            }
            BaseResolution::EnclosingPlaylist => Url::parse(playlist_url)
                .and_then(|base| base.join(reference))
                .map(String::from)
                .map_err(|_| ManifestError::BadReference {
                    base: playlist_url.to_string(),
                    reference: reference.to_string(),
                }),
        }
    }
}

/// Everything up to (not including) the last `/` of `url`
#[must_use]
pub fn parent_path(url: &str) -> &str {
    url.rsplit_once('/').map_or(url, |(parent, _)| parent)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedBundle {
    pub variant_url: String,
    pub segments: Vec<String>,
    pub segment_bytes: u64,
}

/// Runs fetch-master, resolve-variant, rewrite-references and fetch-segments in order
///
/// `context.local_directory()` must exist.
///
/// # Errors
/// Errors on the first failing stage
#[instrument(skip_all, fields(source = context.source_url()))]
pub async fn download_bundle(
    fetcher: &Fetcher,
    context: &ManifestContext,
    progress: &ProgressBar,
) -> Result<DownloadedBundle, JobError> {
    progress.set_message("master playlist");
    fetcher
        .download_to(context.source_url(), &context.playlist_path(), progress)
        .await?;

    let variant_url = resolve_master(fetcher, context, progress).await?;
    let segments = rewrite_playlist(context).await?;
    info!("Rewrote {} segment references", segments.len());

    let segment_bytes =
        fetch_segments(fetcher, context, &variant_url, &segments, progress).await?;

    Ok(DownloadedBundle {
        variant_url,
        segments,
        segment_bytes,
    })
}
