use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use indicatif::ProgressBar;
use regex::Regex;
use serde::Serialize;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::{
    error::JobError,
    fetch::Fetcher,
    hls::{BaseResolution, DownloadedBundle, ManifestContext, download_bundle},
    storage::ArchiveStore,
};

pub static VALID_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?[\w-]+(?:\.[\w-]+)+[\w.,@?^=%&:/~+#-]*$").unwrap()
});

/// Cheap syntactic check done before any network I/O
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    VALID_URL_REGEX.is_match(url)
}

/// One input row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub id: String,
    pub title: String,
    pub source_url: String,
}

impl JobSpec {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source_url: source_url.into(),
        }
    }

    /// `<id>__<title>`, spaces and path separators replaced by `_`
    ///
    /// Always a single path component, so it cannot point outside the output root.
    /// Also used as the archive key prefix.
    #[must_use]
    pub fn directory_name(&self) -> String {
        format!("{}__{}", path_component(&self.id), path_component(&self.title))
    }
}

fn path_component(raw: &str) -> String {
    let cleaned = raw.replace([' ', '/', '\\', ':'], "_");
    let dots = cleaned.len() - cleaned.trim_start_matches('.').len();
    format!("{}{}", "_".repeat(dots), &cleaned[dots..])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
        })
    }
}

/// Outcome of one job. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    spec: JobSpec,
    status: JobStatus,
    error: Option<String>,
    storage_status: JobStatus,
}

impl JobResult {
    /// The bundle was downloaded completely; `storage_status` tells whether it was archived
    #[must_use]
    pub const fn downloaded(spec: JobSpec, storage_status: JobStatus) -> Self {
        Self {
            spec,
            status: JobStatus::Success,
            error: None,
            storage_status,
        }
    }

    #[must_use]
    pub fn failed(spec: JobSpec, error: &JobError) -> Self {
        let detail = match error {
            JobError::Validation(_) => error.to_string(),
            _ => format!("Error processing URL {}: {error}", spec.source_url),
        };
        Self::failed_with(spec, detail)
    }

    /// Failure that happened outside of the pipeline itself (unreadable row, crashed task, ...)
    #[must_use]
    pub const fn failed_with(spec: JobSpec, detail: String) -> Self {
        Self {
            spec,
            status: JobStatus::Failed,
            error: Some(detail),
            storage_status: JobStatus::Failed,
        }
    }

    #[must_use]
    pub const fn spec(&self) -> &JobSpec {
        &self.spec
    }

    #[must_use]
    pub const fn status(&self) -> JobStatus {
        self.status
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub const fn storage_status(&self) -> JobStatus {
        self.storage_status
    }
}

/// Runs the whole pipeline for one row: validate, download, archive, clean up
pub struct JobRunner {
    fetcher: Fetcher,
    archive: Arc<dyn ArchiveStore>,
    output_root: PathBuf,
    resolution: BaseResolution,
    keep_local: bool,
}

impl JobRunner {
    pub fn new(
        fetcher: Fetcher,
        archive: Arc<dyn ArchiveStore>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            archive,
            output_root: output_root.into(),
            resolution: BaseResolution::default(),
            keep_local: false,
        }
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: BaseResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Keep bundles on disk even after they were archived
    #[must_use]
    pub fn with_keep_local(mut self, keep_local: bool) -> Self {
        self.keep_local = keep_local;
        self
    }

    #[must_use]
    pub fn local_directory(&self, spec: &JobSpec) -> PathBuf {
        self.output_root.join(spec.directory_name())
    }

    /// Never fails: every outcome, including cancellation, ends up in the returned result
    ///
    /// The local directory is removed only after a successful upload; on any failure it is
    /// left in place for inspection.
    #[instrument(skip_all, fields(job = %spec.directory_name()))]
    pub async fn run(
        &self,
        spec: JobSpec,
        progress: &ProgressBar,
        ct: &CancellationToken,
    ) -> JobResult {
        if !is_valid_url(&spec.source_url) {
            warn!("Rejecting invalid URL: {}", spec.source_url);
            let error = JobError::Validation(spec.source_url.clone());
            return JobResult::failed(spec, &error);
        }

        let local_dir = self.local_directory(&spec);
        let downloaded = select! {
            biased;
            () = ct.cancelled() => Err(JobError::Cancelled),
            r = self.download(&spec, &local_dir, progress) => r,
        };

        let bundle = match downloaded {
            Ok(bundle) => bundle,
            Err(e) => {
                error!("Job failed, keeping {local_dir:?}: {e}");
                return JobResult::failed(spec, &e);
            }
        };
        info!(
            "Downloaded {} segments ({} bytes) from {}",
            bundle.segments.len(),
            bundle.segment_bytes,
            bundle.variant_url
        );

        progress.set_message("uploading");
        let storage_status = match self
            .archive
            .upload_dir(&local_dir, &spec.directory_name())
            .await
        {
            Ok(files) => {
                info!("Archived {files} files");
                if !self.keep_local {
                    remove_local(&local_dir).await;
                }
                JobStatus::Success
            }
            Err(e) => {
                warn!("Archive upload failed, keeping {local_dir:?}: {e}");
                JobStatus::Failed
            }
        };

        JobResult::downloaded(spec, storage_status)
    }

    async fn download(
        &self,
        spec: &JobSpec,
        local_dir: &Path,
        progress: &ProgressBar,
    ) -> Result<DownloadedBundle, JobError> {
        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|e| JobError::io(format!("Creating {}", local_dir.display()), e))?;

        let context =
            ManifestContext::new(&spec.source_url, local_dir).with_resolution(self.resolution);
        download_bundle(&self.fetcher, &context, progress).await
    }
}

async fn remove_local(local_dir: &Path) {
    info!("Cleaning up {local_dir:?}");
    if let Err(e) = tokio::fs::remove_dir_all(local_dir).await {
        warn!("Unable to remove {local_dir:?}: {e}");
    }
}
