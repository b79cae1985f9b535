use indicatif::ProgressBar;
use tracing::{debug, info, instrument};

use super::{ManifestContext, playlist::basename};
use crate::{error::JobError, fetch::Fetcher};

/// Downloads every segment into the segment directory, one after another
///
/// `playlist_url` is the URL of the playlist the references were read from. The
/// first failing segment aborts the remaining ones.
///
/// # Errors
/// Errors on the first segment that cannot be resolved or fetched
#[instrument(skip_all, fields(source = context.source_url(), segments = references.len()))]
pub async fn fetch_segments(
    fetcher: &Fetcher,
    context: &ManifestContext,
    playlist_url: &str,
    references: &[String],
    progress: &ProgressBar,
) -> Result<u64, JobError> {
    let segment_dir = context.segment_dir();
    let mut total_bytes = 0;

    for (i, reference) in references.iter().enumerate() {
        let segment_url = context.resolve(playlist_url, reference)?;
        let dest = segment_dir.join(basename(reference));

        progress.set_message(format!("segment {}/{}", i + 1, references.len()));
        total_bytes += fetcher.download_to(&segment_url, &dest, progress).await?;
        debug!("Done downloading {reference}!");
    }

    info!(
        "Done downloading all {} segments ({total_bytes} bytes)",
        references.len()
    );
    Ok(total_bytes)
}
