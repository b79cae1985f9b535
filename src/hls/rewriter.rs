use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use super::{
    ManifestContext, SEGMENT_DIR,
    playlist::{PlaylistDocument, basename, is_segment_reference},
};
use crate::error::{JobError, ManifestError};

/// Points every segment reference of `playlist` at `<subdir>/<basename>`
///
/// Directive and blank lines are kept verbatim and in place. Returns the rewritten
/// document along with the original references, in document order.
///
/// Rewriting an already rewritten playlist yields the same text, since only the
/// basename of each reference is carried over.
#[must_use]
pub fn rewrite_references(
    playlist: &PlaylistDocument,
    subdir: &str,
) -> (PlaylistDocument, Vec<String>) {
    let mut references = Vec::new();
    let lines = playlist
        .lines()
        .iter()
        .map(|line| {
            if !is_segment_reference(line) {
                return line.clone();
            }

            let reference = line.trim();
            references.push(reference.to_string());
            format!("{subdir}/{}", basename(reference))
        })
        .collect();

    (playlist.with_lines(lines), references)
}

/// Rewrites the local playlist in place and prepares the segment directory
///
/// # Errors
/// Errors on I/O failures, or with [`ManifestError::NoSegments`] when the playlist
/// lists no segment at all
#[instrument(skip_all, fields(source = context.source_url()))]
pub async fn rewrite_playlist(context: &ManifestContext) -> Result<Vec<String>, JobError> {
    let playlist_path = context.playlist_path();
    let playlist = PlaylistDocument::load(&playlist_path).await?;
    log_media_summary(&playlist);

    let (rewritten, references) = rewrite_references(&playlist, SEGMENT_DIR);
    for name in basename_collisions(&references) {
        warn!("Several segments share the file name {name}, only the last one will be kept");
    }
    rewritten.persist(&playlist_path).await?;

    let segment_dir = context.segment_dir();
    tokio::fs::create_dir_all(&segment_dir)
        .await
        .map_err(|e| JobError::io(format!("Creating {}", segment_dir.display()), e))?;

    if references.is_empty() {
        return Err(ManifestError::NoSegments.into());
    }

    Ok(references)
}

/// Basenames claimed by more than one reference, in order of first collision
#[must_use]
pub fn basename_collisions(references: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut collisions = Vec::new();
    for name in references.iter().map(|r| basename(r)) {
        if !seen.insert(name) && !collisions.contains(&name) {
            collisions.push(name);
        }
    }
    collisions
}

fn log_media_summary(playlist: &PlaylistDocument) {
    match m3u8_rs::parse_media_playlist_res(playlist.to_text().as_bytes()) {
        Ok(media) => info!(
            "Found {} segments ({:.1}s) to download!",
            media.segments.len(),
            media.segments.iter().map(|s| s.duration).sum::<f32>()
        ),
        Err(e) => debug!("Variant playlist is not strictly valid m3u8: {e}"),
    }
}
