use std::{collections::BTreeMap, sync::LazyLock};

use indicatif::ProgressBar;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::{
    ManifestContext,
    playlist::{PlaylistDocument, is_directive},
};
use crate::{
    error::{JobError, ManifestError},
    fetch::Fetcher,
};

pub const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";

// Anchored on the attribute separator so `AVERAGE-BANDWIDTH=` is not picked up
static BANDWIDTH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:,]BANDWIDTH=(\d+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub bandwidth: u64,
    pub reference: String,
}

/// Collects every `#EXT-X-STREAM-INF` declaration of a master playlist, keyed by bandwidth
///
/// The reference of a declaration is the line right after it. Declarations without a
/// bandwidth or without a reference line are skipped. On duplicate bandwidths the last
/// declaration wins.
#[must_use]
pub fn variants(master: &PlaylistDocument) -> BTreeMap<u64, String> {
    let lines = master.lines();
    let mut variants = BTreeMap::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.starts_with(STREAM_INF_TAG) {
            continue;
        }

        let Some(bandwidth) = BANDWIDTH_REGEX
            .captures(line)
            .and_then(|c| c[1].parse::<u64>().ok())
        else {
            debug!("Skipping stream declaration without bandwidth: {line}");
            continue;
        };

        let reference = lines.get(i + 1).map(|l| l.trim()).unwrap_or_default();
        if reference.is_empty() || is_directive(reference) {
            warn!("Stream declaration at line {} has no reference line", i + 1);
            continue;
        }

        variants.insert(bandwidth, reference.to_string());
    }

    variants
}

/// Picks the variant with the highest declared bandwidth
///
/// # Errors
/// [`ManifestError::NoVariant`] when the playlist declares no usable variant
pub fn best_variant(master: &PlaylistDocument) -> Result<Variant, ManifestError> {
    variants(master)
        .pop_last()
        .map(|(bandwidth, reference)| Variant {
            bandwidth,
            reference,
        })
        .ok_or(ManifestError::NoVariant)
}

/// Replaces the master playlist on disk with its best variant
///
/// Returns the URL the variant playlist was fetched from.
///
/// # Errors
/// Errors when the master declares no variant, or when the variant cannot be fetched
#[instrument(skip_all, fields(source = context.source_url()))]
pub async fn resolve_master(
    fetcher: &Fetcher,
    context: &ManifestContext,
    progress: &ProgressBar,
) -> Result<String, JobError> {
    let playlist_path = context.playlist_path();
    let master = PlaylistDocument::load(&playlist_path).await?;
    log_available_variants(&master);

    let variant = best_variant(&master)?;
    let variant_url = context.resolve(context.source_url(), &variant.reference)?;
    info!(
        "Selected variant {} ({} bps): {variant_url}",
        variant.reference, variant.bandwidth
    );

    progress.set_message(format!("variant {}", variant.reference));
    fetcher
        .download_to(&variant_url, &playlist_path, progress)
        .await?;

    Ok(variant_url)
}

fn log_available_variants(master: &PlaylistDocument) {
    match m3u8_rs::parse_master_playlist_res(master.to_text().as_bytes()) {
        Ok(playlist) => info!(
            "Available quality: {}",
            playlist
                .variants
                .iter()
                .map(|v| v
                    .resolution
                    .map_or("Unknown resolution".to_string(), |v| v.to_string()))
                .collect::<Vec<String>>()
                .join(", ")
        ),
        Err(e) => debug!("Master playlist is not strictly valid m3u8: {e}"),
    }
}
