#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{fs::File, io::BufReader, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use hls_squirrel::{
    batch::{ReportWriter, read_batch, run_batch},
    config::S3Config,
    fetch::{Fetcher, RetryPolicy},
    hls::BaseResolution,
    job::JobRunner,
    storage::{ArchiveStore, S3Archive, UnconfiguredArchive},
    util::{init_http_client, spawn_ct_watcher, warn_ulimit},
};
use indicatif::MultiProgress;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Downloads the HLS videos listed in a CSV file and archives them to S3
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// CSV file of `id,title,url` rows. The first row is a header
    #[arg(default_value = "temp.csv")]
    input: PathBuf,

    /// Where the per-row status report is written
    #[arg(short, long, default_value = "video_download_status.csv")]
    output: PathBuf,

    /// Directory where videos are downloaded
    #[arg(short = 'd', long, default_value = "video_files")]
    output_dir: PathBuf,

    /// The amount of videos processed in parallel
    #[arg(short, long, default_value_t = 50)]
    parallelism: usize,

    /// Download attempts per file
    #[arg(long, default_value_t = 1)]
    attempts: u32,

    /// Seconds a single download attempt may take [default: no limit]
    #[arg(long)]
    timeout: Option<u64>,

    /// What relative playlist references are resolved against
    #[arg(long, value_enum, default_value_t = BaseResolution::SourceDirectory)]
    resolve_relative_to: BaseResolution,

    /// Keep downloaded videos on disk after they were archived
    #[arg(long)]
    keep_local: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args = Args::parse();
    warn_ulimit(args.parallelism);

    let ct = CancellationToken::new();
    spawn_ct_watcher(ct.clone());

    let archive: Arc<dyn ArchiveStore> = if let Some(config) = S3Config::from_env() {
        info!("Archiving to s3://{} ({})", config.bucket, config.region);
        Arc::new(S3Archive::new(&config).await)
    } else {
        warn!("S3_BUCKET is not set. Videos will be kept locally and reported as not archived");
        Arc::new(UnconfiguredArchive)
    };

    if args.resolve_relative_to == BaseResolution::EnclosingPlaylist {
        warn!("Resolving relative references against their own playlist, not the source URL");
    }

    let policy = RetryPolicy::single_attempt()
        .with_attempts(args.attempts)
        .with_timeout(args.timeout.map(Duration::from_secs));
    let fetcher = Fetcher::new(init_http_client().context("Building HTTP client")?, policy);

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("Creating output directory {:?}", args.output_dir))?;

    let input = File::open(&args.input)
        .with_context(|| format!("Opening input file {:?}", args.input))?;
    let batch = read_batch(BufReader::new(input));
    info!(
        "Processing {} rows from {:?} with {} parallelism",
        batch.len(),
        args.input,
        args.parallelism
    );

    let output = File::create(&args.output)
        .with_context(|| format!("Creating report file {:?}", args.output))?;
    let mut report = ReportWriter::new(output).context("Writing report header")?;

    let runner = Arc::new(
        JobRunner::new(fetcher, archive, &args.output_dir)
            .with_resolution(args.resolve_relative_to)
            .with_keep_local(args.keep_local),
    );

    let summary = run_batch(
        runner,
        batch,
        args.parallelism,
        ct,
        &MultiProgress::new(),
        |result| report.write(&result).context("Writing report row"),
    )
    .await?;

    info!("Report written to {:?}", args.output);
    if summary.failed > 0 {
        warn!("{} of {} rows failed", summary.failed, summary.total);
    }

    info!("All done!");
    Ok(())
}
