use std::{
    collections::{HashMap, HashSet},
    io::{Read, Write},
    sync::Arc,
};

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::{select, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::JobError,
    job::{JobResult, JobRunner, JobSpec, JobStatus},
};

/// Rows of an input file, split into runnable jobs and rows rejected up front
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Batch {
    pub jobs: Vec<JobSpec>,
    pub rejected: Vec<JobResult>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len() + self.rejected.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads `id,title,url` rows, skipping the header row
///
/// Extra columns are ignored and missing ones read as empty, which later fails URL
/// validation. Rows that cannot be decoded, or that would share a directory with an
/// earlier row, are rejected.
pub fn read_batch(reader: impl Read) -> Batch {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut batch = Batch::default();
    let mut directories = HashSet::new();

    for record in csv_reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map_or(0, csv::Position::line);
                warn!("Skipping unreadable row at line {line}: {e}");
                batch.rejected.push(JobResult::failed_with(
                    JobSpec::new("", "", ""),
                    format!("Unreadable row at line {line}: {e}"),
                ));
                continue;
            }
        };

        let field = |i| record.get(i).unwrap_or_default().trim();
        let spec = JobSpec::new(field(0), field(1), field(2));

        let directory = spec.directory_name();
        if directories.insert(directory.clone()) {
            batch.jobs.push(spec);
        } else {
            warn!("Rejecting row {}: directory {directory} is taken", spec.id);
            batch.rejected.push(JobResult::failed(
                spec,
                &JobError::DuplicateDirectory(directory),
            ));
        }
    }

    batch
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub archived: usize,
}

impl BatchSummary {
    fn record(&mut self, result: &JobResult) {
        self.total += 1;
        match result.status() {
            JobStatus::Success => self.downloaded += 1,
            JobStatus::Failed => self.failed += 1,
        }
        if result.storage_status() == JobStatus::Success {
            self.archived += 1;
        }
    }
}

/// Runs every job of `batch`, at most `parallelism` at a time
///
/// `on_result` is called once per row, in completion order. Rejected rows come first.
/// A job that panics is reported as failed; it never takes its siblings down.
///
/// # Errors
/// Only errors returned by `on_result` stop the batch
pub async fn run_batch(
    runner: Arc<JobRunner>,
    batch: Batch,
    parallelism: usize,
    ct: CancellationToken,
    multi: &MultiProgress,
    mut on_result: impl FnMut(JobResult) -> Result<()>,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();
    let overall = multi.add(ProgressBar::new(batch.len() as u64));
    overall.set_style(style(
        "[{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} jobs",
    ));

    for result in batch.rejected {
        summary.record(&result);
        overall.inc(1);
        on_result(result)?;
    }

    let permits = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut tasks = JoinSet::new();
    let mut specs_by_task = HashMap::new();

    // Start queueing jobs
    for spec in batch.jobs {
        let runner = runner.clone();
        let permits = permits.clone();
        let ct = ct.clone();
        let multi = multi.clone();
        let task_spec = spec.clone();

        let handle = tasks.spawn(async move {
            let _permit = select! {
                biased;
                () = ct.cancelled() => return JobResult::failed(task_spec, &JobError::Cancelled),
                p = permits.acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => return JobResult::failed(task_spec, &JobError::Cancelled),
                },
            };

            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(style(
                "{prefix:.bold} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes}",
            ));
            bar.set_prefix(task_spec.directory_name());

            let result = runner.run(task_spec, &bar, &ct).await;
            bar.finish_and_clear();
            multi.remove(&bar);
            result
        });
        specs_by_task.insert(handle.id(), spec);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        let result = match joined {
            Ok((id, result)) => {
                specs_by_task.remove(&id);
                result
            }
            Err(e) => {
                error!("Job task crashed: {e}");
                let spec = specs_by_task
                    .remove(&e.id())
                    .unwrap_or_else(|| JobSpec::new("", "", ""));
                JobResult::failed_with(spec, format!("Job crashed: {e}"))
            }
        };

        summary.record(&result);
        overall.inc(1);
        on_result(result).context("Recording job result")?;
    }

    overall.finish_and_clear();
    info!(
        "Processed {} rows: {} downloaded, {} archived, {} failed",
        summary.total, summary.downloaded, summary.archived, summary.failed
    );

    Ok(summary)
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

pub const REPORT_HEADER: [&str; 6] = [
    "id",
    "title",
    "real_live_url",
    "status",
    "error",
    "uploaded_to_S3",
];

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    id: &'a str,
    title: &'a str,
    real_live_url: &'a str,
    status: JobStatus,
    error: &'a str,
    uploaded_to_s3: JobStatus,
}

/// CSV report with one row per job, flushed as soon as each row is written
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    /// Writes the header row right away
    ///
    /// # Errors
    /// Errors when the header cannot be written
    pub fn new(inner: W) -> csv::Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(REPORT_HEADER)?;
        writer.flush()?;

        Ok(Self { writer })
    }

    /// # Errors
    /// Errors when the row cannot be written or flushed
    pub fn write(&mut self, result: &JobResult) -> csv::Result<()> {
        let spec = result.spec();
        self.writer.serialize(ReportRow {
            id: &spec.id,
            title: &spec.title,
            real_live_url: &spec.source_url,
            status: result.status(),
            error: result.error().unwrap_or_default(),
            uploaded_to_s3: result.storage_status(),
        })?;
        self.writer.flush()?;
        Ok(())
    }

    /// # Errors
    /// Errors when buffered data cannot be flushed
    pub fn into_inner(self) -> std::io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}
