use std::{cmp::min, path::Path, time::Duration};

use indicatif::ProgressBar;
use reqwest::Client;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_stream::StreamExt;
use tracing::{debug, instrument, warn};

use crate::error::TransportError;

/// How many times a download is attempted and how long each attempt may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. `0` is treated as `1`
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for one whole attempt (request and body). `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

impl RetryPolicy {
    /// One attempt, no timeout
    #[must_use]
    pub const fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Backoff to wait after the `failed_attempt`-th attempt (1-based) failed
    #[must_use]
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        if failed_attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2_u32.saturating_pow(failed_attempt - 1);
        min(self.base_delay.saturating_mul(factor), self.max_delay)
    }
}

/// Streams HTTP resources onto disk
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
}

impl Fetcher {
    #[must_use]
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Downloads `url` into `dest`, creating or truncating it
    ///
    /// The declared content length only feeds `progress`; the body is drained
    /// until the server closes the stream. Returns the amount of bytes written.
    ///
    /// # Errors
    /// Errors on connection failures, non-2xx responses, timeouts and write failures,
    /// after the retry policy gave up
    #[instrument(skip(self, dest, progress))]
    pub async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressBar,
    ) -> Result<u64, TransportError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match self.policy.timeout {
                Some(limit) => tokio::time::timeout(limit, self.attempt(url, dest, progress))
                    .await
                    .unwrap_or_else(|_| {
                        Err(TransportError::Timeout {
                            url: url.to_string(),
                        })
                    }),
                None => self.attempt(url, dest, progress).await,
            };

            match result {
                Ok(written) => return Ok(written),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!("Attempt {attempt}/{attempts} failed ({e}). Retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressBar,
    ) -> Result<u64, TransportError> {
        let request_error = |source| TransportError::Request {
            url: url.to_string(),
            source,
        };
        let write_error = |source| TransportError::Write {
            path: dest.display().to_string(),
            source,
        };

        let res = self.client.get(url).send().await.map_err(request_error)?;
        if !res.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: res.status().as_u16(),
            });
        }

        progress.set_length(res.content_length().unwrap_or(0));
        progress.set_position(0);

        let mut file = File::create(dest).await.map_err(write_error)?;
        let mut res_stream = res.bytes_stream();
        let mut written = 0_u64;

        while let Some(data) = res_stream.next().await {
            let data = data.map_err(request_error)?;
            file.write_all(&data).await.map_err(write_error)?;
            written += data.len() as u64;
            progress.inc(data.len() as u64);
        }
        file.flush().await.map_err(write_error)?;

        debug!("Done downloading {url} ({written} bytes)");
        Ok(written)
    }
}
