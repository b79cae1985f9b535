use reqwest::header::{HeaderMap, HeaderValue};
use rlimit::Resource;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Every active job keeps a socket and a file open, plus whatever the storage client holds
const FILES_PER_JOB: u64 = 4;

/// Warns when the open file limit is too low for `parallelism` concurrent jobs
pub fn warn_ulimit(parallelism: usize) {
    let Ok((limit, _)) = rlimit::getrlimit(Resource::NOFILE) else {
        return;
    };

    let wanted = (parallelism as u64).saturating_mul(FILES_PER_JOB).max(256);
    if limit < wanted {
        warn!(
            "Your file limit ({limit}) is low for {parallelism} parallel jobs and may introduce errors. Consider raising your file limit via `ulimit -n {}`",
            wanted.max(10240)
        );
    }
}

/// # Errors
/// Errors when the TLS backend cannot be initialized
pub fn init_http_client() -> reqwest::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    if let Ok(user_agent) = HeaderValue::from_str(&format!(
        "{}/{} (+{})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_REPOSITORY")
    )) {
        headers.insert("User-Agent", user_agent);
    }

    reqwest::Client::builder().default_headers(headers).build()
}

/// Spawn a task that watches for CTRL + C signal and cancels a [`CancellationToken`] when caught
pub fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Caught CTRL+C signal! Cancelling remaining jobs");
        ct.cancel();
    });
}
