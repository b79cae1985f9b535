#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{Router, routing::get};
use hls_squirrel::{
    error::StorageError,
    fetch::{Fetcher, RetryPolicy},
    storage::{ArchiveStore, list_files},
};
use tokio::net::TcpListener;

/// HTTP server on a random localhost port, shut down on drop
pub struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn new(router: Router, hits: Arc<AtomicUsize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        tokio::spawn(async move {
            server.await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            base_url: format!("http://{addr}"),
            hits,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Serves each `(path, body)` pair as a static GET route; anything else is a 404
    pub async fn serving(files: &[(&'static str, &'static str)]) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();

        for &(path, body) in files {
            let hits = hits.clone();
            router = router.route(
                path,
                get(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                    async move { body }
                }),
            );
        }

        Self::new(router, hits).await
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Requests answered by a served route
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

pub fn fetcher() -> Fetcher {
    Fetcher::new(reqwest::Client::new(), RetryPolicy::default())
}

/// Records uploads instead of sending them anywhere
#[derive(Default)]
pub struct RecordingArchive {
    uploads: Mutex<Vec<(PathBuf, String, Vec<String>)>>,
}

impl RecordingArchive {
    /// `(local dir, key prefix, relative files)` per upload
    pub fn uploads(&self) -> Vec<(PathBuf, String, Vec<String>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveStore for RecordingArchive {
    async fn upload_dir(&self, local: &Path, key_prefix: &str) -> Result<usize, StorageError> {
        let files = list_files(local)?
            .into_iter()
            .map(|(_, relative)| relative)
            .collect::<Vec<_>>();
        let count = files.len();
        self.uploads
            .lock()
            .unwrap()
            .push((local.to_path_buf(), key_prefix.to_string(), files));
        Ok(count)
    }
}

/// Rejects every upload, like a bucket with invalid credentials
pub struct FailingArchive;

#[async_trait]
impl ArchiveStore for FailingArchive {
    async fn upload_dir(&self, _local: &Path, key_prefix: &str) -> Result<usize, StorageError> {
        Err(StorageError::Upload {
            bucket: "archive".to_string(),
            key: format!("{key_prefix}/master.m3u8"),
            message: "InvalidAccessKeyId".to_string(),
        })
    }
}
