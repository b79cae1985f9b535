use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::{config::S3Config, error::StorageError};

/// Remote destination for finished bundles
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Uploads every file below `local` to `<key_prefix>/<relative path>`
    ///
    /// Returns the amount of uploaded files.
    async fn upload_dir(&self, local: &Path, key_prefix: &str) -> Result<usize, StorageError>;
}

/// Archive used when no bucket is configured. Every upload fails, so bundles stay on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredArchive;

#[async_trait]
impl ArchiveStore for UnconfiguredArchive {
    async fn upload_dir(&self, _local: &Path, _key_prefix: &str) -> Result<usize, StorageError> {
        Err(StorageError::NotConfigured)
    }
}

#[derive(Debug, Clone)]
pub struct S3Archive {
    client: Client,
    bucket: String,
}

impl S3Archive {
    /// Builds an S3 client out of `config`
    ///
    /// Explicit keys take precedence over the default credential chain. A custom
    /// endpoint switches to path-style addressing.
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                env!("CARGO_PKG_NAME"),
            ));
        }

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ArchiveStore for S3Archive {
    #[instrument(skip(self, local), fields(bucket = %self.bucket))]
    async fn upload_dir(&self, local: &Path, key_prefix: &str) -> Result<usize, StorageError> {
        let files = list_files(local)?;

        for (path, relative) in &files {
            let key = format!("{key_prefix}/{relative}");
            let body = ByteStream::from_path(path)
                .await
                .map_err(|e| StorageError::Read {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(body)
                .send()
                .await
                .map_err(|e| StorageError::Upload {
                    bucket: self.bucket.clone(),
                    key: key.clone(),
                    message: DisplayErrorContext(&e).to_string(),
                })?;
            debug!("Uploaded s3://{}/{key}", self.bucket);
        }

        info!("Uploaded {} files under {key_prefix}/", files.len());
        Ok(files.len())
    }
}

/// Regular files below `root` with their `/`-separated path relative to it, sorted
///
/// # Errors
/// Errors when a directory entry cannot be read
pub fn list_files(root: &Path) -> Result<Vec<(PathBuf, String)>, StorageError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| StorageError::Walk {
            path: root.display().to_string(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path())
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        files.push((entry.into_path(), relative));
    }

    Ok(files)
}
