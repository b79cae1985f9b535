use thiserror::Error;

/// Why a single job pipeline stopped before its bundle was complete
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid URL: {0}")]
    Validation(String),
    #[error("Directory {0} is already used by another row")]
    DuplicateDirectory(String),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cancelled before completion")]
    Cancelled,
}

impl JobError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("No valid variant found in master playlist")]
    NoVariant,
    #[error("No segment files found in playlist")]
    NoSegments,
    #[error("Unable to resolve reference `{reference}` against `{base}`")]
    BadReference { base: String, reference: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Fetching {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Fetching {url}: HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Fetching {url}: timed out")]
    Timeout { url: String },
    #[error("Writing {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Connection failures, timeouts, 5xx, 408 and 429 may succeed on another attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { source, .. } => {
                source.is_connect() || source.is_timeout() || source.is_body()
            }
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Timeout { .. } => true,
            Self::Write { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object storage is not configured (set S3_BUCKET)")]
    NotConfigured,
    #[error("Listing {path}: {source}")]
    Walk {
        path: String,
        #[source]
        source: walkdir::Error,
    },
    #[error("Reading {path}: {message}")]
    Read { path: String, message: String },
    #[error("Uploading s3://{bucket}/{key}: {message}")]
    Upload {
        bucket: String,
        key: String,
        message: String,
    },
}
