use std::fmt;

/// Object storage settings, passed explicitly to [`crate::storage::S3Archive`]
#[derive(Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible storage (MinIO, R2, ...)
    pub endpoint: Option<String>,
    /// Falls back to the default AWS credential chain when unset
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

// Keeps the secret out of logs
impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl S3Config {
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    /// Reads `S3_BUCKET`, `AWS_REGION`, `S3_ENDPOINT`, `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY`
    ///
    /// Returns `None` when no bucket is configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`S3Config::from_env`] with a custom variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Some(Self {
            bucket: var("S3_BUCKET")?,
            region: var("AWS_REGION").unwrap_or_else(|| Self::DEFAULT_REGION.to_string()),
            endpoint: var("S3_ENDPOINT"),
            access_key_id: var("AWS_ACCESS_KEY_ID"),
            secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
        })
    }
}
