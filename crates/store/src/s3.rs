//! Media storage in an S3-compatible bucket.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use genbatch_core::hashing::content_name;
use genbatch_core::store::{MediaStore, StorageError};

use crate::fetch::HttpFetcher;

#[derive(Debug, Clone, PartialEq)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix, e.g. `generated/`.
    pub prefix: String,
    /// Base URL objects are publicly served from (bucket website, CDN).
    pub public_base_url: String,
    /// Custom endpoint for S3-compatible services.
    pub endpoint_url: Option<String>,
}

impl S3Config {
    fn key_for(&self, name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base_url.trim_end_matches('/'))
    }
}

pub struct S3MediaStore {
    client: aws_sdk_s3::Client,
    config: S3Config,
    fetcher: HttpFetcher,
}

impl S3MediaStore {
    /// Build a client from the standard AWS environment (credentials,
    /// region), with the optional custom endpoint applied.
    pub async fn from_env(config: S3Config) -> Result<Self, StorageError> {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            config,
            fetcher: HttpFetcher::new()?,
        })
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn store(&self, bytes: Vec<u8>, suggested_name: &str) -> Result<String, StorageError> {
        let name = content_name(&bytes, suggested_name);
        let key = self.config.key_for(&name);
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(content_type_for(&name))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload(format!("s3://{}/{key}: {e}", self.config.bucket)))?;

        tracing::info!(bucket = %self.config.bucket, key, bytes = size, "Uploaded object");
        Ok(self.config.url_for(&key))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.fetcher.fetch(url).await
    }
}

/// MIME type for a stored object name.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
