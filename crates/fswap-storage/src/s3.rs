//! Generic S3 backend using the ambient AWS credential chain.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::backend::{validate_key, StorageBackend};
use crate::error::{StorageError, StorageResult};

/// Configuration for the S3 backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket name
    pub bucket_name: String,
    /// Region
    pub region: String,
    /// Optional CDN domain fronting the bucket
    pub cdn_domain: Option<String>,
}

impl S3Config {
    /// Create config from environment variables. Returns None when the
    /// backend is not configured.
    pub fn from_env() -> StorageResult<Option<Self>> {
        let bucket_name = match std::env::var("S3_BUCKET_NAME") {
            Ok(v) if !v.is_empty() => v,
            _ => return Ok(None),
        };
        let region = std::env::var("S3_REGION")
            .or_else(|_| std::env::var("AWS_REGION"))
            .map_err(|_| StorageError::config_error("S3_REGION or AWS_REGION not set"))?;
        let cdn_domain = std::env::var("S3_CDN_DOMAIN").ok().filter(|v| !v.is_empty());
        Ok(Some(Self {
            bucket_name,
            region,
            cdn_domain,
        }))
    }
}

/// Amazon S3 storage backend.
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    region: String,
    cdn_domain: Option<String>,
}

impl S3Backend {
    /// Create a backend using the default credential provider chain.
    pub async fn new(config: S3Config) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            client: Client::new(&sdk_config),
            bucket: config.bucket_name,
            region: config.region,
            cdn_domain: config
                .cdn_domain
                .map(|d| d.trim_end_matches('/').to_string()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        match &self.cdn_domain {
            Some(domain) => format!("{domain}/{key}"),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        validate_key(key)?;
        debug!("Uploading {} to s3:{}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        let url = self.public_url(key);
        info!("Uploaded {} to {}", path.display(), url);
        Ok(url)
    }
}
