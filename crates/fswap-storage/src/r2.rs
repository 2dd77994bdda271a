//! Cloudflare R2 backend over the S3 API.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::backend::{validate_key, StorageBackend};
use crate::error::{StorageError, StorageResult};

/// Configuration for the R2 backend.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// Cloudflare account id (forms the S3 endpoint)
    pub account_id: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Public domain serving the bucket
    pub public_domain: String,
}

impl R2Config {
    /// Create config from environment variables. Returns None when the
    /// backend is not configured at all.
    pub fn from_env() -> StorageResult<Option<Self>> {
        let account_id = match std::env::var("R2_ACCOUNT_ID") {
            Ok(v) if !v.is_empty() => v,
            _ => return Ok(None),
        };
        let access_key_id = std::env::var("R2_ACCESS_KEY_ID")
            .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?;
        let secret_access_key = std::env::var("R2_SECRET_ACCESS_KEY")
            .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?;
        let bucket_name = std::env::var("R2_BUCKET_NAME")
            .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?;
        let public_domain = std::env::var("R2_PUBLIC_DOMAIN")
            .unwrap_or_else(|_| format!("https://pub-{account_id}.r2.dev"));
        Ok(Some(Self {
            account_id,
            access_key_id,
            secret_access_key,
            bucket_name,
            public_domain,
        }))
    }
}

/// Cloudflare R2 storage backend.
#[derive(Clone)]
pub struct R2Backend {
    client: Client,
    bucket: String,
    public_domain: String,
}

impl R2Backend {
    /// Create a new R2 backend from configuration.
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(format!(
                "https://{}.r2.cloudflarestorage.com",
                config.account_id
            ))
            .region(Region::new("auto"))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            public_domain: config.public_domain.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StorageBackend for R2Backend {
    fn name(&self) -> &'static str {
        "r2"
    }

    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        validate_key(key)?;
        debug!("Uploading {} to r2:{}", path.display(), key);

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

        let url = format!("{}/{}", self.public_domain, key);
        info!("Uploaded {} to {}", path.display(), url);
        Ok(url)
    }
}
