//! Backend registry built from the environment.

use std::sync::Arc;

use tracing::info;

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::gcs::{GcsBackend, GcsConfig};
use crate::images::{CloudflareImagesBackend, CloudflareImagesConfig};
use crate::r2::{R2Backend, R2Config};
use crate::s3::{S3Backend, S3Config};

/// Which backends the environment enables.
#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    pub gcs: Option<GcsConfig>,
    pub r2: Option<R2Config>,
    pub images: Option<CloudflareImagesConfig>,
    pub s3: Option<S3Config>,
}

impl StorageSettings {
    /// Read every backend's configuration from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            gcs: GcsConfig::from_env()?,
            r2: R2Config::from_env()?,
            images: CloudflareImagesConfig::from_env()?,
            s3: S3Config::from_env()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.gcs.is_none() && self.r2.is_none() && self.images.is_none() && self.s3.is_none()
    }
}

/// Build the backend registry. At least one backend must be configured.
pub async fn configured_backends(
    settings: StorageSettings,
) -> StorageResult<Vec<Arc<dyn StorageBackend>>> {
    if settings.is_empty() {
        return Err(StorageError::config_error(
            "no storage backend configured; set GCS_BUCKET_NAME, R2_ACCOUNT_ID, \
             CF_IMAGES_ACCOUNT_ID or S3_BUCKET_NAME",
        ));
    }

    let mut backends: Vec<Arc<dyn StorageBackend>> = Vec::new();

    if let Some(config) = settings.gcs {
        backends.push(Arc::new(GcsBackend::new(config).await?));
    }
    if let Some(config) = settings.r2 {
        backends.push(Arc::new(R2Backend::new(config)));
    }
    if let Some(config) = settings.images {
        backends.push(Arc::new(CloudflareImagesBackend::new(config)));
    }
    if let Some(config) = settings.s3 {
        backends.push(Arc::new(S3Backend::new(config).await));
    }

    let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    info!("Storage backends configured: {}", names.join(", "));

    Ok(backends)
}
