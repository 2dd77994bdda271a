//! The common storage backend trait.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// A destination that can receive result artifacts and serve them publicly.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short identifier for logs and config ("gcs", "r2", "images", "s3").
    fn name(&self) -> &'static str;

    /// Upload a local file under `key` and return its public URL.
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String>;
}

/// Object keys are forward-slash relative paths. Reject traversal and
/// absolute keys before they reach a provider API.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') {
        return Err(StorageError::InvalidKey(format!(
            "absolute key not allowed: {key}"
        )));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("outputs/job1.mp4").is_ok());
        assert!(validate_key("a.gif").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("outputs/../secrets").is_err());
    }
}
