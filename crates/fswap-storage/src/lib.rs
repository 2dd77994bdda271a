//! Result storage behind a common backend trait.
//!
//! Four providers are supported: Google Cloud Storage, Cloudflare R2,
//! Cloudflare Images and generic S3. Each upload returns a public URL.
//! The registry is built from environment variables; at least one backend
//! must be configured.

pub mod backend;
pub mod config;
pub mod error;
pub mod gcs;
pub mod images;
pub mod r2;
pub mod s3;

pub use backend::StorageBackend;
pub use config::{configured_backends, StorageSettings};
pub use error::{StorageError, StorageResult};
pub use gcs::GcsBackend;
pub use images::CloudflareImagesBackend;
pub use r2::R2Backend;
pub use s3::S3Backend;
