//! Worker error types.

use thiserror::Error;

use crate::governor::ResourceError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Intake failed: {0}")]
    Intake(#[from] fswap_models::IntakeError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] fswap_models::MappingError),

    #[error("Media error: {0}")]
    Media(#[from] fswap_media::MediaError),

    #[error("Engine error: {0}")]
    Engine(#[from] fswap_engine::EngineError),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Queue error: {0}")]
    Queue(#[from] fswap_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] fswap_storage::StorageError),

    #[error("Job deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the job ends as `TimedOut` rather than `Failed`.
    pub fn is_timeout(&self) -> bool {
        match self {
            WorkerError::DeadlineExceeded => true,
            WorkerError::Engine(e) => e.is_timeout(),
            WorkerError::Media(fswap_media::MediaError::Timeout(_)) => true,
            WorkerError::Resource(ResourceError::TimedOut) => true,
            _ => false,
        }
    }

    /// Intake and mapping rejections are permanent; retrying the message
    /// cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WorkerError::Intake(_) | WorkerError::Mapping(_) | WorkerError::ConfigError(_)
        )
    }
}
