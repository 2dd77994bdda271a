//! Error types for engine invocation.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from supervising the external engine process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine binary not found: {0}")]
    NotFound(String),

    #[error("Engine failed: {message}")]
    Failed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Engine timed out after {0} seconds")]
    Timeout(u64),

    #[error("Engine produced no output at {0}")]
    MissingOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// True when the job should be marked timed out rather than failed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout(_))
    }
}
