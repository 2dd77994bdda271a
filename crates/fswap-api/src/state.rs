//! Application state.

use std::sync::Arc;

use fswap_worker::{ProcessingContext, WorkerConfig};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub ctx: Arc<ProcessingContext>,
}

impl AppState {
    /// Create new application state.
    pub async fn new(config: ApiConfig) -> ApiResult<Self> {
        let worker_config = WorkerConfig::from_env();
        let ctx = ProcessingContext::new(worker_config)
            .await
            .map_err(|e| ApiError::internal(format!("processing context: {e}")))?;

        Ok(Self {
            config,
            ctx: Arc::new(ctx),
        })
    }
}
