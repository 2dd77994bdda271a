//! Axum HTTP API server.
//!
//! Exposes synchronous face-swap processing (`POST /process`), health and
//! stats snapshots, locally persisted outputs and optional Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
