//! Request handlers.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use fswap_models::{ProcessOutcome, SwapRequest};
use fswap_worker::{failure_outcome, StatsSnapshot};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Run a swap request synchronously.
///
/// Admission goes through the governor; a saturated worker answers 503
/// rather than queueing the request behind an unbounded backlog.
pub async fn process(
    State(state): State<AppState>,
    Json(request): Json<SwapRequest>,
) -> ApiResult<Json<ProcessOutcome>> {
    let ctx = &state.ctx;
    let slot = ctx.governor.acquire(ctx.config.request_timeout).await?;

    let mut job = request.into_job()?;
    info!(job_id = %job.id, "Accepted synchronous request");

    let result = ctx.execute(&mut job).await;
    slot.release();

    match result {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => Err(ApiError::Processing(failure_outcome(&e, &job))),
    }
}

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub success_rate: f64,
    pub active_jobs: usize,
    pub concurrency_ceiling: usize,
}

/// Health check endpoint (liveness probe).
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.ctx.stats.snapshot();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        uptime_secs: snapshot.uptime_secs,
        success_rate: 1.0 - snapshot.error_rate,
        active_jobs: state.ctx.governor.active(),
        concurrency_ceiling: state.ctx.governor.ceiling(),
    })
}

/// Stats response: completion counters plus the live concurrency picture.
#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    pub active_jobs: usize,
    pub concurrency_ceiling: usize,
}

/// Processing statistics snapshot.
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        counters: state.ctx.stats.snapshot(),
        active_jobs: state.ctx.governor.active(),
        concurrency_ceiling: state.ctx.governor.ceiling(),
    })
}

/// Serve a locally persisted output artifact.
pub async fn get_output(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let name = sanitize_filename(&filename)?;
    let path = std::path::Path::new(&state.ctx.config.output_dir).join(name);

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::not_found(format!("no such output: {name}")))?;

    let content_type = content_type_for(name);
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// Reject anything that could escape the output directory.
fn sanitize_filename(filename: &str) -> ApiResult<&str> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return Err(ApiError::bad_request("invalid output filename"));
    }
    Ok(filename)
}

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_names_rejected() {
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("a/b.mp4").is_err());
        assert!(sanitize_filename("a\\b.mp4").is_err());
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("abc123.gif").is_ok());
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("x.mp4"), "video/mp4");
        assert_eq!(content_type_for("x.gif"), "image/gif");
        assert_eq!(content_type_for("x.webp"), "image/webp");
        assert_eq!(content_type_for("x.bin"), "application/octet-stream");
    }
}
