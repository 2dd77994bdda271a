//! Face-swap processing worker.
//!
//! The worker consumes swap requests from the queue (or takes them directly
//! from the API), admits them through the concurrency governor, fetches
//! media, resolves face mappings, supervises the engine, publishes results
//! and keeps the stats registry current.

pub mod config;
pub mod error;
pub mod executor;
pub mod governor;
pub mod pipeline;
pub mod publisher;
pub mod resolver;
pub mod retry;
pub mod stats;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use governor::{Governor, GovernorConfig, ResourceError, Slot};
pub use pipeline::{failure_outcome, ProcessingContext};
pub use stats::{StatsRegistry, StatsSnapshot};
