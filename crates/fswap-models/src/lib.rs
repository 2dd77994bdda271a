//! Shared data models for the face-swap backend.
//!
//! This crate defines the job descriptor and its lifecycle, the face-mapping
//! model for reference-mode swaps, the processor registry and the response
//! envelope shared by the worker and the API.

pub mod job;
pub mod mapping;
pub mod processor;
pub mod request;
pub mod resolution;
pub mod response;

pub use job::{Job, JobId, JobStatus, MediaType};
pub use request::{IntakeError, SwapRequest};
pub use mapping::{FaceMapping, FaceMappingEntry, MappingError, SelectorMode};
pub use processor::{resolve_processors, Processor, UnknownProcessor};
pub use resolution::{Resolution, ResolutionError};
pub use response::{ProcessOutcome, ResultUrls};
