//! Supervision of the external face-swap engine process.
//!
//! Exactly one engine process runs per job. The invoker builds the fixed
//! argument set, enforces the per-job timeout with a forced kill, and
//! captures a stderr tail for diagnostics. There is no internal retry: a
//! failed engine call surfaces to the caller at most once.

pub mod error;
pub mod invoker;

pub use error::{EngineError, EngineResult};
pub use invoker::{EngineInvocation, EngineInvoker};
