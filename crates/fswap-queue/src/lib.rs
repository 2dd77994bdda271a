//! Redis Streams job queue.
//!
//! Jobs enter as `SwapRequest` payloads under a consumer group. Consumers
//! ack on completion; failures are retried up to a bounded count and then
//! parked on a dead-letter stream with the error attached.

pub mod error;
pub mod message;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use message::QueuedRequest;
pub use queue::{JobQueue, QueueConfig};
