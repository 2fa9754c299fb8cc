//! Vidora Worker
//!
//! Durable background execution for the ingestion pipeline: a Postgres-backed task
//! queue with bounded retries, per-task timeouts, dependency gating and a stale-task
//! reaper, plus the [`JobScheduler`] seam the lifecycle service enqueues through.

pub mod context;
pub mod queue;
pub mod retry;
pub mod scheduler;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use context::TaskHandlerContext;
pub use queue::{TaskQueue, TaskQueueConfig};
pub use retry::{compute_retry_backoff_seconds, decide, AttemptOutcome, Disposition};
pub use scheduler::{JobRequest, JobScheduler};
