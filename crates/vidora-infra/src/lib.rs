//! Vidora Infrastructure Library
//!
//! Shared infrastructure for the ingestion services:
//! - Telemetry initialization (`tracing-subscriber`, text or JSON)
//! - Per-job-kind rate limiting

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "rate-limit")]
pub mod rate_limit;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

#[cfg(feature = "rate-limit")]
pub use rate_limit::RateLimiter;
