//! Rate limiting
//!
//! Token buckets keyed by task type. Promotion jobs and tool-invoking jobs refill at
//! separate rates.

pub use limiter::RateLimiter;

mod limiter;
