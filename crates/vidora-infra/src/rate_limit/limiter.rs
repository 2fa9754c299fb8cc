use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use vidora_core::models::TaskType;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(((1.0 - self.tokens) / self.refill_rate).max(0.0))
        }
    }
}

/// Token-bucket limiter shared by every worker slot of a queue.
///
/// Each task type gets its own bucket with a burst capacity of twice its rate. A rate of
/// zero or less disables limiting for that group.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<TaskType, TokenBucket>>>,
    promotion_rate: f64,
    tool_rate: f64,
}

impl RateLimiter {
    pub fn new(promotion_rate: f64, tool_rate: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            promotion_rate,
            tool_rate,
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(0.0, 0.0)
    }

    fn rate_for(&self, task_type: TaskType) -> f64 {
        if task_type.invokes_tools() {
            self.tool_rate
        } else {
            self.promotion_rate
        }
    }

    /// Acquire a token for `task_type`, sleeping until one is available.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, task_type: TaskType) {
        let rate = self.rate_for(task_type);
        if rate <= 0.0 {
            return;
        }

        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(task_type)
                    .or_insert_with(|| TokenBucket::new(rate * 2.0, rate));
                if bucket.try_acquire() {
                    tracing::trace!(
                        task_type = %task_type,
                        tokens_remaining = bucket.tokens,
                        "Rate limit token acquired"
                    );
                    return;
                }
                bucket.time_until_next_token()
            };

            tracing::debug!(
                task_type = %task_type,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting for token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant of [`acquire`](Self::acquire).
    pub async fn try_acquire(&self, task_type: TaskType) -> bool {
        let rate = self.rate_for(task_type);
        if rate <= 0.0 {
            return true;
        }
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(task_type)
            .or_insert_with(|| TokenBucket::new(rate * 2.0, rate))
            .try_acquire()
    }
}
