//! Token bucket guarding outbound provider calls.
//!
//! Excess requests queue up to a bounded backlog, then fail fast with
//! `rate_limited` rather than piling onto a struggling provider.

use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::RagError;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    backlog: Semaphore,
    enabled: bool,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64, max_backlog: usize) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            backlog: Semaphore::new(max_backlog),
            enabled: true,
        }
    }

    /// A bucket that admits everything; used when rate limiting is disabled.
    pub fn unlimited() -> Self {
        let mut bucket = Self::new(1, 1.0, 1);
        bucket.enabled = false;
        bucket
    }

    /// Take one token, waiting for refill if necessary. Fails fast once the
    /// backlog is full.
    pub async fn acquire(&self) -> Result<(), RagError> {
        if !self.enabled {
            return Ok(());
        }

        let _permit = self
            .backlog
            .try_acquire()
            .map_err(|_| RagError::RateLimited("provider backlog full".into()))?;

        loop {
            let wait = {
                let mut state = self.state.lock();
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                (1.0 - state.tokens) / self.refill_per_sec
            };
            tokio::time::sleep(std::time::Duration::from_secs_f64(wait)).await;
        }
    }
}
