//! Token-bucket rate limiter gating API paging calls.
//!
//! Advisory only: the SDK already retries throttled calls, this just keeps
//! a busy collection from hammering the paging APIs in the first place.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::constants::{RATE_LIMIT_BURST, RATE_LIMIT_FILL_PER_SEC};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket: `fill_per_sec` tokens accrue up to `burst`.
#[derive(Debug)]
pub struct RateLimiter {
    fill_per_sec: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Non-positive arguments fall back to the defaults.
    pub fn new(fill_per_sec: f64, burst: f64) -> Self {
        let fill_per_sec = if fill_per_sec > 0.0 {
            fill_per_sec
        } else {
            RATE_LIMIT_FILL_PER_SEC
        };
        let burst = if burst >= 1.0 { burst } else { RATE_LIMIT_BURST };
        RateLimiter {
            fill_per_sec,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until the bucket refills far enough.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = match self.bucket.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.fill_per_sec).min(self.burst);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.fill_per_sec)
            };
            sleep(wait).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new(RATE_LIMIT_FILL_PER_SEC, RATE_LIMIT_BURST)
    }
}
