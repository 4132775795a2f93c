//! Per-client token bucket rate limiting at the webhook boundary (C9).
//!
//! Loose best-effort: state lives in a process-local map, not the shared
//! store. An in-memory implementation is an explicitly acceptable tradeoff
//! here — precise cross-instance limiting isn't worth the extra round trip
//! on every delivery.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
  pub allowed: bool,
  pub limit: u32,
  pub remaining: u32,
  pub reset_after_secs: u64,
}

struct Bucket {
  tokens: f64,
  last_refill: Instant,
}

/// Keyed by client identifier (IP or forwarded-for) step 1.
pub struct RateLimiter {
  per_second: f64,
  burst: f64,
  buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
  pub fn new(per_second: f64, burst: f64) -> Self {
    Self {
      per_second,
      burst,
      buckets: Mutex::new(HashMap::new()),
    }
  }

  pub async fn check(&self, client_key: &str) -> RateLimitDecision {
    let mut buckets = self.buckets.lock().await;
    let now = Instant::now();
    let bucket = buckets.entry(client_key.to_string()).or_insert_with(|| Bucket {
      tokens: self.burst,
      last_refill: now,
    });

    let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
    bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
    bucket.last_refill = now;

    let limit = self.burst as u32;
    let allowed = bucket.tokens >= 1.0;
    if allowed {
      bucket.tokens -= 1.0;
    }
    let remaining = bucket.tokens.max(0.0).floor() as u32;
    let reset_after_secs = if self.per_second > 0.0 {
      ((self.burst - bucket.tokens) / self.per_second).ceil().max(0.0) as u64
    } else {
      0
    };

    RateLimitDecision {
      allowed,
      limit,
      remaining,
      reset_after_secs,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn allows_up_to_burst_then_limits() {
    let limiter = RateLimiter::new(1.0, 3.0);
    for _ in 0..3 {
      assert!(limiter.check("1.2.3.4").await.allowed);
    }
    assert!(!limiter.check("1.2.3.4").await.allowed);
  }

  #[tokio::test]
  async fn distinct_clients_have_independent_buckets() {
    let limiter = RateLimiter::new(1.0, 1.0);
    assert!(limiter.check("a").await.allowed);
    assert!(limiter.check("b").await.allowed);
    assert!(!limiter.check("a").await.allowed);
  }
}
