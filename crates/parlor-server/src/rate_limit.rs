use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket refilled continuously at `refill_rate` tokens per second.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(max_tokens: f64, now: Instant) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: now,
        }
    }

    fn take(&mut self, now: Instant, max_tokens: f64, refill_rate: f64) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Inbound envelope limiter owned by a single connection's read loop.
#[derive(Debug)]
pub struct ConnectionRateLimiter {
    bucket: TokenBucket,
    max_tokens: f64,
    refill_rate: f64,
}

impl ConnectionRateLimiter {
    /// Burst equals one second's worth of the sustained rate, and never less
    /// than one envelope so fractional rates still admit traffic.
    pub fn per_second(rate: f64) -> Self {
        let max_tokens = rate.max(1.0);
        Self {
            bucket: TokenBucket::full(max_tokens, Instant::now()),
            max_tokens,
            refill_rate: rate,
        }
    }

    /// Returns true if the envelope is allowed; false if rate-limited.
    pub fn allow(&mut self) -> bool {
        self.bucket
            .take(Instant::now(), self.max_tokens, self.refill_rate)
    }
}

/// Per-IP token buckets, used to throttle authentication attempts.
pub struct IpRateLimiter {
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
    max_tokens: f64,
    refill_rate: f64,
}

impl IpRateLimiter {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns `true` if the attempt is allowed, `false` if rate-limited.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::full(self.max_tokens, now))
            .take(now, self.max_tokens, self.refill_rate)
    }

    /// Drop buckets untouched for at least `max_age`.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < max_age);
        before - buckets.len()
    }

    pub async fn tracked(&self) -> usize {
        self.buckets.lock().await.len()
    }
}
