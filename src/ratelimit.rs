//! Per-host token-bucket rate limiter. Buckets serialize only within a
//! host; there is no cross-host coordination.

use crate::config::RateLimitOptions;
use crate::errors::Error;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::timeout;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64, // tokens/sec
    last_refill: Instant,
    last_used: Instant,
}

impl Bucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        let now = Instant::now();
        Bucket {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: now,
            last_used: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Returns `Some(0)` if a token was available immediately, or
    /// `Some(wait)` with the duration until one token is free.
    fn try_take(&mut self) -> Duration {
        let now = Instant::now();
        self.refill(now);
        self.last_used = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Duration::ZERO
        } else {
            let deficit = 1.0 - self.tokens;
            Duration::from_secs_f64(deficit / self.refill_rate)
        }
    }
}

/// Per-host token-bucket pacing, shared across concurrent queries.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    opts: RateLimitOptions,
}

impl RateLimiter {
    pub fn new(opts: RateLimitOptions) -> Self {
        RateLimiter {
            buckets: Mutex::new(HashMap::new()),
            opts,
        }
    }

    /// Acquires a token for `host`, suspending
    /// until one is available or `deadline` elapses.
    pub async fn acquire(&self, host: &str, deadline: Duration) -> Result<(), Error> {
        if !self.opts.enabled {
            return Ok(());
        }

        let wait = {
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets.entry(host.to_string()).or_insert_with(|| {
                Bucket::new(self.opts.per_host_burst as f64, self.opts.per_host_rate)
            });
            bucket.try_take()
        };

        if wait.is_zero() {
            return Ok(());
        }

        if wait > deadline {
            return Err(Error::LocalRateLimited);
        }

        timeout(wait, tokio::time::sleep(wait))
            .await
            .map_err(|_| Error::LocalRateLimited)?;

        Ok(())
    }

    /// Drops buckets idle for longer than the configured GC interval
    /// (buckets are garbage-collected after a configurable idle
    /// interval").
    pub fn collect_idle(&self) {
        let now = Instant::now();
        let idle_interval = self.opts.idle_gc_interval;
        let mut buckets = self.buckets.lock().unwrap();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_used) < idle_interval);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_immediately_within_burst() {
        let rl = RateLimiter::new(RateLimitOptions {
            enabled: true,
            per_host_rate: 5.0,
            per_host_burst: 3,
            idle_gc_interval: Duration::from_secs(300),
        });

        for _ in 0..3 {
            rl.acquire("example.com", Duration::from_secs(1))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn acquire_waits_once_burst_exhausted() {
        let rl = RateLimiter::new(RateLimitOptions {
            enabled: true,
            per_host_rate: 100.0, // fast refill so the test doesn't sleep long
            per_host_burst: 1,
            idle_gc_interval: Duration::from_secs(300),
        });

        rl.acquire("example.com", Duration::from_secs(1))
            .await
            .unwrap();

        let start = Instant::now();
        rl.acquire("example.com", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn acquire_fails_past_deadline() {
        let rl = RateLimiter::new(RateLimitOptions {
            enabled: true,
            per_host_rate: 0.001,
            per_host_burst: 1,
            idle_gc_interval: Duration::from_secs(300),
        });
        rl.acquire("slow.test", Duration::from_millis(10))
            .await
            .unwrap();

        let err = rl
            .acquire("slow.test", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LocalRateLimited));
    }

    #[tokio::test]
    async fn disabled_limiter_never_waits() {
        let rl = RateLimiter::new(RateLimitOptions {
            enabled: false,
            per_host_rate: 0.0001,
            per_host_burst: 0,
            idle_gc_interval: Duration::from_secs(300),
        });
        rl.acquire("x", Duration::from_millis(1)).await.unwrap();
    }

    #[tokio::test]
    async fn hosts_are_independent() {
        let rl = RateLimiter::new(RateLimitOptions {
            enabled: true,
            per_host_rate: 5.0,
            per_host_burst: 1,
            idle_gc_interval: Duration::from_secs(300),
        });
        rl.acquire("a.test", Duration::from_secs(1)).await.unwrap();
        // b.test has its own bucket and should not be penalized by a.test.
        rl.acquire("b.test", Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn collect_idle_drops_stale_buckets() {
        let rl = RateLimiter::new(RateLimitOptions {
            enabled: true,
            per_host_rate: 5.0,
            per_host_burst: 5,
            idle_gc_interval: Duration::from_millis(1),
        });
        {
            let mut buckets = rl.buckets.lock().unwrap();
            buckets.insert("stale.test".into(), Bucket::new(5.0, 5.0));
        }
        std::thread::sleep(Duration::from_millis(5));
        rl.collect_idle();
        assert_eq!(rl.bucket_count(), 0);
    }
}
