//! Retry wrapper around the fetcher. The only place in the
//! pipeline where a failed attempt is tried again; the orchestrator treats
//! everything above this layer as terminal.

use crate::config::{BackoffStrategy, RetryOptions};
use crate::errors::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Computes the delay before attempt `n` (1-indexed, the attempt about to be
/// retried), honoring a server-advised `Retry-After` when present. When
/// `opts.jitter` is set, a random factor in `[0.5, 1.0]` is applied to the
/// computed backoff before the `max_delay` cap (spec §4.5: "jitter on/off
/// (default off for determinism in tests)"); a server-advised `Retry-After`
/// is never jittered, since it's a concrete instruction from the registry.
pub fn compute_delay(opts: &RetryOptions, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let computed = match opts.backoff {
        BackoffStrategy::Fixed => opts.initial_delay,
        BackoffStrategy::Linear => opts.initial_delay * attempt,
        BackoffStrategy::Exponential => {
            opts.initial_delay.saturating_mul(1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX))
        }
    };

    let jittered = if opts.jitter {
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_secs_f64(computed.as_secs_f64() * factor)
    } else {
        computed
    };

    let capped = jittered.min(opts.max_delay);

    match retry_after {
        Some(advised) => advised.max(capped),
        None => capped,
    }
}

/// Runs `op` up to `opts.max_attempts` times, sleeping between attempts per
/// [`compute_delay`]. `op` receives the 1-indexed attempt number. Stops
/// immediately on a non-retryable error; a
/// [`Error::RateLimited`] carries the server's advised delay through to the
/// next attempt.
pub async fn retry<F, Fut, T>(opts: &RetryOptions, mut op: F) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.retryable() || attempt >= opts.max_attempts {
                    return Err(err);
                }

                let retry_after = match &err {
                    Error::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };

                let delay = compute_delay(opts, attempt, retry_after);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Like [`retry`], but invokes `on_retry(attempt, delay)` before each sleep
/// so a caller (the orchestrator) can emit an observability event with the
/// delay it's about to honor, without duplicating the backoff/sleep logic
/// at the call site.
pub async fn retry_observed<F, Fut, T, O>(opts: &RetryOptions, mut op: F, mut on_retry: O) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
    O: FnMut(u32, Duration),
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.retryable() || attempt >= opts.max_attempts {
                    return Err(err);
                }

                let retry_after = match &err {
                    Error::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };

                let delay = compute_delay(opts, attempt, retry_after);
                on_retry(attempt, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn opts(backoff: BackoffStrategy) -> RetryOptions {
        RetryOptions {
            max_attempts: 4,
            backoff,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }

    #[test]
    fn exponential_backoff_is_strictly_monotonic_until_cap() {
        let o = opts(BackoffStrategy::Exponential);
        let d1 = compute_delay(&o, 1, None);
        let d2 = compute_delay(&o, 2, None);
        let d3 = compute_delay(&o, 3, None);
        assert!(d1 < d2);
        assert!(d2 < d3);
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(400));
    }

    #[test]
    fn exponential_backoff_caps_at_max_delay() {
        let o = RetryOptions {
            max_delay: Duration::from_millis(250),
            ..opts(BackoffStrategy::Exponential)
        };
        assert_eq!(compute_delay(&o, 5, None), Duration::from_millis(250));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let o = opts(BackoffStrategy::Linear);
        assert_eq!(compute_delay(&o, 1, None), Duration::from_millis(100));
        assert_eq!(compute_delay(&o, 2, None), Duration::from_millis(200));
        assert_eq!(compute_delay(&o, 3, None), Duration::from_millis(300));
    }

    #[test]
    fn fixed_backoff_never_changes() {
        let o = opts(BackoffStrategy::Fixed);
        assert_eq!(compute_delay(&o, 1, None), compute_delay(&o, 5, None));
    }

    #[test]
    fn jitter_perturbs_delay_within_bounds() {
        let o = RetryOptions {
            jitter: true,
            ..opts(BackoffStrategy::Fixed)
        };
        for _ in 0..50 {
            let delay = compute_delay(&o, 1, None);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn jitter_disabled_is_fully_deterministic() {
        let o = opts(BackoffStrategy::Fixed);
        assert_eq!(compute_delay(&o, 1, None), compute_delay(&o, 1, None));
    }

    #[test]
    fn retry_after_wins_when_larger_than_computed() {
        let o = opts(BackoffStrategy::Exponential);
        let delay = compute_delay(&o, 1, Some(Duration::from_secs(2)));
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn computed_delay_wins_when_larger_than_retry_after() {
        let o = opts(BackoffStrategy::Exponential);
        let delay = compute_delay(&o, 3, Some(Duration::from_millis(10)));
        assert_eq!(delay, Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retries_until_success_within_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let o = RetryOptions {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..opts(BackoffStrategy::Exponential)
        };

        let calls2 = calls.clone();
        let result = retry(&o, move |_attempt| {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::network("boom"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let o = opts(BackoffStrategy::Fixed);
        let calls2 = calls.clone();

        let result: Result<(), Error> = retry(&o, move |_attempt| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad input"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_max_attempts_then_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let o = RetryOptions {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..opts(BackoffStrategy::Fixed)
        };
        let calls2 = calls.clone();

        let result: Result<(), Error> = retry(&o, move |_attempt| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::network("still down"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn retry_observed_reports_each_delay_before_sleeping() {
        let calls = Arc::new(AtomicU32::new(0));
        let o = RetryOptions {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..opts(BackoffStrategy::Exponential)
        };
        let calls2 = calls.clone();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed2 = observed.clone();

        let result: Result<(), Error> = retry_observed(
            &o,
            move |_attempt| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::network("still down"))
                }
            },
            move |attempt, delay| observed2.lock().unwrap().push((attempt, delay)),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            *observed.lock().unwrap(),
            vec![
                (1, Duration::from_millis(1)),
                (2, Duration::from_millis(2)),
                (3, Duration::from_millis(4)),
            ]
        );
    }
}
