//! Observability sink: a push-style interface injected at
//! client construction, so the core never depends on a concrete logging
//! backend — mirroring how `rustdns` depends only on the `log` facade and
//! lets the binary choose a subscriber.

use std::time::Duration;

/// One event per suspension point / terminal outcome.
#[derive(Debug, Clone)]
pub enum Event {
    QueryStarted { query: String },
    QuerySucceeded { query: String, cached: bool },
    QueryFailed { query: String, error_code: &'static str },
    BootstrapFetched { registry: &'static str },
    RateLimited { host: String, retry_after: Option<Duration> },
    Retried { attempt: u32, delay: Duration },
}

/// Implemented by anything that wants to observe client activity. The
/// default [`LogSink`] forwards to the `log` facade; downstream binaries
/// may swap in a metrics collector instead.
pub trait Sink: Send + Sync {
    fn record(&self, event: Event);
}

/// Forwards every [`Event`] to `log::debug!`/`log::warn!`/`log::error!` at
/// a level appropriate to the outcome. This is the crate's only direct
/// dependency on a log backend — exactly as far as `rustdns` goes with
/// `log` before leaving subscriber choice to the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Sink for LogSink {
    fn record(&self, event: Event) {
        match event {
            Event::QueryStarted { query } => log::debug!("query started: {}", query),
            Event::QuerySucceeded { query, cached } => {
                log::debug!("query succeeded: {} (cached={})", query, cached)
            }
            Event::QueryFailed { query, error_code } => {
                log::warn!("query failed: {} ({})", query, error_code)
            }
            Event::BootstrapFetched { registry } => {
                log::debug!("bootstrap registry fetched: {}", registry)
            }
            Event::RateLimited { host, retry_after } => {
                log::warn!("rate limited by {}: retry_after={:?}", host, retry_after)
            }
            Event::Retried { attempt, delay } => {
                log::debug!("retrying attempt {} after {:?}", attempt, delay)
            }
        }
    }
}

/// Discards every event; useful in tests that don't want log output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl Sink for NullSink {
    fn record(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<&'static str>>);

    impl Sink for RecordingSink {
        fn record(&self, event: Event) {
            let tag = match event {
                Event::QueryStarted { .. } => "started",
                Event::QuerySucceeded { .. } => "succeeded",
                Event::QueryFailed { .. } => "failed",
                Event::BootstrapFetched { .. } => "bootstrap",
                Event::RateLimited { .. } => "rate_limited",
                Event::Retried { .. } => "retried",
            };
            self.0.lock().unwrap().push(tag);
        }
    }

    #[test]
    fn sink_receives_events_in_order() {
        let sink = RecordingSink::default();
        sink.record(Event::QueryStarted { query: "domain:example.com".into() });
        sink.record(Event::QuerySucceeded { query: "domain:example.com".into(), cached: false });
        assert_eq!(*sink.0.lock().unwrap(), vec!["started", "succeeded"]);
    }

    #[test]
    fn null_sink_accepts_everything() {
        let sink = NullSink;
        sink.record(Event::QueryFailed { query: "asn:1".into(), error_code: "NOT_FOUND" });
    }
}
