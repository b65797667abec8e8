//! The public client and query orchestrator (spec §4.10): the single
//! internal template every query type runs through — validate, check
//! cache, discover via bootstrap, fetch (with retry), normalize, cache,
//! redact — parameterized per query type only by its validator, bootstrap
//! lookup, and URL suffix.

use crate::bootstrap::BootstrapResolver;
use crate::cache::{Cache, CacheStats, MemoryCache, NoopCache};
use crate::config::{CacheStrategy, Options};
use crate::errors::Error;
use crate::fetcher::Fetcher;
use crate::normalize::{normalize, NormalizeInput};
use crate::observability::{Event, LogSink, Sink};
use crate::ratelimit::RateLimiter;
use crate::redact;
use crate::retry;
use crate::types::{NormalizedResponse, ObjectClass, Query, RDAPEntity};
use crate::validators;

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Notify;
use url::Url;

/// A cooperative cancellation signal threaded through a single query (spec
/// §5). Cheap to clone; cancelling any clone cancels every holder.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<(Notify, AtomicBool)>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0 .1.store(true, Ordering::SeqCst);
        self.0 .0.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0 .1.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.0 .0.notified().await;
    }
}

/// `{cache, bootstrap}` snapshot returned by [`Client::get_stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub cache: CacheStats,
    pub bootstrap_fetches: u64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Negative {
    NotFound,
    NoServerFound,
}

impl Negative {
    fn into_error(self, query: &Query) -> Error {
        match self {
            Negative::NotFound => Error::NotFound,
            Negative::NoServerFound => Error::NoServerFound {
                message: format!("no server found for {:?} (cached negative result)", query),
            },
        }
    }
}

struct NegativeCache {
    entries: Mutex<HashMap<String, (Negative, SystemTime, Duration)>>,
}

impl NegativeCache {
    fn new() -> Self {
        NegativeCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<Negative> {
        let mut entries = self.entries.lock().unwrap();
        let (kind, inserted_at, ttl) = *entries.get(key)?;
        if SystemTime::now().duration_since(inserted_at).unwrap_or_default() >= ttl {
            entries.remove(key);
            return None;
        }
        Some(kind)
    }

    fn set(&self, key: String, kind: Negative, ttl: Duration) {
        self.entries.lock().unwrap().insert(key, (kind, SystemTime::now(), ttl));
    }

    fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

type PendingFuture = Shared<BoxFuture<'static, Result<NormalizedResponse, Error>>>;

/// An RDAP client: owns its cache, connection pool, rate limiter, and
/// bootstrap registries. Cheap to clone (every field is `Arc`-backed);
/// clones share the same cache, pools, and in-flight query coalescing.
/// There is no process-wide singleton — construct one per configuration.
#[derive(Clone)]
pub struct Client {
    opts: Arc<Options>,
    cache: Arc<dyn Cache>,
    neg_cache: Arc<NegativeCache>,
    bootstrap: Arc<BootstrapResolver>,
    rate_limiter: Arc<RateLimiter>,
    fetcher: Arc<Fetcher>,
    sink: Arc<dyn Sink>,
    pending: Arc<Mutex<HashMap<String, PendingFuture>>>,
}

impl Client {
    pub fn new(opts: Options) -> Self {
        Self::with_sink(opts, Arc::new(LogSink))
    }

    pub fn with_sink(opts: Options, sink: Arc<dyn Sink>) -> Self {
        let opts = Arc::new(opts.normalize());

        let cache: Arc<dyn Cache> = match opts.cache.strategy {
            CacheStrategy::Memory => Arc::new(MemoryCache::new(true, opts.cache.ttl, opts.cache.max_size)),
            CacheStrategy::None => Arc::new(NoopCache),
        };

        let rate_limiter = Arc::new(RateLimiter::new(opts.rate_limit.clone()));
        let fetcher = Arc::new(Fetcher::with_sink(opts.clone(), rate_limiter.clone(), sink.clone()));
        let bootstrap = Arc::new(BootstrapResolver::new(
            opts.bootstrap_url.clone(),
            Duration::from_secs(24 * 3600),
        ));

        let client = Client {
            opts,
            cache,
            neg_cache: Arc::new(NegativeCache::new()),
            bootstrap,
            rate_limiter,
            fetcher,
            sink,
            pending: Arc::new(Mutex::new(HashMap::new())),
        };
        client.spawn_idle_bucket_gc();
        client
    }

    /// Sweeps idle rate-limit buckets on the configured interval for as long
    /// as any clone of this client is alive (spec §4.3: buckets are
    /// garbage-collected after a configurable idle interval). A no-op when
    /// constructed outside a tokio runtime (e.g. plain `#[test]` functions
    /// exercising the builder); a real process always constructs `Client`
    /// from within one.
    fn spawn_idle_bucket_gc(&self) {
        let rate_limiter = Arc::downgrade(&self.rate_limiter);
        let interval = self.opts.rate_limit.idle_gc_interval;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    match rate_limiter.upgrade() {
                        Some(rate_limiter) => rate_limiter.collect_idle(),
                        None => break,
                    }
                }
            });
        }
    }

    /// Looks up a domain name, canonicalizing it first (spec §6: `domain(name)`).
    pub async fn domain(&self, name: &str) -> Result<NormalizedResponse, Error> {
        self.domain_cancellable(name, &CancellationToken::new()).await
    }

    pub async fn domain_cancellable(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> Result<NormalizedResponse, Error> {
        let canonical = validators::validate_domain(name)?;
        let query = Query::Domain(canonical.clone());
        self.run(query, token, |client, deadline| {
            let tld_domain = canonical.clone();
            async move {
                let urls = client
                    .bootstrap
                    .resolve_domain(&tld_domain, |url| client.fetch_bootstrap(url, deadline, "dns"))
                    .await?;
                Ok((urls, format!("domain/{}", tld_domain)))
            }
            .boxed()
        })
        .await
    }

    /// Looks up an IP address or CIDR literal (spec §6: `ip(addr)`).
    pub async fn ip(&self, addr: &str) -> Result<NormalizedResponse, Error> {
        self.ip_cancellable(addr, &CancellationToken::new()).await
    }

    pub async fn ip_cancellable(
        &self,
        addr: &str,
        token: &CancellationToken,
    ) -> Result<NormalizedResponse, Error> {
        let (canonical, _version) = validators::validate_ip(addr)?;
        let query = Query::Ip(canonical.clone());
        self.run(query, token, |client, deadline| {
            let ip = canonical.clone();
            async move {
                let urls = client
                    .bootstrap
                    .resolve_ip(&ip, |url| client.fetch_bootstrap(url, deadline, "ip"))
                    .await?;
                Ok((urls, format!("ip/{}", ip)))
            }
            .boxed()
        })
        .await
    }

    /// Looks up an ASN; accepts a bare integer or an `AS`-prefixed string
    /// (spec §6: `asn(n | "AS"+n)`).
    pub async fn asn(&self, input: &str) -> Result<NormalizedResponse, Error> {
        self.asn_cancellable(input, &CancellationToken::new()).await
    }

    pub async fn asn_cancellable(
        &self,
        input: &str,
        token: &CancellationToken,
    ) -> Result<NormalizedResponse, Error> {
        let n = validators::validate_asn(input)?;
        let query = Query::Asn(n);
        self.run(query, token, move |client, deadline| {
            async move {
                let urls = client
                    .bootstrap
                    .resolve_asn(n, |url| client.fetch_bootstrap(url, deadline, "asn"))
                    .await?;
                Ok((urls, format!("autnum/{}", n)))
            }
            .boxed()
        })
        .await
    }

    /// Looks up an entity by handle, resolved via the object-tag bootstrap
    /// registry (SPEC_FULL.md §11's object-tag supplement).
    pub async fn entity(&self, handle: &str) -> Result<NormalizedResponse, Error> {
        self.entity_cancellable(handle, &CancellationToken::new()).await
    }

    pub async fn entity_cancellable(
        &self,
        handle: &str,
        token: &CancellationToken,
    ) -> Result<NormalizedResponse, Error> {
        if handle.trim().is_empty() {
            return Err(Error::validation("entity handle is empty"));
        }
        let handle = handle.trim().to_string();
        let query = Query::Entity(handle.clone());
        self.run(query, token, move |client, deadline| {
            let h = handle.clone();
            async move {
                let urls = client
                    .bootstrap
                    .resolve_entity(&h, |url| client.fetch_bootstrap(url, deadline, "object-tags"))
                    .await?;
                Ok((urls, format!("entity/{}", h)))
            }
            .boxed()
        })
        .await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        self.neg_cache.clear();
    }

    pub fn get_stats(&self) -> Stats {
        Stats {
            cache: self.cache.stats(),
            bootstrap_fetches: self.bootstrap.fetch_count(),
        }
    }

    /// Releases pooled sockets and rate-limiter state. The client is a
    /// value type; dropping it already releases everything `destroy` does,
    /// this exists for callers that want to release resources on a shared
    /// clone without waiting for every handle to drop.
    pub async fn destroy(&self) {
        self.cache.clear().await;
        self.neg_cache.clear();
    }

    /// The default deadline applied when a caller doesn't supply a
    /// [`CancellationToken`]-scoped deadline of their own: enough budget for
    /// every retry attempt's request timeout plus its backoff delay, so a
    /// fully-exhausted retry sequence still completes inside it.
    fn default_deadline(&self) -> Duration {
        let attempts = self.opts.retry.max_attempts.max(1);
        let per_attempt = self.opts.timeout.request + self.opts.retry.max_delay;
        per_attempt * attempts + self.opts.timeout.dns + self.opts.timeout.connect
    }

    async fn fetch_bootstrap(
        &self,
        url: String,
        deadline: Duration,
        registry: &'static str,
    ) -> Result<(serde_json::Value, Option<Duration>), Error> {
        let parsed = Url::parse(&url)?;
        let opts = self.opts.retry.clone();
        let sink = self.sink.clone();
        let fetcher = self.fetcher.clone();
        let result = retry::retry_observed(
            &opts,
            |_attempt| {
                let fetcher = fetcher.clone();
                let parsed = parsed.clone();
                async move { fetcher.fetch_bootstrap(&parsed, deadline).await }
            },
            move |attempt, delay| sink.record(Event::Retried { attempt, delay }),
        )
        .await?;
        self.sink.record(Event::BootstrapFetched { registry });
        Ok((result.body, result.cache_ttl))
    }

    /// The step 3-4 "resolve base URL, build full URL, fetch" portion of
    /// the template, shared by every query type via `discover`. `discover`
    /// returns the bootstrap's candidate URL list and the query's path
    /// suffix; spec §4.6: "try base URLs in the order given, the first
    /// that returns a usable response wins".
    async fn run<D, Fut>(
        &self,
        query: Query,
        token: &CancellationToken,
        discover: D,
    ) -> Result<NormalizedResponse, Error>
    where
        D: FnOnce(Client, Duration) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(Vec<String>, String), Error>> + Send + 'static,
    {
        let key = query.cache_key();
        let deadline = self.default_deadline();
        self.sink.record(Event::QueryStarted { query: key.clone() });

        let outcome = tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.run_inner(query.clone(), key.clone(), deadline, discover) => result,
        };

        match &outcome {
            Ok(response) => self.sink.record(Event::QuerySucceeded {
                query: key,
                cached: response.metadata().cached,
            }),
            Err(err) => self.sink.record(Event::QueryFailed {
                query: key,
                error_code: err.code(),
            }),
        }

        outcome
    }

    async fn run_inner<D, Fut>(
        &self,
        query: Query,
        key: String,
        deadline: Duration,
        discover: D,
    ) -> Result<NormalizedResponse, Error>
    where
        D: FnOnce(Client, Duration) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(Vec<String>, String), Error>> + Send + 'static,
    {
        // Step 2: cache lookup (spec §4.10 step 2, §5: "at-most-once server
        // contact per cache hit").
        if let Some(mut cached) = self.cache.get(&key).await {
            cached.metadata_mut().cached = true;
            return Ok(redact::redact(&cached, &self.opts.privacy));
        }
        if let Some(negative) = self.neg_cache.get(&key) {
            return Err(negative.into_error(&query));
        }

        // Single-flight: collapse concurrent cold lookups for the same key
        // onto one execution (spec §5).
        let (shared, is_original) = {
            let mut pending = self.pending.lock().unwrap();
            if let Some(existing) = pending.get(&key) {
                (existing.clone(), false)
            } else {
                let this = self.clone();
                let expected = query.object_class();
                let fut = async move { this.execute(query, deadline, discover, expected).await }
                    .boxed()
                    .shared();
                pending.insert(key.clone(), fut.clone());
                (fut, true)
            }
        };

        let result = shared.await;

        if is_original {
            self.pending.lock().unwrap().remove(&key);
        }

        match result {
            Ok(response) if is_original => Ok(response),
            // Joiners observe the same normalized value, but from their
            // perspective it was served from the coalesced call, not a
            // fresh server contact (spec §5: "cached=true for the rest").
            Ok(mut response) => {
                response.metadata_mut().cached = true;
                Ok(response)
            }
            Err(err) => Err(err),
        }
    }

    /// Steps 3-8 of the template: discover, fetch(+retry), normalize,
    /// validate object class, cache, redact.
    async fn execute<D, Fut>(
        &self,
        query: Query,
        deadline: Duration,
        discover: D,
        expected_class: ObjectClass,
    ) -> Result<NormalizedResponse, Error>
    where
        D: FnOnce(Client, Duration) -> Fut,
        Fut: std::future::Future<Output = Result<(Vec<String>, String), Error>>,
    {
        let key = query.cache_key();
        let started = Instant::now();

        let discovery = discover(self.clone(), deadline).await;
        let (mut candidates, suffix) = match discovery {
            Ok(v) => v,
            Err(err) => {
                self.cache_negative(&key, &err);
                return Err(err);
            }
        };

        // Try the bootstrap's preferred (https) candidate first; the rest
        // stay in discovery order as fallbacks.
        if let Some(pos) = crate::bootstrap::preferred_url(&candidates)
            .and_then(|pref| candidates.iter().position(|u| u == pref))
        {
            candidates.swap(0, pos);
        }

        let mut last_err = None;
        for base in &candidates {
            let remaining = deadline.checked_sub(started.elapsed()).unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                return Err(Error::Timeout(deadline));
            }

            let url = match join(base, &suffix) {
                Ok(url) => url,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            match self.fetch_and_normalize(&url, &query, deadline, remaining).await {
                Ok(response) => {
                    if response.object_class() != expected_class {
                        return Err(Error::protocol(format!(
                            "server returned {:?}, expected {:?}",
                            response.object_class(),
                            expected_class
                        )));
                    }

                    // Step 7: store only successful responses.
                    self.cache.set(key.clone(), response.clone(), None).await;

                    return Ok(redact::redact(&response, &self.opts.privacy));
                }
                Err(e @ Error::NotFound) => {
                    self.cache_negative(&key, &e);
                    return Err(e);
                }
                Err(e) => last_err = Some(e),
            }
        }

        let err = last_err.unwrap_or_else(|| Error::NoServerFound {
            message: "bootstrap returned no usable candidate URLs".to_string(),
        });
        self.cache_negative(&key, &err);
        Err(err)
    }

    fn cache_negative(&self, key: &str, err: &Error) {
        let kind = match err {
            Error::NotFound => Negative::NotFound,
            Error::NoServerFound { .. } => Negative::NoServerFound,
            _ => return,
        };
        self.neg_cache.set(key.to_string(), kind, self.opts.cache.negative_ttl);
    }

    async fn fetch_and_normalize(
        &self,
        url: &Url,
        query: &Query,
        _deadline: Duration,
        remaining: Duration,
    ) -> Result<NormalizedResponse, Error> {
        let opts = self.opts.retry.clone();
        let sink = self.sink.clone();
        let fetcher = self.fetcher.clone();

        let fetched = retry::retry_observed(
            &opts,
            |_attempt| {
                let fetcher = fetcher.clone();
                async move { fetcher.fetch(url, remaining).await }
            },
            move |attempt, delay| sink.record(Event::Retried { attempt, delay }),
        )
        .await?;

        normalize(NormalizeInput {
            raw: &fetched.body,
            query: query.clone(),
            source: fetched.final_url.to_string(),
            cached: false,
            include_raw: self.opts.include_raw,
        })
    }
}

fn join(base: &str, suffix: &str) -> Result<Url, Error> {
    let trimmed = base.trim_end_matches('/');
    Url::parse(&format!("{}/{}", trimmed, suffix)).map_err(Error::from)
}

/// A direct entity-handle lookup, used by [`Client::entity`]'s result type
/// when only the bare entity (not an envelope) is needed.
pub fn unwrap_entity(response: NormalizedResponse) -> Result<RDAPEntity, Error> {
    match response {
        NormalizedResponse::Entity { entity, .. } => Ok(entity),
        other => Err(Error::protocol(format!(
            "expected an entity response, got {:?}",
            other.object_class()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheOptions;

    #[test]
    fn default_deadline_scales_with_retry_budget() {
        let opts = Options {
            retry: crate::config::RetryOptions {
                max_attempts: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let client = Client::new(opts);
        assert!(client.default_deadline() >= Duration::from_secs(3));
    }

    #[test]
    fn cache_disabled_uses_noop_cache() {
        let opts = Options {
            cache: CacheOptions {
                enabled: false,
                strategy: CacheStrategy::None,
                ..Default::default()
            },
            ..Default::default()
        };
        let client = Client::new(opts);
        assert!(!client.get_stats().cache.enabled);
    }

    #[test]
    fn cancellation_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn domain_rejects_invalid_input_before_any_network_work() {
        let client = Client::new(Options::default());
        let err = client.domain("not a domain").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn asn_rejects_invalid_input_before_any_network_work() {
        let client = Client::new(Options::default());
        let err = client.asn("not-an-asn").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn entity_rejects_empty_handle() {
        let client = Client::new(Options::default());
        let err = client.entity("  ").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn idle_rate_limit_buckets_are_swept_in_the_background() {
        let opts = Options {
            rate_limit: crate::config::RateLimitOptions {
                idle_gc_interval: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        };
        let client = Client::new(opts);
        client
            .rate_limiter
            .acquire("idle.test", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(client.rate_limiter.bucket_count(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.rate_limiter.bucket_count(), 0);
    }

    #[test]
    fn join_strips_trailing_slash_on_base() {
        let url = join("https://rdap.example-registry.test/", "domain/example.com").unwrap();
        assert_eq!(url.as_str(), "https://rdap.example-registry.test/domain/example.com");
    }
}
