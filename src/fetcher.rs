//! HTTPS fetcher (spec §4.4): the only place a socket gets opened. Wires
//! together the SSRF guard, rate limiter, redirect handling, and the RDAP
//! status-code taxonomy from spec §4.4/§7.
//!
//! DNS resolution for every connection goes through [`SsrfResolver`], a
//! custom `hyper` DNS resolver that filters out disallowed addresses
//! before `hyper`'s connector ever dials them — this is how the "re-apply
//! rule 4 against the resolved address, immediately before connect"
//! requirement (spec §4.2) is satisfied without hand-rolling TCP connect.

use crate::config::{Options, SsrfOptions};
use crate::errors::Error;
use crate::observability::{Event, NullSink, Sink};
use crate::ratelimit::RateLimiter;
use crate::ssrf;
use futures::future::BoxFuture;
use http::header::{ACCEPT, HOST, USER_AGENT};
use hyper::client::connect::dns::Name;
use hyper::client::connect::HttpConnector;
use hyper::service::Service;
use hyper::{Body, Client, Request};
use hyper_rustls::HttpsConnectorBuilder;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

const RDAP_ACCEPT: &str = "application/rdap+json, application/json;q=0.5";

/// A `hyper` DNS resolver that resolves via the system resolver and then
/// drops any address the SSRF policy would reject, so the connector can
/// only ever dial an address that has already passed rule 4.
#[derive(Clone)]
struct SsrfResolver {
    opts: SsrfOptions,
    dns_timeout: Duration,
}

impl Service<Name> for SsrfResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = std::io::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let opts = self.opts.clone();
        let dns_timeout = self.dns_timeout;
        Box::pin(async move {
            let host = name.as_str().to_string();
            let lookup = format!("{}:0", host);
            let addrs = timeout(dns_timeout, tokio::net::lookup_host(lookup))
                .await
                .map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("DNS lookup for host {:?} exceeded {:?}", host, dns_timeout),
                    )
                })??;

            let allowed: Vec<SocketAddr> = addrs
                .filter(|addr| ssrf::check_resolved_addr(addr.ip(), &opts).is_ok())
                .collect();

            if allowed.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("no SSRF-permitted address for host {:?}", host),
                ));
            }

            Ok(allowed.into_iter())
        })
    }
}

pub struct Fetcher {
    client: Client<hyper_rustls::HttpsConnector<HttpConnector<SsrfResolver>>, Body>,
    rate_limiter: Arc<RateLimiter>,
    opts: Arc<Options>,
    sink: Arc<dyn Sink>,
}

/// Outcome of a single fetch: the parsed JSON body and the final URL after
/// any redirects were followed (spec §4.4: "final URL").
pub struct FetchResult {
    pub body: serde_json::Value,
    pub final_url: Url,
    /// The freshness lifetime advertised by `Cache-Control: max-age` or
    /// `Expires`, if present. Only consulted by the bootstrap resolver
    /// (SPEC_FULL.md §11: a shorter server-advised max-age overrides the
    /// fixed 24h bootstrap default); RDAP resource fetches ignore it.
    pub cache_ttl: Option<Duration>,
}

impl Fetcher {
    pub fn new(opts: Arc<Options>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self::with_sink(opts, rate_limiter, Arc::new(NullSink))
    }

    pub fn with_sink(opts: Arc<Options>, rate_limiter: Arc<RateLimiter>, sink: Arc<dyn Sink>) -> Self {
        let resolver = SsrfResolver {
            opts: opts.ssrf_protection.clone(),
            dns_timeout: opts.timeout.dns,
        };
        let mut http = HttpConnector::new_with_resolver(resolver);
        http.enforce_http(false);
        http.set_connect_timeout(Some(opts.timeout.connect));

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_only()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder()
            .pool_idle_timeout(opts.connection_idle_timeout)
            .pool_max_idle_per_host(opts.connection_pool_size_per_host)
            .build(https);

        Fetcher {
            client,
            rate_limiter,
            opts,
            sink,
        }
    }

    /// Fetches `url`, following redirects and honoring the status-code
    /// table in spec §4.4. `deadline` bounds the *entire* call including
    /// redirect hops and rate-limiter waits (spec §5: "every public
    /// operation accepts ... a deadline"). The response must carry
    /// `objectClassName`, per spec §4.4's success criterion for RDAP
    /// resource fetches.
    pub async fn fetch(&self, url: &Url, deadline: Duration) -> Result<FetchResult, Error> {
        self.fetch_inner(url, deadline, true).await
    }

    /// Like [`Fetcher::fetch`], but for the bootstrap registry files (spec
    /// §4.6), which carry a `services` array rather than `objectClassName`.
    pub async fn fetch_bootstrap(&self, url: &Url, deadline: Duration) -> Result<FetchResult, Error> {
        self.fetch_inner(url, deadline, false).await
    }

    async fn fetch_inner(
        &self,
        url: &Url,
        deadline: Duration,
        require_object_class: bool,
    ) -> Result<FetchResult, Error> {
        let mut current = url.clone();
        let mut redirects = 0u8;
        let started = tokio::time::Instant::now();

        loop {
            let remaining = deadline
                .checked_sub(started.elapsed())
                .ok_or(Error::Timeout(deadline))?;

            ssrf::check_url(&current, &self.opts.ssrf_protection)?;

            let host = current
                .host_str()
                .ok_or_else(|| Error::ssrf("URL has no host"))?
                .to_string();
            self.rate_limiter.acquire(&host, remaining).await?;

            let remaining = deadline
                .checked_sub(started.elapsed())
                .ok_or(Error::Timeout(deadline))?;

            let attempt = timeout(
                remaining.min(self.opts.timeout.request),
                self.single_request(&current, require_object_class),
            )
            .await;

            match attempt {
                Ok(Ok(Outcome::Success { body, cache_ttl })) => {
                    return Ok(FetchResult {
                        body,
                        final_url: current,
                        cache_ttl,
                    })
                }
                Ok(Ok(Outcome::Redirect(next))) => {
                    redirects += 1;
                    if !self.opts.follow_redirects || redirects > self.opts.max_redirects {
                        return Err(Error::protocol(format!(
                            "redirect limit ({}) exceeded",
                            self.opts.max_redirects
                        )));
                    }
                    if next.scheme() == "http" && current.scheme() == "https" {
                        return Err(Error::ssrf("redirect downgraded scheme from https to http"));
                    }
                    if next == current {
                        return Err(Error::protocol("redirect loop detected"));
                    }
                    current = next;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::Timeout(self.opts.timeout.request)),
            }
        }
    }

    async fn single_request(&self, url: &Url, require_object_class: bool) -> Result<Outcome, Error> {
        let uri: hyper::Uri = url.as_str().parse().map_err(|e: http::uri::InvalidUri| {
            Error::validation(format!("invalid URL: {}", e))
        })?;

        let mut builder = Request::builder()
            .method(http::Method::GET)
            .uri(uri)
            .header(ACCEPT, RDAP_ACCEPT)
            .header(USER_AGENT, self.opts.user_agent.as_str());

        for (name, value) in &self.opts.headers {
            // Host and Accept-Encoding are managed by the transport and
            // must not be overridden by caller-supplied headers (spec §4.4).
            if name.eq_ignore_ascii_case(HOST.as_str()) || name.eq_ignore_ascii_case("accept-encoding") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        let req = builder.body(Body::empty())?;

        let resp = self.client.request(req).await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                Error::network(e.to_string())
            } else {
                Error::network(e.to_string())
            }
        })?;

        let status = resp.status();

        if status.is_redirection() {
            let location = resp
                .headers()
                .get(http::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::protocol("redirect response missing Location header"))?;
            let next = url
                .join(location)
                .map_err(|e| Error::protocol(format!("invalid redirect target: {}", e)))?;
            return Ok(Outcome::Redirect(next));
        }

        if status.as_u16() == 404 {
            return Err(Error::NotFound);
        }

        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get(http::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            self.sink.record(Event::RateLimited {
                host: url.host_str().unwrap_or_default().to_string(),
                retry_after,
            });
            return Err(Error::RateLimited { retry_after });
        }

        if status.is_server_error() {
            return Err(Error::network(format!("server error: {}", status)));
        }

        if status.is_client_error() {
            return Err(Error::protocol(format!("unexpected client error: {}", status)));
        }

        if !status.is_success() {
            return Err(Error::protocol(format!("unexpected status: {}", status)));
        }

        let cache_ttl = cache_ttl_from_headers(resp.headers());

        let bytes = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| Error::network(e.to_string()))?;

        let value: serde_json::Value = serde_json::from_slice(&bytes)?;

        if require_object_class && value.get("objectClassName").is_none() {
            return Err(Error::protocol("response is missing objectClassName"));
        }

        Ok(Outcome::Success { body: value, cache_ttl })
    }
}

enum Outcome {
    Success {
        body: serde_json::Value,
        cache_ttl: Option<Duration>,
    },
    Redirect(Url),
}

/// Parses `Cache-Control: max-age=N` (preferred) or falls back to `Expires`,
/// for the bootstrap resolver's cache-control honoring (SPEC_FULL.md §11).
fn cache_ttl_from_headers(headers: &http::HeaderMap) -> Option<Duration> {
    if let Some(cc) = headers.get(http::header::CACHE_CONTROL).and_then(|v| v.to_str().ok()) {
        for directive in cc.split(',') {
            let directive = directive.trim();
            if let Some(secs) = directive.strip_prefix("max-age=") {
                if let Ok(secs) = secs.trim().parse::<u64>() {
                    return Some(Duration::from_secs(secs));
                }
            }
        }
    }

    let expires = headers.get(http::header::EXPIRES).and_then(|v| v.to_str().ok())?;
    let when = httpdate::parse_http_date(expires.trim()).ok()?;
    when.duration_since(std::time::SystemTime::now()).ok()
}

/// Parses `Retry-After` as either delta-seconds or an HTTP-date (spec §4.4).
fn parse_retry_after(raw: &str) -> Option<Duration> {
    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    httpdate::parse_http_date(raw.trim())
        .ok()
        .and_then(|when| when.duration_since(std::time::SystemTime::now()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_parses_delta_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("not-a-date"), None);
    }

    #[test]
    fn cache_ttl_prefers_max_age_over_expires() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::CACHE_CONTROL, "public, max-age=600".parse().unwrap());
        assert_eq!(cache_ttl_from_headers(&headers), Some(Duration::from_secs(600)));
    }

    #[test]
    fn cache_ttl_absent_without_headers() {
        let headers = http::HeaderMap::new();
        assert_eq!(cache_ttl_from_headers(&headers), None);
    }
}
