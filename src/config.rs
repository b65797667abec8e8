//! Client configuration. Every field is defaulted; the
//! "Dynamic configuration objects" design note is handled by giving callers
//! plain boolean short-forms on the few options that need them (`cache`,
//! `ssrf_protection`) and folding them into the fully expanded struct form
//! with [`Options::normalize`] — there is no separate union type, just this
//! one pass over the already-typed struct.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    Memory,
    None,
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub enabled: bool,
    pub strategy: CacheStrategy,
    pub ttl: Duration,
    pub max_size: usize,
    /// TTL for negative (`NotFound`/`NoServerFound`) cache entries. Open
    /// Defaults to 60s, always overridable.
    pub negative_ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            enabled: true,
            strategy: CacheStrategy::Memory,
            ttl: Duration::from_secs(3600),
            max_size: 1000,
            negative_ttl: Duration::from_secs(60),
        }
    }
}

impl CacheOptions {
    pub fn disabled() -> Self {
        CacheOptions {
            enabled: false,
            strategy: CacheStrategy::None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrivacyOptions {
    pub redact_pii: bool,
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub redact_addresses: bool,
}

impl Default for PrivacyOptions {
    fn default() -> Self {
        PrivacyOptions {
            redact_pii: true,
            redact_emails: true,
            redact_phones: true,
            redact_addresses: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutOptions {
    pub dns: Duration,
    pub connect: Duration,
    pub request: Duration,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        let default = Duration::from_millis(5000);
        TimeoutOptions {
            dns: default,
            connect: default,
            request: default,
        }
    }
}

impl TimeoutOptions {
    /// Applies a single millisecond value to all three phases, matching the
    /// `uniform()` builds the "single number" short-form for `timeout`.
    pub fn uniform(ms: u64) -> Self {
        let d = Duration::from_millis(ms);
        TimeoutOptions {
            dns: d,
            connect: d,
            request: d,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SsrfOptions {
    pub enabled: bool,
    pub block_private_ips: bool,
    pub block_localhost: bool,
    pub block_link_local: bool,
    pub blocked_domains: Vec<String>,
    pub allowed_domains: Vec<String>,
}

impl Default for SsrfOptions {
    fn default() -> Self {
        SsrfOptions {
            enabled: true,
            block_private_ips: true,
            block_localhost: true,
            block_link_local: true,
            blocked_domains: Vec::new(),
            allowed_domains: Vec::new(),
        }
    }
}

impl SsrfOptions {
    pub fn disabled() -> Self {
        SsrfOptions {
            enabled: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            // Off by default for deterministic tests.
            jitter: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    pub enabled: bool,
    pub per_host_rate: f64,
    pub per_host_burst: u32,
    pub idle_gc_interval: Duration,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        RateLimitOptions {
            enabled: true,
            per_host_rate: 5.0,
            per_host_burst: 10,
            idle_gc_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub cache: CacheOptions,
    pub privacy: PrivacyOptions,
    pub timeout: TimeoutOptions,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub follow_redirects: bool,
    pub max_redirects: u8,
    pub ssrf_protection: SsrfOptions,
    pub retry: RetryOptions,
    pub rate_limit: RateLimitOptions,
    pub bootstrap_url: Option<String>,
    pub include_raw: bool,
    pub connection_pool_size_per_host: usize,
    pub connection_idle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            cache: CacheOptions::default(),
            privacy: PrivacyOptions::default(),
            timeout: TimeoutOptions::default(),
            user_agent: format!("rdap-client/{}", env!("CARGO_PKG_VERSION")),
            headers: Vec::new(),
            follow_redirects: true,
            max_redirects: 5,
            ssrf_protection: SsrfOptions::default(),
            retry: RetryOptions::default(),
            rate_limit: RateLimitOptions::default(),
            bootstrap_url: None,
            include_raw: false,
            connection_pool_size_per_host: 10,
            connection_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl Options {
    /// Folds the boolean short-forms a caller may set directly on a
    /// sub-struct — `cache.enabled = false` without also setting
    /// `cache.strategy`, `ssrf_protection.enabled = false` without clearing
    /// the individual `block_*` flags — into the fully expanded struct form,
    /// so every downstream module can match on `strategy`/`block_*` alone
    /// without re-deriving "enabled" from them. Called once by
    /// [`crate::Client::new`]; exposed so callers constructing `Options` by
    /// hand can invoke it directly too.
    pub fn normalize(mut self) -> Self {
        if !self.cache.enabled {
            self.cache.strategy = CacheStrategy::None;
        }
        if !self.ssrf_protection.enabled {
            self.ssrf_protection.block_private_ips = false;
            self.ssrf_protection.block_localhost = false;
            self.ssrf_protection.block_link_local = false;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let o = Options::default();
        assert_eq!(o.cache.ttl, Duration::from_secs(3600));
        assert_eq!(o.cache.max_size, 1000);
        assert_eq!(o.retry.max_attempts, 3);
        assert_eq!(o.retry.backoff, BackoffStrategy::Exponential);
        assert_eq!(o.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(o.retry.max_delay, Duration::from_secs(10));
        assert!(!o.retry.jitter);
        assert_eq!(o.rate_limit.per_host_rate, 5.0);
        assert_eq!(o.rate_limit.per_host_burst, 10);
        assert!(o.follow_redirects);
        assert_eq!(o.max_redirects, 5);
        assert!(!o.include_raw);
    }

    #[test]
    fn uniform_timeout_applies_to_all_phases() {
        let t = TimeoutOptions::uniform(2500);
        assert_eq!(t.dns, Duration::from_millis(2500));
        assert_eq!(t.connect, Duration::from_millis(2500));
        assert_eq!(t.request, Duration::from_millis(2500));
    }

    #[test]
    fn normalize_folds_cache_false_short_form_into_strategy_none() {
        let mut o = Options::default();
        o.cache.enabled = false; // the `cache: false` short-form
        let o = o.normalize();
        assert_eq!(o.cache.strategy, CacheStrategy::None);
    }

    #[test]
    fn normalize_folds_ssrf_disabled_short_form_into_cleared_block_flags() {
        let mut o = Options::default();
        o.ssrf_protection.enabled = false; // the `ssrfProtection: false` short-form
        let o = o.normalize();
        assert!(!o.ssrf_protection.block_private_ips);
        assert!(!o.ssrf_protection.block_localhost);
        assert!(!o.ssrf_protection.block_link_local);
    }

    #[test]
    fn normalize_is_a_no_op_on_already_expanded_defaults() {
        let o = Options::default().normalize();
        assert_eq!(o.cache.strategy, CacheStrategy::Memory);
        assert!(o.ssrf_protection.block_private_ips);
    }
}
