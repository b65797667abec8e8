//! rdap-client is an async RDAP (Registration Data Access Protocol) client
//! for looking up domain, IP, ASN, and entity registration data per
//! RFC 7480/7482/7483/9224/9083/8605.
//!
//! # Usage
//!
//! ```rust,no_run
//! use rdap_client::{Client, Options};
//!
//! # async fn run() -> Result<(), rdap_client::Error> {
//! let client = Client::new(Options::default());
//! let response = client.domain("example.com").await?;
//! println!("{:#?}", response);
//! # Ok(())
//! # }
//! ```
//!
//! The client discovers the authoritative server for a query via IANA's
//! RDAP bootstrap registries, fetches the response over HTTPS with SSRF
//! guards and per-host rate limiting, retries transient failures with
//! backoff honoring `Retry-After`, and normalizes the result into a
//! stable shape regardless of which registry served it. See
//! [`Options`] for every configurable knob, and the [`config`] module
//! for the options sub-structs (cache, privacy/redaction, timeouts,
//! SSRF, retry, rate limiting).
//!
//! # Observability
//!
//! Construct a client with [`Client::with_sink`] to route query
//! lifecycle events to a custom [`observability::Sink`] (metrics,
//! tracing spans) instead of the default [`observability::LogSink`],
//! which forwards to the `log` facade.
//!
//! # Caching and concurrency
//!
//! Successful (and, separately, negative) lookups are cached per
//! [`config::CacheOptions`]. Concurrent callers requesting the same
//! query while a cold lookup is in flight are coalesced onto that
//! single request rather than each dialing the registry themselves.
//!
//! # TODO
//! * [ ] Persistent (disk-backed) cache strategy

mod bootstrap;
mod cache;
mod client;
mod config;
mod errors;
mod fetcher;
mod normalize;
mod observability;
mod ratelimit;
mod redact;
mod retry;
mod ssrf;
mod types;
mod validators;

#[macro_use]
extern crate lazy_static;

#[doc(inline)]
pub use crate::client::{CancellationToken, Client, Stats};

#[doc(inline)]
pub use crate::config::{
    BackoffStrategy, CacheOptions, CacheStrategy, Options, PrivacyOptions, RateLimitOptions,
    RetryOptions, SsrfOptions, TimeoutOptions,
};

#[doc(inline)]
pub use crate::types::{
    AsnResponse, DomainResponse, Envelope, EventType, IpResponse, Link, Metadata,
    NormalizedResponse, ObjectClass, PublicId, Query, RDAPEntity, RDAPEvent, Registrar, Remark,
    Role,
};

pub use crate::cache::{Cache, CacheStats, MemoryCache, NoopCache};
pub use crate::client::unwrap_entity;
pub use crate::errors::Error;
pub use crate::observability::{Event, LogSink, NullSink, Sink};

/// Validators and the SSRF guard are exposed for callers building their
/// own pre-flight checks on top of the client (e.g. a web form that wants
/// to reject obviously-invalid input before it ever reaches [`Client`]).
pub mod validation {
    pub use crate::ssrf::{check_resolved_addr, check_url};
    pub use crate::validators::{validate_asn, validate_domain, validate_ip, IpVersion};
}
