//! Bootstrap resolver: maintains the IANA bootstrap registries
//! (domain/ipv4/ipv6/asn) and resolves a canonicalized query to an ordered
//! list of candidate RDAP base URLs.
//!
//! Each registry is fetched at most once per TTL window; concurrent cold
//! lookups for the same registry type collapse onto a single fetch guarded
//! by a per-type async mutex.

use crate::errors::Error;
use crate::validators::{parse_asn_range, rightmost_label};
use ipnet::{Ipv4Net, Ipv6Net};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex as AsyncMutex;

const DEFAULT_BOOTSTRAP_BASE: &str = "https://data.iana.org/rdap";
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// The five IANA bootstrap files: the first four route domain/ip/asn
/// lookups; object tags additionally resolve `entity()` lookups by the tag
/// suffix of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    Dns,
    Ipv4,
    Ipv6,
    Asn,
    ObjectTags,
}

impl RegistryKind {
    fn path(self) -> &'static str {
        match self {
            RegistryKind::Dns => "dns.json",
            RegistryKind::Ipv4 => "ipv4.json",
            RegistryKind::Ipv6 => "ipv6.json",
            RegistryKind::Asn => "asn.json",
            RegistryKind::ObjectTags => "object-tags.json",
        }
    }
}

/// Raw wire shape of an IANA bootstrap file (RFC 9224): a `services` array
/// of `[keys[], urls[]]` pairs.
#[derive(Debug, Deserialize)]
struct RawBootstrap {
    services: Vec<Vec<Vec<String>>>,
}

struct CachedRegistry {
    services: Vec<(Vec<String>, Vec<String>)>,
    fetched_at: SystemTime,
    ttl: Duration,
}

impl CachedRegistry {
    fn is_fresh(&self, now: SystemTime) -> bool {
        match now.duration_since(self.fetched_at) {
            Ok(age) => age < self.ttl,
            Err(_) => true,
        }
    }
}

/// One entry per [`RegistryKind`], each behind its own async mutex so a
/// cold lookup for `dns.json` never blocks one for `asn.json`.
pub struct BootstrapResolver {
    dns: AsyncMutex<Option<CachedRegistry>>,
    ipv4: AsyncMutex<Option<CachedRegistry>>,
    ipv6: AsyncMutex<Option<CachedRegistry>>,
    asn: AsyncMutex<Option<CachedRegistry>>,
    object_tags: AsyncMutex<Option<CachedRegistry>>,
    base_url: String,
    ttl: Duration,
    // Counts live fetches, exposed via get_stats; guarded separately since
    // it's incremented from inside the per-kind mutex's critical section.
    fetch_count: Mutex<u64>,
}

impl BootstrapResolver {
    pub fn new(base_url: Option<String>, ttl: Duration) -> Self {
        BootstrapResolver {
            dns: AsyncMutex::new(None),
            ipv4: AsyncMutex::new(None),
            ipv6: AsyncMutex::new(None),
            asn: AsyncMutex::new(None),
            object_tags: AsyncMutex::new(None),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BOOTSTRAP_BASE.to_string()),
            ttl,
            fetch_count: Mutex::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(None, DEFAULT_TTL)
    }

    pub fn fetch_count(&self) -> u64 {
        *self.fetch_count.lock().unwrap()
    }

    fn slot(&self, kind: RegistryKind) -> &AsyncMutex<Option<CachedRegistry>> {
        match kind {
            RegistryKind::Dns => &self.dns,
            RegistryKind::Ipv4 => &self.ipv4,
            RegistryKind::Ipv6 => &self.ipv6,
            RegistryKind::Asn => &self.asn,
            RegistryKind::ObjectTags => &self.object_tags,
        }
    }

    /// Fetches `kind`'s bootstrap file via `fetch_json`, a caller-supplied
    /// closure so this module stays decoupled from the fetcher/SSRF/retry
    /// stack (the orchestrator wires the real fetcher in). `fetch_json`
    /// also returns the server-advertised cache lifetime, if any: a shorter
    /// `Cache-Control: max-age`/`Expires` overrides the fixed default TTL
    /// (SPEC_FULL.md §11); the default is a floor, not a ceiling.
    async fn ensure_fresh<F, Fut>(&self, kind: RegistryKind, fetch_json: F) -> Result<(), Error>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<(serde_json::Value, Option<Duration>), Error>>,
    {
        let mut guard = self.slot(kind).lock().await;
        let now = SystemTime::now();
        if let Some(cached) = guard.as_ref() {
            if cached.is_fresh(now) {
                return Ok(());
            }
        }

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), kind.path());
        let (value, server_ttl) = fetch_json(url).await.map_err(|e| Error::Bootstrap {
            message: format!("failed to fetch {:?} bootstrap registry: {}", kind, e),
        })?;

        let raw: RawBootstrap = serde_json::from_value(value).map_err(|e| Error::Bootstrap {
            message: format!("malformed {:?} bootstrap registry: {}", kind, e),
        })?;

        let services = raw
            .services
            .into_iter()
            .filter_map(|mut pair| {
                if pair.len() < 2 {
                    return None;
                }
                let urls = pair.pop().unwrap();
                let keys = pair.pop().unwrap();
                Some((keys, urls))
            })
            .collect();

        let ttl = match server_ttl {
            Some(advised) if advised < self.ttl => advised,
            _ => self.ttl,
        };

        *guard = Some(CachedRegistry {
            services,
            fetched_at: now,
            ttl,
        });
        *self.fetch_count.lock().unwrap() += 1;

        Ok(())
    }

    /// Resolves a canonical domain name to its candidate RDAP base URLs by
    /// matching the rightmost label (TLD) case-insensitively.
    pub async fn resolve_domain<F, Fut>(
        &self,
        canonical_domain: &str,
        fetch_json: F,
    ) -> Result<Vec<String>, Error>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<(serde_json::Value, Option<Duration>), Error>>,
    {
        self.ensure_fresh(RegistryKind::Dns, fetch_json).await?;
        let guard = self.dns.lock().await;
        let registry = guard.as_ref().expect("just populated");

        let tld = rightmost_label(canonical_domain).to_ascii_lowercase();
        let mut best: Option<(usize, &Vec<String>)> = None;
        for (keys, urls) in &registry.services {
            for key in keys {
                let key_lower = key.to_ascii_lowercase();
                if key_lower == tld {
                    if best.map(|(len, _)| len < key_lower.len()).unwrap_or(true) {
                        best = Some((key_lower.len(), urls));
                    }
                }
            }
        }

        best.map(|(_, urls)| urls.clone())
            .ok_or_else(|| Error::NoServerFound {
                message: format!("no bootstrap entry covers TLD {:?}", tld),
            })
    }

    /// Resolves an IP literal to the candidate URLs of the most-specific
    /// (longest-prefix) covering CIDR entry.
    pub async fn resolve_ip<F, Fut>(
        &self,
        canonical_ip: &str,
        fetch_json: F,
    ) -> Result<Vec<String>, Error>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<(serde_json::Value, Option<Duration>), Error>>,
    {
        let addr: IpAddr = canonical_ip
            .parse()
            .map_err(|_| Error::validation(format!("invalid IP: {}", canonical_ip)))?;

        match addr {
            IpAddr::V4(v4) => {
                self.ensure_fresh(RegistryKind::Ipv4, fetch_json).await?;
                let guard = self.ipv4.lock().await;
                let registry = guard.as_ref().expect("just populated");

                let mut best: Option<(u8, &Vec<String>)> = None;
                for (keys, urls) in &registry.services {
                    for key in keys {
                        if let Ok(net) = key.parse::<Ipv4Net>() {
                            if net.contains(&v4)
                                && best.map(|(len, _)| len < net.prefix_len()).unwrap_or(true)
                            {
                                best = Some((net.prefix_len(), urls));
                            }
                        }
                    }
                }
                best.map(|(_, urls)| urls.clone())
                    .ok_or_else(|| Error::NoServerFound {
                        message: format!("no bootstrap entry covers {}", canonical_ip),
                    })
            }
            IpAddr::V6(v6) => {
                self.ensure_fresh(RegistryKind::Ipv6, fetch_json).await?;
                let guard = self.ipv6.lock().await;
                let registry = guard.as_ref().expect("just populated");

                let mut best: Option<(u8, &Vec<String>)> = None;
                for (keys, urls) in &registry.services {
                    for key in keys {
                        if let Ok(net) = key.parse::<Ipv6Net>() {
                            if net.contains(&v6)
                                && best.map(|(len, _)| len < net.prefix_len()).unwrap_or(true)
                            {
                                best = Some((net.prefix_len(), urls));
                            }
                        }
                    }
                }
                best.map(|(_, urls)| urls.clone())
                    .ok_or_else(|| Error::NoServerFound {
                        message: format!("no bootstrap entry covers {}", canonical_ip),
                    })
            }
        }
    }

    /// Resolves an ASN to the candidate URLs of the unique covering range.
    pub async fn resolve_asn<F, Fut>(&self, asn: u32, fetch_json: F) -> Result<Vec<String>, Error>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<(serde_json::Value, Option<Duration>), Error>>,
    {
        self.ensure_fresh(RegistryKind::Asn, fetch_json).await?;
        let guard = self.asn.lock().await;
        let registry = guard.as_ref().expect("just populated");

        for (keys, urls) in &registry.services {
            for key in keys {
                if let Ok((lo, hi)) = parse_asn_range(key) {
                    if lo <= asn && asn <= hi {
                        return Ok(urls.clone());
                    }
                }
            }
        }

        Err(Error::NoServerFound {
            message: format!("no bootstrap entry covers AS{}", asn),
        })
    }

    /// Resolves an entity handle's object-tag suffix (the text after the
    /// last `-`) to candidate URLs.
    pub async fn resolve_entity<F, Fut>(
        &self,
        handle: &str,
        fetch_json: F,
    ) -> Result<Vec<String>, Error>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<(serde_json::Value, Option<Duration>), Error>>,
    {
        let tag = handle
            .rsplit_once('-')
            .map(|(_, tag)| tag)
            .ok_or_else(|| Error::validation(format!("entity handle has no tag suffix: {:?}", handle)))?
            .to_ascii_uppercase();

        self.ensure_fresh(RegistryKind::ObjectTags, fetch_json).await?;
        let guard = self.object_tags.lock().await;
        let registry = guard.as_ref().expect("just populated");

        for (keys, urls) in &registry.services {
            if keys.iter().any(|k| k.to_ascii_uppercase() == tag) {
                return Ok(urls.clone());
            }
        }

        Err(Error::NoServerFound {
            message: format!("no bootstrap entry covers object tag {:?}", tag),
        })
    }
}

/// Picks the first `https://` URL from a candidate list, falling back to
/// the first entry if none is https. Preferring https keeps the fetcher's
/// SSRF guard from rejecting the attempt outright.
pub fn preferred_url(urls: &[String]) -> Option<&str> {
    urls.iter()
        .find(|u| u.starts_with("https://"))
        .or_else(|| urls.first())
        .map(|s| s.as_str())
}
