//! Cache manager: a keyed TTL store with LRU eviction, pluggable behind
//! [`Cache`] so an external implementation can sit behind the same five
//! operations. [`MemoryCache`] is the default.

use crate::types::{CacheEntry, NormalizedResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub size: usize,
    pub enabled: bool,
    pub ttl_secs: u64,
}

/// The cache port: `get`/`set`/`delete`/`clear`/`size`. An `async_trait`
/// object-safe interface, matching how `rustdns`'s `Exchanger` trait
/// abstracts its transport behind an async method set.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<NormalizedResponse>;
    async fn set(&self, key: String, value: NormalizedResponse, ttl_override: Option<Duration>);
    async fn delete(&self, key: &str);
    async fn clear(&self);
    async fn size(&self) -> usize;
    fn stats(&self) -> CacheStats;
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    // Most-recently-read key ordered last; eviction drops the front.
    lru: Vec<String>,
}

/// In-memory cache with per-entry TTL expiry and LRU eviction once
/// `max_size` is reached.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    default_ttl: Duration,
    max_size: usize,
    enabled: bool,
}

impl MemoryCache {
    pub fn new(enabled: bool, default_ttl: Duration, max_size: usize) -> Self {
        MemoryCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru: Vec::new(),
            }),
            default_ttl,
            max_size,
            enabled,
        }
    }

    fn touch(inner: &mut Inner, key: &str) {
        if let Some(pos) = inner.lru.iter().position(|k| k == key) {
            inner.lru.remove(pos);
        }
        inner.lru.push(key.to_string());
    }

    fn evict_if_needed(inner: &mut Inner, max_size: usize) {
        while inner.entries.len() >= max_size && !inner.lru.is_empty() {
            let victim = inner.lru.remove(0);
            inner.entries.remove(&victim);
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<NormalizedResponse> {
        if !self.enabled {
            return None;
        }

        let mut inner = self.inner.lock().unwrap();
        let now = SystemTime::now();

        let expired = inner.entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false);
        if expired {
            inner.entries.remove(key);
            if let Some(pos) = inner.lru.iter().position(|k| k == key) {
                inner.lru.remove(pos);
            }
            return None;
        }

        let value = inner.entries.get(key).map(|e| e.value.clone());
        if value.is_some() {
            Self::touch(&mut inner, key);
        }
        value
    }

    async fn set(&self, key: String, value: NormalizedResponse, ttl_override: Option<Duration>) {
        if !self.enabled {
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        let max_size = self.max_size;

        if !inner.entries.contains_key(&key) {
            Self::evict_if_needed(&mut inner, max_size);
        }

        let entry = CacheEntry {
            key: key.clone(),
            value,
            inserted_at: SystemTime::now(),
            ttl: ttl_override.unwrap_or(self.default_ttl),
        };
        inner.entries.insert(key.clone(), entry);
        Self::touch(&mut inner, &key);
    }

    async fn delete(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(key);
        if let Some(pos) = inner.lru.iter().position(|k| k == key) {
            inner.lru.remove(pos);
        }
    }

    async fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.lru.clear();
    }

    async fn size(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.lock().unwrap().entries.len(),
            enabled: self.enabled,
            ttl_secs: self.default_ttl.as_secs(),
        }
    }
}

/// A cache that never stores anything, used when `CacheStrategy::None` is
/// configured (`cache: false`).
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Option<NormalizedResponse> {
        None
    }
    async fn set(&self, _key: String, _value: NormalizedResponse, _ttl_override: Option<Duration>) {}
    async fn delete(&self, _key: &str) {}
    async fn clear(&self) {}
    async fn size(&self) -> usize {
        0
    }
    fn stats(&self) -> CacheStats {
        CacheStats {
            size: 0,
            enabled: false,
            ttl_secs: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use pretty_assertions::assert_eq;

    fn sample(source: &str) -> NormalizedResponse {
        NormalizedResponse::Asn {
            query: Query::Asn(1),
            envelope: Envelope::default(),
            asn: AsnResponse::default(),
            metadata: Metadata {
                source: source.to_string(),
                timestamp: chrono::Utc::now(),
                cached: false,
            },
            raw: None,
        }
    }

    #[tokio::test]
    async fn get_set_roundtrip() {
        let cache = MemoryCache::new(true, Duration::from_secs(60), 10);
        let stored = sample("https://x.test");
        cache.set("k".into(), stored.clone(), None).await;
        let got = cache.get("k").await.unwrap();
        assert_eq!(got, stored);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let cache = MemoryCache::new(true, Duration::from_millis(1), 10);
        cache.set("k".into(), sample("https://x.test"), None).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn lru_evicts_least_recently_read() {
        let cache = MemoryCache::new(true, Duration::from_secs(60), 2);
        cache.set("a".into(), sample("https://a.test"), None).await;
        cache.set("b".into(), sample("https://b.test"), None).await;
        // Touch "a" so "b" becomes the least-recently-used.
        cache.get("a").await;
        cache.set("c".into(), sample("https://c.test"), None).await;

        assert!(cache.get("b").await.is_none());
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn disabled_cache_never_stores() {
        let cache = MemoryCache::new(false, Duration::from_secs(60), 10);
        cache.set("k".into(), sample("https://x.test"), None).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn ttl_override_applies_per_entry() {
        let cache = MemoryCache::new(true, Duration::from_secs(3600), 10);
        cache
            .set("neg".into(), sample("https://x.test"), Some(Duration::from_millis(1)))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("neg").await.is_none());
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let cache = MemoryCache::new(true, Duration::from_secs(60), 10);
        cache.set("k".into(), sample("https://x.test"), None).await;
        cache.clear().await;
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn noop_cache_never_returns_a_hit() {
        let cache = NoopCache;
        cache.set("k".into(), sample("https://x.test"), None).await;
        assert!(cache.get("k").await.is_none());
    }
}
