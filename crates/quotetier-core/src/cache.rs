//! Hot tier: in-memory price cache with per-entry expiry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::{PricePoint, Ticker};

/// Cache key for the current price of `ticker`.
pub fn current_price_key(ticker: &Ticker) -> String {
    format!("price:current:{ticker}")
}

/// Lowest-latency tier contract.
pub trait HotCache: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Option<PricePoint>> + Send + 'a>>;

    /// Store `value` under `key`; `ttl` overrides the cache's default expiry.
    fn set<'a>(
        &'a self,
        key: String,
        value: PricePoint,
        ttl: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    fn invalidate<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// A cached point plus the absolute instant it stops being served.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: PricePoint,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<String, CacheEntry>,
    default_ttl: Duration,
    max_entries: usize,
}

impl CacheInner {
    fn get(&self, key: &str) -> Option<PricePoint> {
        let now = Instant::now();
        self.map
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    fn put(&mut self, key: String, value: PricePoint, ttl: Duration) {
        if !self.map.contains_key(&key) && self.map.len() >= self.max_entries {
            self.make_room();
        }
        let expires_at = Instant::now() + ttl;
        self.map.insert(key, CacheEntry { value, expires_at });
    }

    // Expired entries go first; if that frees nothing, the entry closest to
    // expiry is evicted.
    fn make_room(&mut self) {
        self.clear_expired();
        if self.map.len() < self.max_entries {
            return;
        }
        let victim = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        if let Some(victim) = victim {
            self.map.remove(&victim);
        }
    }

    fn clear_expired(&mut self) {
        let now = Instant::now();
        self.map.retain(|_, entry| entry.is_live(now));
    }
}

/// Thread-safe in-memory [`HotCache`].
#[derive(Debug, Clone)]
pub struct MemoryHotCache {
    inner: Arc<RwLock<CacheInner>>,
}

impl MemoryHotCache {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                map: HashMap::new(),
                default_ttl,
                max_entries: max_entries.max(1),
            })),
        }
    }

    /// A cache that stores nothing; every lookup misses.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 1)
    }

    pub async fn clear_expired(&self) {
        self.inner.write().await.clear_expired();
    }

    pub async fn clear(&self) {
        self.inner.write().await.map.clear();
    }

    /// Number of entries held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_disabled(&self) -> bool {
        self.inner.read().await.default_ttl.is_zero()
    }
}

impl HotCache for MemoryHotCache {
    fn get<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Option<PricePoint>> + Send + 'a>> {
        Box::pin(async move { self.inner.read().await.get(key) })
    }

    fn set<'a>(
        &'a self,
        key: String,
        value: PricePoint,
        ttl: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut store = self.inner.write().await;
            if store.default_ttl.is_zero() {
                return;
            }
            let ttl = ttl.unwrap_or(store.default_ttl);
            if ttl.is_zero() {
                store.map.remove(&key);
                return;
            }
            store.put(key, value, ttl);
        })
    }

    fn invalidate<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.inner.write().await.map.remove(key);
        })
    }
}
