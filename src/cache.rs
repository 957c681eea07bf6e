// Expiring quote cache
// Every lookup that reaches the provider goes through this store first

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::model::{QueryKey, Quote};

pub const DEFAULT_TTL_SECONDS: u64 = 6 * 3600;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStats {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub rejected_count: usize,
    pub write_count: usize,
    pub purged_count: usize,
}

// Cache configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub database_path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            database_path: "flights_cache.db".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

// Quote cache seam. Implementations must never fail a search: read problems
// are misses and write problems are dropped.
pub trait QuoteCache: Send + Sync + 'static {
    // Cached quote for the key, if present and younger than the TTL
    fn get(&self, key: &QueryKey) -> Option<Quote>;

    // Upsert, last write wins
    fn put(&self, key: &QueryKey, quote: &Quote);

    fn stats(&self) -> CacheStats;
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub quote: Quote,
    pub inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: QueryKey, quote: Quote) -> Self {
        Self {
            key,
            quote,
            inserted_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        is_expired_at(self.inserted_at.timestamp_millis(), ttl, now)
    }
}

/// `now - inserted_at >= ttl`, with timestamps in unix milliseconds.
pub(crate) fn is_expired_at(inserted_at_ms: i64, ttl: Duration, now: DateTime<Utc>) -> bool {
    let age_ms = now.timestamp_millis().saturating_sub(inserted_at_ms);
    age_ms >= i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// In-memory cache keyed by the persisted cache-key layout. Expired entries
/// are left in place and only reported as misses.
#[derive(Default)]
pub struct TtlQuoteCache {
    store: DashMap<String, CacheEntry>,
    ttl: Duration,
    cache_stats: Arc<RwLock<CacheStats>>,
}

impl TtlQuoteCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(config.ttl())
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl QuoteCache for TtlQuoteCache {
    fn get(&self, key: &QueryKey) -> Option<Quote> {
        let Some(entry) = self.store.get(&key.cache_key()) else {
            self.cache_stats.write().miss_count += 1;
            return None;
        };

        if entry.is_expired(self.ttl, Utc::now()) {
            let mut stats = self.cache_stats.write();
            stats.expired_count += 1;
            stats.miss_count += 1;
            return None;
        }

        if !entry.quote.is_valid() {
            self.cache_stats.write().rejected_count += 1;
            return None;
        }

        self.cache_stats.write().hit_count += 1;
        Some(entry.quote.clone())
    }

    fn put(&self, key: &QueryKey, quote: &Quote) {
        if !quote.is_valid() {
            self.cache_stats.write().rejected_count += 1;
            return;
        }

        let entry = CacheEntry::new(key.clone(), quote.clone());
        self.store.insert(key.cache_key(), entry);
        self.cache_stats.write().write_count += 1;
    }

    fn stats(&self) -> CacheStats {
        let mut stats = self.cache_stats.read().clone();
        stats.items_count = self.store.len();
        stats
    }
}
