// SQLite backed quote cache that survives process restarts

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    cache::{is_expired_at, CacheConfig, CacheStats, QuoteCache},
    error::CacheError,
    model::{QueryKey, Quote},
};

/// Persisted cache, one row per key:
/// `key -> (price_str, numeric_price, flight_json, timestamp)`.
///
/// The store is opened explicitly and handed to the fetcher; `close` ends
/// its lifecycle. After `close`, reads are misses and writes are dropped.
pub struct SqliteQuoteCache {
    conn: Mutex<Option<Connection>>,
    ttl: Duration,
    cache_stats: Arc<RwLock<CacheStats>>,
}

struct CachedRow {
    numeric_price: Option<f64>,
    flight_json: String,
    timestamp: f64,
}

impl SqliteQuoteCache {
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        let path = Path::new(&config.database_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, config.ttl())
    }

    pub fn open_in_memory(ttl: Duration) -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?, ttl)
    }

    fn from_connection(conn: Connection, ttl: Duration) -> Result<Self, CacheError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS flights (
                key TEXT PRIMARY KEY,
                price_str TEXT,
                numeric_price REAL,
                flight_json TEXT,
                timestamp REAL
            )",
            [],
        )?;

        // Rows written before validation existed may carry unusable prices
        let purged = conn.execute(
            "DELETE FROM flights
             WHERE numeric_price IS NULL OR numeric_price <= 0 OR numeric_price >= 9e999",
            [],
        )?;
        if purged > 0 {
            tracing::info!("Purged {} cached quotes with invalid prices", purged);
        }

        let cache_stats = CacheStats {
            purged_count: purged,
            ..Default::default()
        };

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            ttl,
            cache_stats: Arc::new(RwLock::new(cache_stats)),
        })
    }

    pub fn close(&self) -> Result<(), CacheError> {
        match self.conn.lock().take() {
            Some(conn) => conn.close().map_err(|(_, e)| CacheError::Database(e)),
            None => Err(CacheError::Closed),
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn read_row(&self, cache_key: &str) -> anyhow::Result<Option<CachedRow>> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().context("cache store is closed")?;
        let row = conn
            .query_row(
                "SELECT numeric_price, flight_json, timestamp FROM flights WHERE key = ?1",
                params![cache_key],
                |row| {
                    Ok(CachedRow {
                        numeric_price: row.get(0)?,
                        flight_json: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("reading cache row {cache_key}"))?;
        Ok(row)
    }

    fn write_row(&self, cache_key: &str, quote: &Quote) -> anyhow::Result<()> {
        let flight_json = serde_json::to_string(quote).context("serializing quote")?;
        let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;

        let guard = self.conn.lock();
        let conn = guard.as_ref().context("cache store is closed")?;
        conn.execute(
            "INSERT OR REPLACE INTO flights VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cache_key,
                quote.display_price,
                quote.numeric_price,
                flight_json,
                timestamp
            ],
        )
        .with_context(|| format!("writing cache row {cache_key}"))?;
        Ok(())
    }

    fn count_rows(&self) -> usize {
        let guard = self.conn.lock();
        guard
            .as_ref()
            .and_then(|conn| {
                conn.query_row("SELECT COUNT(*) FROM flights", [], |row| row.get::<_, i64>(0))
                    .ok()
            })
            .map(|n| n as usize)
            .unwrap_or(0)
    }
}

impl QuoteCache for SqliteQuoteCache {
    fn get(&self, key: &QueryKey) -> Option<Quote> {
        let row = match self.read_row(&key.cache_key()) {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.cache_stats.write().miss_count += 1;
                return None;
            }
            Err(e) => {
                tracing::warn!("Cache read error: {:#}", e);
                self.cache_stats.write().miss_count += 1;
                return None;
            }
        };

        let inserted_at_ms = (row.timestamp * 1000.0) as i64;
        if is_expired_at(inserted_at_ms, self.ttl, Utc::now()) {
            let mut stats = self.cache_stats.write();
            stats.expired_count += 1;
            stats.miss_count += 1;
            return None;
        }

        let quote: Quote = match serde_json::from_str(&row.flight_json) {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!("Cache decode error for {}: {}", key.cache_key(), e);
                self.cache_stats.write().miss_count += 1;
                return None;
            }
        };

        if !row.numeric_price.is_some_and(crate::parsing::is_valid_price) || !quote.is_valid() {
            self.cache_stats.write().rejected_count += 1;
            return None;
        }

        self.cache_stats.write().hit_count += 1;
        Some(quote)
    }

    fn put(&self, key: &QueryKey, quote: &Quote) {
        if !quote.is_valid() {
            self.cache_stats.write().rejected_count += 1;
            return;
        }

        let mut stored = quote.clone();
        stored.from_cache = false;
        match self.write_row(&key.cache_key(), &stored) {
            Ok(()) => self.cache_stats.write().write_count += 1,
            Err(e) => tracing::warn!("Cache write error: {:#}", e),
        }
    }

    fn stats(&self) -> CacheStats {
        let mut stats = self.cache_stats.read().clone();
        stats.items_count = self.count_rows();
        stats
    }
}
