// Bounded, retrying, coalesced access to the quote provider

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::NaiveDate;
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    cache::QuoteCache,
    coalesce::{CoalesceRole, RequestCoalescer},
    error::ProviderError,
    model::{QueryKey, Quote},
    parsing::valid_price,
    provider::{ProviderRequest, QuoteProvider, RawOffer},
    trace::{TraceEvent, TraceSink},
};

/// Limiter size for a stage: grows with the search width, capped so wide
/// searches do not flood the provider.
pub fn compute_concurrency(search_width: usize, max_concurrency: usize) -> usize {
    (search_width / 2 + 1).min(max_concurrency).max(1)
}

/// Caps how many provider calls one stage may have outstanding.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl ConcurrencyLimiter {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn for_width(search_width: usize, max_concurrency: usize) -> Self {
        Self::new(compute_concurrency(search_width, max_concurrency))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    // The semaphore is never closed, so this only yields None if that changes
    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }
}

// Retry configuration for transient provider failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 2,
            backoff_base_ms: 750,
            max_backoff_ms: 30_000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    // base * 2^attempt, capped, plus optional jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_backoff_ms = (self.backoff_base_ms as f64 * 2f64.powi(attempt as i32))
            .min(self.max_backoff_ms as f64);
        let jitter = rand::random::<f64>() * self.jitter_factor * base_backoff_ms;
        Duration::from_millis((base_backoff_ms + jitter) as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub retry: RetryConfig,
    pub booking_link_base: String,
    pub language: String,
    pub currency: String,
    pub country: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            booking_link_base: "https://www.google.com/travel/flights".to_string(),
            language: "en".to_string(),
            currency: "EUR".to_string(),
            country: "fr".to_string(),
        }
    }
}

impl FetcherConfig {
    /// One-way search URL for the leg, used as the purchase link.
    pub fn booking_link(&self, origin: &str, destination: &str, date: NaiveDate) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("hl", &self.language)
            .append_pair("curr", &self.currency)
            .append_pair("gl", &self.country)
            .append_pair(
                "q",
                &format!("Flights from {origin} to {destination} on {date}"),
            )
            .finish();
        format!("{}?{}", self.booking_link_base, query)
    }
}

#[derive(Debug, Default)]
pub struct FetcherStats {
    pub cache_hits: AtomicUsize,
    pub cache_misses: AtomicUsize,
    pub cache_drops: AtomicUsize,
    pub inflight_waits: AtomicUsize,
    pub provider_calls: AtomicUsize,
    pub retries: AtomicUsize,
    pub timeouts: AtomicUsize,
    pub errors: AtomicUsize,
    pub quotes_selected: AtomicUsize,
}

#[derive(Clone)]
struct FetchWorker {
    provider: Arc<dyn QuoteProvider>,
    cache: Arc<dyn QuoteCache>,
    config: Arc<FetcherConfig>,
    stats: Arc<FetcherStats>,
    trace: TraceSink,
}

/// Cache-first, coalesced, concurrency-limited and retrying quote lookups.
/// Every failure degrades to "no quote"; nothing here returns an error.
#[derive(Clone)]
pub struct BoundedFetcher {
    worker: FetchWorker,
    coalescer: Arc<RequestCoalescer<QueryKey, Option<Quote>>>,
}

impl BoundedFetcher {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        cache: Arc<dyn QuoteCache>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            worker: FetchWorker {
                provider,
                cache,
                config: Arc::new(config),
                stats: Arc::new(FetcherStats::default()),
                trace: TraceSink::disabled(),
            },
            coalescer: Arc::new(RequestCoalescer::new()),
        }
    }

    pub fn with_trace(mut self, trace: TraceSink) -> Self {
        self.worker.trace = trace;
        self
    }

    pub fn trace(&self) -> &TraceSink {
        &self.worker.trace
    }

    pub fn stats(&self) -> &FetcherStats {
        &self.worker.stats
    }

    pub fn cache(&self) -> &Arc<dyn QuoteCache> {
        &self.worker.cache
    }

    pub fn coalescer(&self) -> &RequestCoalescer<QueryKey, Option<Quote>> {
        &self.coalescer
    }

    /// Cheapest acceptable quote for the key.
    pub async fn fetch(
        &self,
        key: &QueryKey,
        limiter: &ConcurrencyLimiter,
        label: &'static str,
    ) -> Option<Quote> {
        if let Some(cached) = self.worker.cache.get(key) {
            return self.worker.accept_cached(key, cached, label);
        }

        self.worker.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.worker.trace.emit(TraceEvent::CacheMiss {
            label,
            route: key.route(),
        });

        let worker = self.worker.clone();
        let owned_key = key.clone();
        let limiter = limiter.clone();
        let (quote, role) = self
            .coalescer
            .get_or_create(key.clone(), move || {
                worker.fetch_and_cache(owned_key, limiter, label)
            })
            .await;

        if role == CoalesceRole::Follower {
            self.worker.stats.inflight_waits.fetch_add(1, Ordering::Relaxed);
            self.worker.trace.emit(TraceEvent::InflightWait {
                label,
                route: key.route(),
            });
        }
        quote
    }

    /// Every acceptable offer for the key, in provider order. Bypasses the
    /// cache, which only remembers the cheapest offer.
    pub async fn fetch_options(
        &self,
        key: &QueryKey,
        limiter: &ConcurrencyLimiter,
        label: &'static str,
    ) -> Vec<Quote> {
        let _permit = limiter.acquire().await;
        let request = ProviderRequest::from(key);
        match self.worker.request_with_retry(&request, key, label).await {
            Ok(offers) => self.worker.acceptable_quotes(key, &offers, label),
            Err(_) => Vec::new(),
        }
    }
}

impl FetchWorker {
    fn accept_cached(&self, key: &QueryKey, mut cached: Quote, label: &'static str) -> Option<Quote> {
        if !cached.is_valid() {
            self.drop_cached(key, label, format!("invalid price={}", cached.numeric_price));
            return None;
        }
        // The persisted key ignores filters, so a hit must pass this call's filters
        if !key.filters().accepts(cached.stops, cached.carrier.as_deref()) {
            self.drop_cached(key, label, "rejected by filters".to_string());
            return None;
        }

        if cached.booking_link.is_none() {
            cached.booking_link = Some(self.config.booking_link(&key.origin, &key.destination, key.date));
        }
        cached.from_cache = true;

        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.trace.emit(TraceEvent::CacheHit {
            label,
            route: key.route(),
            price: cached.numeric_price,
        });
        Some(cached)
    }

    fn drop_cached(&self, key: &QueryKey, label: &'static str, reason: String) {
        self.stats.cache_drops.fetch_add(1, Ordering::Relaxed);
        self.trace.emit(TraceEvent::CacheDrop {
            label,
            route: key.route(),
            reason,
        });
    }

    async fn fetch_and_cache(
        self,
        key: QueryKey,
        limiter: ConcurrencyLimiter,
        label: &'static str,
    ) -> Option<Quote> {
        let _permit = limiter.acquire().await;

        let request = ProviderRequest::from(&key);
        let offers = self.request_with_retry(&request, &key, label).await.ok()?;
        if offers.is_empty() {
            return None;
        }

        let candidates = self.acceptable_quotes(&key, &offers, label);

        // first minimum wins on ties
        let cheapest = candidates
            .into_iter()
            .reduce(|best, quote| if quote.numeric_price < best.numeric_price { quote } else { best });

        let Some(cheapest) = cheapest else {
            self.trace.emit(TraceEvent::FetchDrop {
                label,
                route: key.route(),
                reason: "no valid flights after filters".to_string(),
            });
            return None;
        };

        self.cache.put(&key, &cheapest);
        self.stats.quotes_selected.fetch_add(1, Ordering::Relaxed);
        self.trace.emit(TraceEvent::FetchPick {
            label,
            route: key.route(),
            price: cheapest.numeric_price,
            raw: cheapest.display_price.clone(),
        });
        Some(cheapest)
    }

    async fn request_with_retry(
        &self,
        request: &ProviderRequest,
        key: &QueryKey,
        label: &'static str,
    ) -> Result<Vec<RawOffer>, ProviderError> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            self.stats.provider_calls.fetch_add(1, Ordering::Relaxed);
            match self.provider.fetch_quotes(request).await {
                Ok(offers) => return Ok(offers),
                Err(err) if err.is_retryable() && attempt < retry.retry_attempts => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    self.trace.emit(TraceEvent::FetchRetry {
                        label,
                        route: key.route(),
                        attempt: attempt + 1,
                    });
                    tokio::time::sleep(retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Search timed out for {}", key.route());
                        self.trace.emit(TraceEvent::FetchTimeout {
                            label,
                            route: key.route(),
                        });
                    } else {
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Error checking {}: {}", key.route(), err);
                        self.trace.emit(TraceEvent::FetchError {
                            label,
                            route: key.route(),
                            error: err.to_string(),
                        });
                    }
                    return Err(err);
                }
            }
        }
    }

    // Valid, filter-passing offers converted to quotes, in provider order
    fn acceptable_quotes(&self, key: &QueryKey, offers: &[RawOffer], label: &'static str) -> Vec<Quote> {
        let filters = key.filters();
        let quotes: Vec<Quote> = offers
            .iter()
            .filter_map(|offer| self.to_quote(key, offer))
            .filter(|quote| filters.accepts(quote.stops, quote.carrier.as_deref()))
            .collect();

        self.trace.emit(TraceEvent::FetchOk {
            label,
            route: key.route(),
            total: offers.len(),
            valid: quotes.len(),
        });
        quotes
    }

    fn to_quote(&self, key: &QueryKey, offer: &RawOffer) -> Option<Quote> {
        let display_price = offer.price.as_deref()?;
        let numeric_price = valid_price(display_price)?;
        Some(Quote {
            origin: key.origin.clone(),
            destination: key.destination.clone(),
            date: key.date,
            display_price: display_price.to_string(),
            numeric_price,
            stops: offer.stop_count(),
            carrier: offer.carrier.clone(),
            departure: offer.departure.clone(),
            arrival: offer.arrival.clone(),
            duration: offer.duration.clone(),
            booking_link: Some(self.config.booking_link(&key.origin, &key.destination, key.date)),
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, TtlQuoteCache};
    use crate::model::{OfferFilters, SearchOptions};
    use crate::provider::mock_provider::{offer, MockProvider, ScriptedFailure};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 19).unwrap()
    }

    fn fast_config() -> FetcherConfig {
        FetcherConfig {
            retry: RetryConfig {
                backoff_base_ms: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn cache() -> Arc<TtlQuoteCache> {
        Arc::new(TtlQuoteCache::new(&CacheConfig::default()))
    }

    fn fetcher_with(provider: Arc<MockProvider>, cache: Arc<TtlQuoteCache>) -> BoundedFetcher {
        BoundedFetcher::new(provider, cache, fast_config())
    }

    fn key(dest: &str) -> QueryKey {
        QueryKey::new("LYS", dest, date(), &SearchOptions::default())
    }

    #[test]
    fn test_compute_concurrency() {
        assert_eq!(compute_concurrency(0, 3), 1);
        assert_eq!(compute_concurrency(3, 3), 2);
        assert_eq!(compute_concurrency(15, 3), 3);
        assert_eq!(compute_concurrency(15, 0), 1);
        assert_eq!(ConcurrencyLimiter::for_width(6, 4).size(), 4);
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(0), Duration::from_millis(750));
        assert_eq!(retry.backoff(1), Duration::from_millis(1500));
        assert_eq!(retry.backoff(2), Duration::from_millis(3000));

        let capped = RetryConfig {
            max_backoff_ms: 1000,
            ..Default::default()
        };
        assert_eq!(capped.backoff(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_booking_link() {
        let link = FetcherConfig::default().booking_link("LYS", "BCN", date());
        assert!(link.starts_with("https://www.google.com/travel/flights?hl=en&curr=EUR&gl=fr&q="));
        assert!(link.contains("Flights+from+LYS+to+BCN+on+2026-04-19"));
    }

    #[tokio::test]
    async fn test_selects_first_cheapest_valid_offer_and_caches_it() {
        let provider = Arc::new(MockProvider::new());
        provider.add_route(
            "LYS",
            "BCN",
            vec![
                offer("Unavailable", 0, "Vueling"),
                offer("€0", 0, "Vueling"),
                offer("€120", 0, "Iberia"),
                offer("€80", 0, "Ryanair"),
                offer("€80", 1, "easyJet"),
            ],
        );
        let cache = cache();
        let fetcher = fetcher_with(provider.clone(), cache.clone());
        let limiter = ConcurrencyLimiter::new(2);

        let quote = fetcher.fetch(&key("BCN"), &limiter, "TEST").await.unwrap();
        assert_eq!(quote.numeric_price, 80.0);
        assert_eq!(quote.carrier.as_deref(), Some("Ryanair"));
        assert!(!quote.from_cache);
        assert!(quote.booking_link.is_some());

        // second lookup is served from cache
        let cached = fetcher.fetch(&key("BCN"), &limiter, "TEST").await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.numeric_price, 80.0);
        assert_eq!(provider.request_count(), 1);
        assert_eq!(fetcher.stats().cache_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filters_apply_to_provider_offers() {
        let provider = Arc::new(MockProvider::new());
        provider.add_route(
            "LYS",
            "BCN",
            vec![offer("€50", 1, "Ryanair"), offer("€70", 0, "Ryanair"), offer("€90", 0, "Vueling")],
        );
        let fetcher = fetcher_with(provider, cache());
        let options = SearchOptions {
            filters: OfferFilters {
                direct_only: true,
                include_airlines: vec![],
                exclude_airlines: vec!["Ryanair".into()],
            },
            ..Default::default()
        };
        let key = QueryKey::new("LYS", "BCN", date(), &options);

        let quote = fetcher
            .fetch(&key, &ConcurrencyLimiter::new(1), "TEST")
            .await
            .unwrap();
        assert_eq!(quote.numeric_price, 90.0);
    }

    #[tokio::test]
    async fn test_cached_quote_is_refiltered() {
        let provider = Arc::new(MockProvider::new());
        provider.add_route("LYS", "BCN", vec![offer("€40", 1, "Vueling")]);
        let cache = cache();
        let fetcher = fetcher_with(provider.clone(), cache);
        let limiter = ConcurrencyLimiter::new(1);

        assert!(fetcher.fetch(&key("BCN"), &limiter, "TEST").await.is_some());

        let direct = SearchOptions {
            filters: OfferFilters {
                direct_only: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let direct_key = QueryKey::new("LYS", "BCN", date(), &direct);
        assert!(fetcher.fetch(&direct_key, &limiter, "TEST").await.is_none());
        assert_eq!(provider.request_count(), 1);
        assert_eq!(fetcher.stats().cache_drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_hit_provider_once() {
        let provider = Arc::new(MockProvider::new());
        provider.add_fare("LYS", "BCN", 99.0);
        provider.set_delay(50);
        let fetcher = fetcher_with(provider.clone(), cache());
        let limiter = ConcurrencyLimiter::new(4);

        let shared_key = key("BCN");
        let lookups = (0..10).map(|_| fetcher.fetch(&shared_key, &limiter, "TEST"));
        let results = futures::future::join_all(lookups).await;

        assert_eq!(provider.request_count(), 1);
        let first = results[0].clone().unwrap();
        assert!(results.iter().all(|r| r.as_ref() == Some(&first)));
        assert_eq!(fetcher.stats().inflight_waits.load(Ordering::SeqCst), 9);
        assert_eq!(fetcher.coalescer().in_flight_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_concurrency_limit() {
        let provider = Arc::new(MockProvider::new());
        let destinations = ["BCN", "FCO", "AMS", "BER", "MAD", "LIS", "VIE", "PRG", "BUD", "ATH"];
        for dest in destinations {
            provider.add_fare("LYS", dest, 60.0);
        }
        provider.set_delay(30);
        let fetcher = fetcher_with(provider.clone(), cache());
        let limiter = ConcurrencyLimiter::new(3);

        let keys: Vec<QueryKey> = destinations.iter().map(|d| key(d)).collect();
        let lookups = keys.iter().map(|k| fetcher.fetch(k, &limiter, "TEST"));
        let results = futures::future::join_all(lookups).await;

        assert!(results.iter().all(Option::is_some));
        assert_eq!(provider.request_count(), destinations.len());
        assert!(provider.max_in_flight() <= 3);
        assert!(provider.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_then_success() {
        let provider = Arc::new(MockProvider::new());
        provider.add_fare("LYS", "BCN", 99.0);
        provider.fail_next("LYS", "BCN", vec![ScriptedFailure::Timeout, ScriptedFailure::Timeout]);
        let fetcher = fetcher_with(provider.clone(), cache());

        let quote = fetcher
            .fetch(&key("BCN"), &ConcurrencyLimiter::new(1), "TEST")
            .await;
        assert_eq!(quote.map(|q| q.numeric_price), Some(99.0));
        assert_eq!(provider.request_count(), 3);
        assert_eq!(fetcher.stats().retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_and_fatal_errors_yield_nothing() {
        let provider = Arc::new(MockProvider::new());
        provider.add_fare("LYS", "BCN", 99.0);
        provider.add_fare("LYS", "FCO", 59.0);
        provider.fail_next("LYS", "BCN", vec![ScriptedFailure::Timeout; 3]);
        provider.fail_next("LYS", "FCO", vec![ScriptedFailure::Fatal("HTTP 500".into())]);
        let fetcher = fetcher_with(provider.clone(), cache());
        let limiter = ConcurrencyLimiter::new(2);

        assert!(fetcher.fetch(&key("BCN"), &limiter, "TEST").await.is_none());
        assert_eq!(provider.calls_for("LYS", "BCN"), 3);
        assert_eq!(fetcher.stats().timeouts.load(Ordering::SeqCst), 1);

        // fatal errors are not retried
        assert!(fetcher.fetch(&key("FCO"), &limiter, "TEST").await.is_none());
        assert_eq!(provider.calls_for("LYS", "FCO"), 1);
        assert_eq!(fetcher.stats().errors.load(Ordering::SeqCst), 1);

        // failures are not cached, so the next call tries again
        assert!(fetcher.fetch(&key("FCO"), &limiter, "TEST").await.is_some());
    }

    #[tokio::test]
    async fn test_fetch_options_returns_every_valid_offer() {
        let provider = Arc::new(MockProvider::new());
        provider.add_route(
            "LYS",
            "BCN",
            vec![offer("€90", 0, "Vueling"), offer("Unavailable", 0, "Iberia"), offer("€70", 1, "Iberia")],
        );
        let fetcher = fetcher_with(provider, cache());

        let options = fetcher
            .fetch_options(&key("BCN"), &ConcurrencyLimiter::new(1), "TEST")
            .await;
        let prices: Vec<f64> = options.iter().map(|q| q.numeric_price).collect();
        assert_eq!(prices, vec![90.0, 70.0]);
    }
}
