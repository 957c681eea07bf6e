// External price-quote provider boundary

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    error::ProviderError,
    model::{QueryKey, SeatClass},
    parsing::digits_in,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
    pub seat_class: SeatClass,
    pub passengers: u32,
}

impl From<&QueryKey> for ProviderRequest {
    fn from(key: &QueryKey) -> Self {
        Self {
            origin: key.origin.clone(),
            destination: key.destination.clone(),
            date: key.date,
            seat_class: key.seat_class,
            passengers: key.passengers,
        }
    }
}

// Stop count as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCount {
    Count(u32),
    Text(String),
}

impl StopCount {
    /// Descriptive counts keep their digits ("2 stops" -> 2); text
    /// without digits is treated as one stop.
    pub fn normalized(&self) -> u32 {
        match self {
            StopCount::Count(n) => *n,
            StopCount::Text(text) => digits_in(text).unwrap_or(1),
        }
    }
}

/// One raw fare as returned by the provider. Every field is optional so a
/// provider that omits something never breaks a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOffer {
    pub price: Option<String>,
    pub stops: Option<StopCount>,
    pub carrier: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub duration: Option<String>,
}

impl RawOffer {
    pub fn stop_count(&self) -> u32 {
        self.stops.as_ref().map(StopCount::normalized).unwrap_or(1)
    }
}

#[async_trait]
pub trait QuoteProvider: Send + Sync + 'static {
    async fn fetch_quotes(&self, request: &ProviderRequest) -> Result<Vec<RawOffer>, ProviderError>;
}

// Scriptable provider used by tests and benches
pub mod mock_provider {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    type Route = (String, String);

    #[derive(Debug, Clone)]
    pub enum ScriptedFailure {
        Timeout,
        Fatal(String),
    }

    #[derive(Default)]
    pub struct MockProvider {
        routes: Mutex<HashMap<Route, Vec<RawOffer>>>,
        dated_routes: Mutex<HashMap<(String, String, NaiveDate), Vec<RawOffer>>>,
        failures: Mutex<HashMap<Route, Vec<ScriptedFailure>>>,
        calls: Mutex<HashMap<Route, usize>>,
        request_count: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay_ms: AtomicUsize,
    }

    fn route(origin: &str, destination: &str) -> Route {
        (origin.to_uppercase(), destination.to_uppercase())
    }

    pub fn offer(price: &str, stops: u32, carrier: &str) -> RawOffer {
        RawOffer {
            price: Some(price.to_string()),
            stops: Some(StopCount::Count(stops)),
            carrier: Some(carrier.to_string()),
            departure: Some("8:00 AM on Sun, Apr 19".to_string()),
            arrival: Some("10:00 AM on Sun, Apr 19".to_string()),
            duration: Some("2 hr".to_string()),
        }
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_delay(&self, delay_ms: usize) {
            self.delay_ms.store(delay_ms, Ordering::SeqCst);
        }

        /// Offers served for the route on every date.
        pub fn add_route(&self, origin: &str, destination: &str, offers: Vec<RawOffer>) {
            self.routes.lock().insert(route(origin, destination), offers);
        }

        /// A single direct fare for the route, priced in euros.
        pub fn add_fare(&self, origin: &str, destination: &str, price: f64) {
            self.add_route(origin, destination, vec![offer(&format!("€{price}"), 0, "MockAir")]);
        }

        /// Offers served for the route on one date only; takes precedence over `add_route`.
        pub fn add_dated_route(
            &self,
            origin: &str,
            destination: &str,
            date: NaiveDate,
            offers: Vec<RawOffer>,
        ) {
            let (o, d) = route(origin, destination);
            self.dated_routes.lock().insert((o, d, date), offers);
        }

        /// Failures returned, in order, by the next calls for the route.
        pub fn fail_next(&self, origin: &str, destination: &str, failures: Vec<ScriptedFailure>) {
            self.failures.lock().insert(route(origin, destination), failures);
        }

        pub fn request_count(&self) -> usize {
            self.request_count.load(Ordering::SeqCst)
        }

        pub fn calls_for(&self, origin: &str, destination: &str) -> usize {
            self.calls
                .lock()
                .get(&route(origin, destination))
                .copied()
                .unwrap_or(0)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn next_failure(&self, key: &Route) -> Option<ScriptedFailure> {
            let mut failures = self.failures.lock();
            let queue = failures.get_mut(key)?;
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        }
    }

    #[async_trait]
    impl QuoteProvider for MockProvider {
        async fn fetch_quotes(&self, request: &ProviderRequest) -> Result<Vec<RawOffer>, ProviderError> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            let key = route(&request.origin, &request.destination);
            *self.calls.lock().entry(key.clone()).or_insert(0) += 1;

            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(failure) = self.next_failure(&key) {
                return Err(match failure {
                    ScriptedFailure::Timeout => ProviderError::from_message(
                        "Timeout 30000ms exceeded in wait_for(results)",
                    ),
                    ScriptedFailure::Fatal(message) => ProviderError::from_message(message),
                });
            }

            let dated = (key.0.clone(), key.1.clone(), request.date);
            if let Some(offers) = self.dated_routes.lock().get(&dated) {
                return Ok(offers.clone());
            }
            Ok(self.routes.lock().get(&key).cloned().unwrap_or_default())
        }
    }
}
