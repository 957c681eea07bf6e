// Shared data model: query keys, quotes, legs and assembled trips

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::parsing::is_valid_price;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeatClass {
    #[default]
    Economy,
    PremiumEconomy,
    Business,
    First,
}

impl SeatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatClass::Economy => "economy",
            SeatClass::PremiumEconomy => "premium-economy",
            SeatClass::Business => "business",
            SeatClass::First => "first",
        }
    }
}

impl fmt::Display for SeatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Offer-level filters applied to every provider result and every cache hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferFilters {
    pub direct_only: bool,
    pub include_airlines: Vec<String>,
    pub exclude_airlines: Vec<String>,
}

impl OfferFilters {
    pub fn accepts(&self, stops: u32, carrier: Option<&str>) -> bool {
        if self.direct_only && stops != 0 {
            return false;
        }
        if !self.include_airlines.is_empty()
            && !carrier.is_some_and(|c| self.include_airlines.iter().any(|a| a == c))
        {
            return false;
        }
        if carrier.is_some_and(|c| self.exclude_airlines.iter().any(|a| a == c)) {
            return false;
        }
        true
    }
}

/// Per-request settings that become part of every query key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub passengers: u32,
    pub seat_class: SeatClass,
    pub filters: OfferFilters,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            passengers: 1,
            seat_class: SeatClass::Economy,
            filters: OfferFilters::default(),
        }
    }
}

// Normalized identity of a single-leg price lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
    pub passengers: u32,
    pub seat_class: SeatClass,
    pub direct_only: bool,
    pub include_airlines: Vec<String>,
    pub exclude_airlines: Vec<String>,
}

fn sorted_unique(airlines: &[String]) -> Vec<String> {
    let mut airlines: Vec<String> = airlines.iter().map(|a| a.trim().to_string()).collect();
    airlines.sort();
    airlines.dedup();
    airlines
}

impl QueryKey {
    pub fn new(origin: &str, destination: &str, date: NaiveDate, options: &SearchOptions) -> Self {
        Self {
            origin: origin.trim().to_uppercase(),
            destination: destination.trim().to_uppercase(),
            date,
            passengers: options.passengers.max(1),
            seat_class: options.seat_class,
            direct_only: options.filters.direct_only,
            include_airlines: sorted_unique(&options.filters.include_airlines),
            exclude_airlines: sorted_unique(&options.filters.exclude_airlines),
        }
    }

    /// Persisted cache layout key: `{origin}:{destination}:{date}:{passengers}:{seatClass}`.
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.origin, self.destination, self.date, self.passengers, self.seat_class
        )
    }

    pub fn filters(&self) -> OfferFilters {
        OfferFilters {
            direct_only: self.direct_only,
            include_airlines: self.include_airlines.clone(),
            exclude_airlines: self.exclude_airlines.clone(),
        }
    }

    pub fn route(&self) -> String {
        format!("{}->{}", self.origin, self.destination)
    }
}

/// The cheapest (or one of several) offers found for a single leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
    pub display_price: String,
    pub numeric_price: f64,
    pub stops: u32,
    pub carrier: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub duration: Option<String>,
    pub booking_link: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
}

impl Quote {
    pub fn is_valid(&self) -> bool {
        is_valid_price(self.numeric_price)
    }
}

// One flight segment of an assembled trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
    pub price: String,
    pub numeric_price: f64,
    pub stops: u32,
    pub carrier: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub duration: Option<String>,
    pub booking_link: Option<String>,
}

impl From<&Quote> for Leg {
    fn from(quote: &Quote) -> Self {
        Self {
            origin: quote.origin.clone(),
            destination: quote.destination.clone(),
            date: quote.date,
            price: quote.display_price.clone(),
            numeric_price: quote.numeric_price,
            stops: quote.stops,
            carrier: quote.carrier.clone(),
            departure: quote.departure.clone(),
            arrival: quote.arrival.clone(),
            duration: quote.duration.clone(),
            booking_link: quote.booking_link.clone(),
        }
    }
}

/// A multi-city loop built by the odyssey search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Itinerary {
    pub total_price: f64,
    pub origin: String,
    pub return_destination: String,
    pub legs: Vec<Leg>,
    pub cached: bool,
    pub warning: Option<String>,
}

/// A one-way, round-trip or anywhere result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripOption {
    pub total_price: f64,
    pub legs: Vec<Leg>,
}

impl TripOption {
    pub fn new(legs: Vec<Leg>) -> Self {
        let total_price = legs.iter().map(|leg| leg.numeric_price).sum();
        Self { total_price, legs }
    }
}

/// A discovered quote remembering which requested origin it descends from.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub quote: Quote,
    pub search_origin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    OneWay,
    RoundTrip,
    Anywhere,
}

/// Guidance returned when a budget filtered out every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoResultHint {
    pub reason: String,
    pub cheapest_total: f64,
    pub closest_alternatives: Vec<TripOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicSearchResult {
    pub mode: SearchMode,
    pub results: Vec<TripOption>,
    pub no_result_hint: Option<NoResultHint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 19).unwrap()
    }

    #[test]
    fn test_query_key_normalization() {
        let a = SearchOptions {
            filters: OfferFilters {
                include_airlines: vec!["Vueling".into(), "Air France".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let b = SearchOptions {
            filters: OfferFilters {
                include_airlines: vec!["Air France".into(), "Vueling".into()],
                ..Default::default()
            },
            ..Default::default()
        };

        let k1 = QueryKey::new("lys", " bcn", date(), &a);
        let k2 = QueryKey::new("LYS", "BCN", date(), &b);
        assert_eq!(k1, k2);
        assert_eq!(k1.cache_key(), "LYS:BCN:2026-04-19:1:economy");
    }

    #[test]
    fn test_filters() {
        let filters = OfferFilters {
            direct_only: true,
            include_airlines: vec![],
            exclude_airlines: vec!["Ryanair".into()],
        };
        assert!(filters.accepts(0, Some("easyJet")));
        assert!(filters.accepts(0, None));
        assert!(!filters.accepts(1, Some("easyJet")));
        assert!(!filters.accepts(0, Some("Ryanair")));

        let only = OfferFilters {
            include_airlines: vec!["Iberia".into()],
            ..Default::default()
        };
        assert!(only.accepts(2, Some("Iberia")));
        assert!(!only.accepts(0, None));
    }
}
