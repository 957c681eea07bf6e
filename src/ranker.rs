// Filtering, de-duplication and ordering of assembled trips

use std::{cmp::Ordering, collections::HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    error::SearchError,
    model::{Leg, NoResultHint, TripOption},
    parsing::{parse_clock_minutes, parse_duration_minutes, parse_hhmm_minutes},
};

/// Rank given to a duration or clock that cannot be parsed.
pub const WORST_CASE_MINUTES: u64 = 1_000_000_000;

const HINT_ALTERNATIVES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Price,
    Duration,
    Stops,
    Departure,
}

impl From<&str> for SortKey {
    // Unknown keys fall back to price
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "duration" => SortKey::Duration,
            "stops" => SortKey::Stops,
            "departure" => SortKey::Departure,
            _ => SortKey::Price,
        }
    }
}

/// Time-of-day bounds on a leg, in minutes since midnight. A leg whose
/// clock cannot be parsed fails every bound that applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    pub depart_after: Option<u32>,
    pub depart_before: Option<u32>,
    pub arrive_before: Option<u32>,
}

impl TimeWindow {
    /// Builds a window from `HH:MM` bounds.
    pub fn from_clock(
        depart_after: Option<&str>,
        depart_before: Option<&str>,
        arrive_before: Option<&str>,
    ) -> Result<Self, SearchError> {
        let parse = |bound: Option<&str>| -> Result<Option<u32>, SearchError> {
            bound
                .map(|b| parse_hhmm_minutes(b).ok_or_else(|| SearchError::InvalidTime(b.to_string())))
                .transpose()
        };
        Ok(Self {
            depart_after: parse(depart_after)?,
            depart_before: parse(depart_before)?,
            arrive_before: parse(arrive_before)?,
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.depart_after.is_none() && self.depart_before.is_none() && self.arrive_before.is_none()
    }

    pub fn matches(&self, leg: &Leg) -> bool {
        let departure = parse_clock_minutes(leg.departure.as_deref());
        let arrival = parse_clock_minutes(leg.arrival.as_deref());

        if let Some(after) = self.depart_after {
            if !departure.is_some_and(|d| d >= after) {
                return false;
            }
        }
        if let Some(before) = self.depart_before {
            if !departure.is_some_and(|d| d <= before) {
                return false;
            }
        }
        if let Some(before) = self.arrive_before {
            if !arrival.is_some_and(|a| a <= before) {
                return false;
            }
        }
        true
    }
}

/// Identity of an offer for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OfferSignature {
    carrier: Option<String>,
    departure: Option<String>,
    arrival: Option<String>,
    duration: Option<String>,
    price: String,
    stops: u32,
}

pub fn offer_signature(leg: &Leg) -> OfferSignature {
    OfferSignature {
        carrier: leg.carrier.clone(),
        departure: leg.departure.clone(),
        arrival: leg.arrival.clone(),
        duration: leg.duration.clone(),
        price: leg.price.clone(),
        stops: leg.stops,
    }
}

pub fn trip_signature(trip: &TripOption) -> Vec<OfferSignature> {
    trip.legs.iter().map(offer_signature).collect()
}

/// Drops legs whose signature was already seen, keeping first occurrences.
pub fn dedup_legs(legs: Vec<Leg>) -> Vec<Leg> {
    let mut seen = HashSet::new();
    legs.into_iter()
        .filter(|leg| seen.insert(offer_signature(leg)))
        .collect()
}

pub fn dedup_trips(trips: Vec<TripOption>) -> Vec<TripOption> {
    let mut seen = HashSet::new();
    trips
        .into_iter()
        .filter(|trip| seen.insert(trip_signature(trip)))
        .collect()
}

fn total_duration(trip: &TripOption) -> u64 {
    trip.legs
        .iter()
        .map(|leg| {
            parse_duration_minutes(leg.duration.as_deref())
                .map(u64::from)
                .unwrap_or(WORST_CASE_MINUTES)
        })
        .sum()
}

fn total_stops(trip: &TripOption) -> u32 {
    trip.legs.iter().map(|leg| leg.stops).sum()
}

fn first_departure(trip: &TripOption) -> u64 {
    trip.legs
        .first()
        .and_then(|leg| parse_clock_minutes(leg.departure.as_deref()))
        .map(u64::from)
        .unwrap_or(WORST_CASE_MINUTES)
}

fn compare(a: &TripOption, b: &TripOption, key: SortKey) -> Ordering {
    match key {
        SortKey::Price => a.total_price.total_cmp(&b.total_price),
        SortKey::Duration => total_duration(a).cmp(&total_duration(b)),
        SortKey::Stops => total_stops(a).cmp(&total_stops(b)),
        SortKey::Departure => first_departure(a).cmp(&first_departure(b)),
    }
}

/// Stable sort, so equal keys keep their incoming order.
pub fn sort_trips(trips: &mut [TripOption], key: SortKey) {
    trips.sort_by(|a, b| compare(a, b, key));
}

/// Guidance built from trips that only failed the budget: the cheapest total
/// and the closest few alternatives.
pub fn budget_hint(mut over_budget: Vec<TripOption>) -> Option<NoResultHint> {
    sort_trips(&mut over_budget, SortKey::Price);
    let cheapest_total = over_budget.first()?.total_price;
    over_budget.truncate(HINT_ALTERNATIVES);
    Some(NoResultHint {
        reason: "budget".to_string(),
        cheapest_total,
        closest_alternatives: over_budget,
    })
}

/// Sorts and caps a result set. The hint is only offered when a budget
/// emptied the result set.
pub fn finish_ranking(
    mut results: Vec<TripOption>,
    over_budget: Vec<TripOption>,
    sort_by: SortKey,
    max_results: usize,
    budget: Option<f64>,
) -> (Vec<TripOption>, Option<NoResultHint>) {
    sort_trips(&mut results, sort_by);
    results.truncate(max_results);

    let hint = if results.is_empty() && budget.is_some() {
        budget_hint(over_budget)
    } else {
        None
    };
    (results, hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn leg(price: f64, departure: &str, duration: Option<&str>, stops: u32) -> Leg {
        Leg {
            origin: "LYS".into(),
            destination: "BCN".into(),
            date: NaiveDate::from_ymd_opt(2026, 4, 19).unwrap(),
            price: format!("€{price}"),
            numeric_price: price,
            stops,
            carrier: Some("Vueling".into()),
            departure: Some(departure.into()),
            arrival: Some("11:00 PM".into()),
            duration: duration.map(str::to_string),
            booking_link: None,
        }
    }

    fn trip(legs: Vec<Leg>) -> TripOption {
        TripOption::new(legs)
    }

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!(SortKey::from("Duration"), SortKey::Duration);
        assert_eq!(SortKey::from("stops"), SortKey::Stops);
        assert_eq!(SortKey::from("departure"), SortKey::Departure);
        assert_eq!(SortKey::from("cheapest"), SortKey::Price);
    }

    #[test]
    fn test_time_window() {
        let window = TimeWindow::from_clock(Some("08:00"), Some("12:00"), None).unwrap();
        assert!(window.matches(&leg(50.0, "9:15 AM on Sun, Apr 19", None, 0)));
        assert!(!window.matches(&leg(50.0, "7:59 AM", None, 0)));
        assert!(!window.matches(&leg(50.0, "1:00 PM", None, 0)));
        assert!(!window.matches(&leg(50.0, "whenever", None, 0)));

        let late = TimeWindow::from_clock(None, None, Some("22:00")).unwrap();
        assert!(!late.matches(&leg(50.0, "9:00 AM", None, 0)));

        assert!(TimeWindow::default().is_unbounded());
        assert!(TimeWindow::default().matches(&leg(50.0, "whenever", None, 0)));
        assert_eq!(
            TimeWindow::from_clock(Some("8h"), None, None),
            Err(SearchError::InvalidTime("8h".into()))
        );
    }

    #[test]
    fn test_dedup_by_signature() {
        let a = leg(50.0, "9:00 AM", Some("1 hr"), 0);
        let mut b = a.clone();
        b.booking_link = Some("https://example.test".into());
        let c = leg(55.0, "9:00 AM", Some("1 hr"), 0);

        // booking links are not part of the signature
        assert_eq!(dedup_legs(vec![a.clone(), b, c.clone()]).len(), 2);

        let trips = vec![
            trip(vec![a.clone(), c.clone()]),
            trip(vec![a.clone(), c.clone()]),
            trip(vec![c, a]),
        ];
        assert_eq!(dedup_trips(trips).len(), 2);
    }

    #[test]
    fn test_sort_keys() {
        let cheap_slow = trip(vec![leg(40.0, "6:00 PM", Some("5 hr"), 2)]);
        let mid_unknown = trip(vec![leg(60.0, "noon-ish", None, 1)]);
        let pricey_fast = trip(vec![leg(90.0, "7:00 AM", Some("1 hr 10 min"), 0)]);
        let mut trips = vec![mid_unknown.clone(), pricey_fast.clone(), cheap_slow.clone()];

        sort_trips(&mut trips, SortKey::Price);
        assert_eq!(trips[0], cheap_slow);

        sort_trips(&mut trips, SortKey::Duration);
        assert_eq!(trips, vec![pricey_fast.clone(), cheap_slow.clone(), mid_unknown.clone()]);

        sort_trips(&mut trips, SortKey::Stops);
        assert_eq!(trips[0], pricey_fast);

        sort_trips(&mut trips, SortKey::Departure);
        assert_eq!(trips, vec![pricey_fast, cheap_slow, mid_unknown]);
    }

    #[test]
    fn test_budget_hint_only_when_budget_empties_results() {
        let over: Vec<TripOption> = [300.0, 180.0, 250.0, 420.0]
            .iter()
            .map(|p| trip(vec![leg(*p, "9:00 AM", None, 0)]))
            .collect();

        let (results, hint) = finish_ranking(vec![], over.clone(), SortKey::Price, 10, Some(100.0));
        assert!(results.is_empty());
        let hint = hint.unwrap();
        assert_eq!(hint.reason, "budget");
        assert_eq!(hint.cheapest_total, 180.0);
        let totals: Vec<f64> = hint.closest_alternatives.iter().map(|t| t.total_price).collect();
        assert_eq!(totals, vec![180.0, 250.0, 300.0]);

        let kept = vec![trip(vec![leg(80.0, "9:00 AM", None, 0)])];
        let (results, hint) = finish_ranking(kept, over.clone(), SortKey::Price, 10, Some(100.0));
        assert_eq!(results.len(), 1);
        assert!(hint.is_none());

        assert!(finish_ranking(vec![], over, SortKey::Price, 10, None).1.is_none());
        assert!(budget_hint(vec![]).is_none());
    }
}
