//! Multi-city loop search.
//!
//! A run is a staged pipeline. Each stage takes the survivors of the previous
//! one, issues all of its lookups together (bounded by one shared limiter per
//! stage), waits for the whole batch and prunes before handing on:
//!
//! 1. broad discovery of first destinations from every origin
//! 2. onward destinations for every first candidate and first stay length
//! 3. return legs, skipped outright when the first two legs already use up
//!    the budget
//!
//! Every leg-level failure only removes its branch; a run fails as a whole
//! only on configuration problems.

use chrono::NaiveDate;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    airports::{airports_excluding, country_of, hub_of, Region},
    error::SearchError,
    fetcher::{BoundedFetcher, ConcurrencyLimiter},
    model::{Itinerary, Leg, QueryKey, Quote, SearchCandidate, SearchOptions},
    parsing::{add_days, parse_date},
    trace::TraceEvent,
};

/// Inclusive range of nights spent at a stop. A fixed stay has `min == max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    pub min: u32,
    pub max: u32,
}

impl StayRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn fixed(days: u32) -> Self {
        Self::new(days, days)
    }

    pub fn days(&self) -> std::ops::RangeInclusive<u32> {
        self.min..=self.max
    }

    fn validate(&self) -> Result<(), SearchError> {
        if self.min > self.max {
            return Err(SearchError::InvalidStayRange {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

impl Default for StayRange {
    fn default() -> Self {
        Self::fixed(2)
    }
}

// Breadth and concurrency knobs for a loop search
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OdysseyConfig {
    pub limit_per_leg: usize,
    pub max_itineraries: usize,
    pub discovery_max_concurrency: usize,
    pub return_max_concurrency: usize,
    /// Fixed limiter size for every stage, overriding the width based sizing.
    pub search_concurrency: Option<usize>,
    pub step1_multiplier: f64,
    pub max_second_leg_per_first: Option<usize>,
    pub early_return_buffer: f64,
    pub debug: bool,
}

impl Default for OdysseyConfig {
    fn default() -> Self {
        Self {
            limit_per_leg: 3,
            max_itineraries: 10,
            discovery_max_concurrency: 3,
            return_max_concurrency: 4,
            search_concurrency: None,
            step1_multiplier: 1.0,
            max_second_leg_per_first: None,
            early_return_buffer: 0.0,
            debug: false,
        }
    }
}

impl OdysseyConfig {
    /// Destinations probed per origin in the first stage.
    pub fn step1_width(&self, limit: usize) -> usize {
        let widened = (2 * limit) as f64 * self.step1_multiplier.max(0.0);
        (widened.ceil() as usize).max(4)
    }

    fn stage_limiter(&self, width: usize, max_concurrency: usize) -> ConcurrencyLimiter {
        match self.search_concurrency {
            Some(fixed) => ConcurrencyLimiter::new(fixed),
            None => ConcurrencyLimiter::for_width(width, max_concurrency),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OdysseyRequest {
    pub origins: Vec<String>,
    pub start_date: String,
    pub stay1: StayRange,
    pub stay2: StayRange,
    pub region: Region,
    pub excluded_countries: Vec<String>,
    pub excluded_airports: Vec<String>,
    pub force_different_countries: bool,
    /// Open-jaw: end the loop here instead of at the search origin.
    pub return_origin: Option<String>,
    pub options: SearchOptions,
    pub max_budget: Option<f64>,
    pub config: OdysseyConfig,
}

impl OdysseyRequest {
    pub fn new(origins: &[&str], start_date: &str) -> Self {
        Self {
            origins: origins.iter().map(|o| o.to_string()).collect(),
            start_date: start_date.to_string(),
            stay1: StayRange::default(),
            stay2: StayRange::default(),
            region: Region::named("Europe"),
            excluded_countries: Vec::new(),
            excluded_airports: Vec::new(),
            force_different_countries: false,
            return_origin: None,
            options: SearchOptions::default(),
            max_budget: None,
            config: OdysseyConfig::default(),
        }
    }

    // A zero or negative budget means no budget
    fn budget(&self) -> Option<f64> {
        self.max_budget.filter(|b| b.is_finite() && *b > 0.0)
    }
}

/// Per-stage counters for one run. Observability only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub step1_candidates: usize,
    pub step1_budget_pruned: usize,
    pub step2_tasks: usize,
    pub step2_candidates: usize,
    pub step3_return_tasks: usize,
    pub step3_budget_pruned: usize,
    pub step3_missing_return: usize,
    pub final_budget_pruned: usize,
    pub final_itineraries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OdysseyResult {
    pub itineraries: Vec<Itinerary>,
    pub debug_stats: Option<StageStats>,
}

/// Scope of one destination sweep from a single airport.
pub(crate) struct DestinationSweep<'a> {
    pub region: &'a Region,
    pub excluded_countries: Vec<String>,
    pub excluded_airports: &'a [String],
    pub options: &'a SearchOptions,
    pub label: &'static str,
}

struct SecondLegTask<'c> {
    first: &'c SearchCandidate,
    stay1: u32,
    date: NaiveDate,
    excluded_countries: Vec<String>,
}

struct ReturnBranch<'c> {
    first: &'c SearchCandidate,
    second: Quote,
    return_destination: String,
    date: NaiveDate,
}

/// Entry point for every search mode.
#[derive(Clone)]
pub struct SearchEngine {
    fetcher: BoundedFetcher,
}

impl SearchEngine {
    pub fn new(fetcher: BoundedFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &BoundedFetcher {
        &self.fetcher
    }

    /// Cheapest quote from `origin` to up to `limit` airports of the sweep's
    /// region, sorted by price. Fails only when the region is empty after
    /// exclusions.
    pub(crate) async fn discover_destinations(
        &self,
        origin: &str,
        date: NaiveDate,
        limit: usize,
        sweep: &DestinationSweep<'_>,
        limiter: &ConcurrencyLimiter,
    ) -> Result<Vec<Quote>, SearchError> {
        let origin = origin.trim().to_uppercase();
        let trace = self.fetcher.trace();

        let destinations =
            airports_excluding(sweep.region, &sweep.excluded_countries, sweep.excluded_airports);
        if destinations.is_empty() {
            trace.emit(TraceEvent::DestinationsEmpty {
                label: sweep.label,
                origin,
            });
            return Err(SearchError::NoDestinations);
        }

        let keys: Vec<QueryKey> = destinations
            .iter()
            .filter(|d| **d != origin)
            .take(limit)
            .map(|d| QueryKey::new(&origin, d, date, sweep.options))
            .collect();
        trace.emit(TraceEvent::DestinationsListed {
            label: sweep.label,
            origin: origin.clone(),
            count: keys.len(),
            limit,
        });

        let fetched = join_all(keys.iter().map(|key| self.fetcher.fetch(key, limiter, sweep.label))).await;
        let mut quotes: Vec<Quote> = fetched.into_iter().flatten().collect();
        quotes.sort_by(|a, b| a.numeric_price.total_cmp(&b.numeric_price));

        trace.emit(TraceEvent::DestinationsResult {
            label: sweep.label,
            origin,
            kept: quotes.len(),
            concurrency: limiter.size(),
        });
        Ok(quotes)
    }

    /// Cheapest three-leg loops `origin -> A -> B -> origin` (or the
    /// override return airport), ranked by total price.
    pub async fn find_odyssey(&self, request: &OdysseyRequest) -> Result<OdysseyResult, SearchError> {
        let start = parse_date(&request.start_date)?;
        request.stay1.validate()?;
        request.stay2.validate()?;

        let origins: Vec<String> = request
            .origins
            .iter()
            .map(|o| o.trim().to_uppercase())
            .filter(|o| !o.is_empty())
            .collect();
        if origins.is_empty() {
            return Err(SearchError::NoOrigins);
        }
        let return_override = request
            .return_origin
            .as_deref()
            .map(|r| r.trim().to_uppercase())
            .filter(|r| !r.is_empty());

        let config = &request.config;
        let limit = config.limit_per_leg.max(1);
        let budget = request.budget();
        let trace = self.fetcher.trace();
        let mut stats = StageStats::default();

        let discovery = config.stage_limiter(limit, config.discovery_max_concurrency);
        let returns = config.stage_limiter(limit, config.return_max_concurrency);
        let discovery = &discovery;
        trace.stage(
            "RUN_START",
            format!(
                "origins={:?} region={:?} limit={} budget={:?}",
                origins, request.region, limit, budget
            ),
        );
        trace.stage(
            "RUN_CONCURRENCY",
            format!("destination={} return={}", discovery.size(), returns.size()),
        );

        // Stage 1: first destinations from every origin
        let step1_width = config.step1_width(limit);
        let sweeps = join_all(origins.iter().map(|origin| {
            let mut excluded_countries = request.excluded_countries.clone();
            if request.force_different_countries {
                if let Some(country) = country_of(origin) {
                    excluded_countries.push(country.to_string());
                }
            }
            async move {
                let sweep = DestinationSweep {
                    region: &request.region,
                    excluded_countries,
                    excluded_airports: &request.excluded_airports,
                    options: &request.options,
                    label: "STEP1",
                };
                let found = self
                    .discover_destinations(origin, start, step1_width, &sweep, discovery)
                    .await;
                (origin, found)
            }
        }))
        .await;

        let mut all_empty = true;
        let mut candidates: Vec<SearchCandidate> = Vec::new();
        for (origin, found) in sweeps {
            let quotes = match found {
                Ok(quotes) => quotes,
                Err(_) => continue,
            };
            all_empty = false;
            for quote in quotes.into_iter().take(limit) {
                if budget.is_some_and(|b| quote.numeric_price > b) {
                    stats.step1_budget_pruned += 1;
                    continue;
                }
                candidates.push(SearchCandidate {
                    quote,
                    search_origin: origin.clone(),
                });
            }
        }
        stats.step1_candidates = candidates.len();
        trace.stage(
            "STEP1_DONE",
            format!(
                "candidates={} budget_pruned={}",
                stats.step1_candidates, stats.step1_budget_pruned
            ),
        );

        if all_empty {
            return Err(SearchError::NoDestinations);
        }
        if candidates.is_empty() {
            return Err(SearchError::NoCandidates);
        }
        candidates.sort_by(|a, b| a.quote.numeric_price.total_cmp(&b.quote.numeric_price));
        candidates.truncate(limit * origins.len());

        // Stage 2: onward destinations per first candidate and stay length
        let mut second_tasks = Vec::new();
        for first in &candidates {
            let mut excluded_countries = request.excluded_countries.clone();
            if request.force_different_countries {
                excluded_countries.extend(
                    [country_of(&first.quote.destination), country_of(&first.search_origin)]
                        .into_iter()
                        .flatten()
                        .map(str::to_string),
                );
            }
            for stay1 in request.stay1.days() {
                let Some(date) = add_days(start, i64::from(stay1)) else {
                    continue;
                };
                stats.step2_tasks += 1;
                second_tasks.push(SecondLegTask {
                    first,
                    stay1,
                    date,
                    excluded_countries: excluded_countries.clone(),
                });
            }
        }

        let onward = join_all(second_tasks.iter().map(|task| async move {
            let sweep = DestinationSweep {
                region: &request.region,
                excluded_countries: task.excluded_countries.clone(),
                excluded_airports: &request.excluded_airports,
                options: &request.options,
                label: "STEP2",
            };
            self.discover_destinations(&task.first.quote.destination, task.date, limit, &sweep, discovery)
                .await
        }))
        .await;

        // Stage 3 preparation: prune on the first two legs before any return lookup
        let mut branches: Vec<ReturnBranch<'_>> = Vec::new();
        for (task, found) in second_tasks.iter().zip(onward) {
            let Ok(mut seconds) = found else {
                continue;
            };
            stats.step2_candidates += seconds.len();

            let first = task.first;
            let return_destination = return_override
                .clone()
                .unwrap_or_else(|| first.search_origin.clone());

            // No loops back through an origin, the first city or the return airport
            seconds.retain(|second| {
                !origins.contains(&second.destination)
                    && second.destination != first.quote.destination
                    && second.destination != return_destination
            });
            if let Some(cap) = config.max_second_leg_per_first {
                seconds.truncate(cap);
            }

            for second in seconds {
                let partial = first.quote.numeric_price + second.numeric_price;
                for stay2 in request.stay2.days() {
                    if budget.is_some_and(|b| partial >= b - config.early_return_buffer) {
                        stats.step3_budget_pruned += 1;
                        continue;
                    }
                    let Some(date) = add_days(start, i64::from(task.stay1 + stay2)) else {
                        continue;
                    };
                    stats.step3_return_tasks += 1;
                    branches.push(ReturnBranch {
                        first,
                        second: second.clone(),
                        return_destination: return_destination.clone(),
                        date,
                    });
                }
            }
        }
        trace.stage(
            "STEP3_PREP",
            format!(
                "step2_tasks={} step2_candidates={} return_tasks={} pruned_budget={}",
                stats.step2_tasks,
                stats.step2_candidates,
                stats.step3_return_tasks,
                stats.step3_budget_pruned
            ),
        );

        // Stage 3: return legs, then assembly
        let returns = &returns;
        let return_quotes = join_all(branches.iter().map(|branch| async move {
            let key = QueryKey::new(
                &branch.second.destination,
                &branch.return_destination,
                branch.date,
                &request.options,
            );
            self.fetcher.fetch(&key, returns, "STEP3").await
        }))
        .await;

        let mut itineraries = Vec::new();
        for (branch, back) in branches.iter().zip(return_quotes) {
            let Some(back) = back else {
                stats.step3_missing_return += 1;
                continue;
            };
            let total_price =
                branch.first.quote.numeric_price + branch.second.numeric_price + back.numeric_price;
            if budget.is_some_and(|b| total_price > b) {
                stats.final_budget_pruned += 1;
                continue;
            }
            itineraries.push(assemble(branch, &back, total_price));
        }

        itineraries.sort_by(|a, b| a.total_price.total_cmp(&b.total_price));
        itineraries.truncate(config.max_itineraries);
        stats.final_itineraries = itineraries.len();
        trace.stage(
            "RUN_DONE",
            format!(
                "itineraries={} missing_return={} final_budget_pruned={}",
                stats.final_itineraries, stats.step3_missing_return, stats.final_budget_pruned
            ),
        );
        tracing::info!(
            "Odyssey search from {:?} found {} itineraries",
            origins,
            stats.final_itineraries
        );

        Ok(OdysseyResult {
            itineraries,
            debug_stats: config.debug.then_some(stats),
        })
    }
}

fn assemble(branch: &ReturnBranch<'_>, back: &Quote, total_price: f64) -> Itinerary {
    let first = &branch.first.quote;
    let legs = vec![Leg::from(first), Leg::from(&branch.second), Leg::from(back)];
    Itinerary {
        total_price,
        origin: branch.first.search_origin.clone(),
        return_destination: branch.return_destination.clone(),
        warning: airport_change_warning(&legs),
        cached: first.from_cache || branch.second.from_cache || back.from_cache,
        legs,
    }
}

/// Advisory for a trip that changes airports inside one city: a connection
/// landing at one airport of a hub and leaving from another, or a final leg
/// whose two ends belong to the same hub.
pub fn airport_change_warning(legs: &[Leg]) -> Option<String> {
    let connections = legs
        .windows(2)
        .map(|pair| (&pair[0].destination, &pair[1].origin));
    let final_leg = legs
        .last()
        .filter(|_| legs.len() > 1)
        .map(|last| (&last.origin, &last.destination));

    connections.chain(final_leg).find_map(|(from, to)| {
        if from == to {
            return None;
        }
        let hub = hub_of(from)?;
        (hub_of(to) == Some(hub))
            .then(|| format!("Airport change required in {hub} ({from} to {to})"))
    })
}
