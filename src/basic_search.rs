// Single-leg search modes: one-way, round-trip and "anywhere"

use chrono::NaiveDate;
use futures::future::join_all;

use crate::{
    airports::Region,
    error::SearchError,
    fetcher::ConcurrencyLimiter,
    model::{BasicSearchResult, Leg, QueryKey, SearchMode, SearchOptions, TripOption},
    orchestrator::{DestinationSweep, SearchEngine},
    parsing::{expand_dates_with_flex, parse_date},
    ranker::{dedup_legs, dedup_trips, finish_ranking, SortKey, TimeWindow},
};

#[derive(Debug, Clone)]
pub struct BasicRequest {
    pub origin: String,
    pub destination: String,
    pub date: String,
    /// Present for a round trip.
    pub return_date: Option<String>,
    pub max_results: usize,
    pub options: SearchOptions,
    pub max_budget: Option<f64>,
    pub sort_by: SortKey,
    pub date_flex: u32,
    pub time_window: TimeWindow,
    pub max_concurrency: usize,
}

impl BasicRequest {
    pub fn one_way(origin: &str, destination: &str, date: &str) -> Self {
        Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            date: date.to_string(),
            return_date: None,
            max_results: 10,
            options: SearchOptions::default(),
            max_budget: None,
            sort_by: SortKey::Price,
            date_flex: 0,
            time_window: TimeWindow::default(),
            max_concurrency: 3,
        }
    }

    pub fn round_trip(origin: &str, destination: &str, date: &str, return_date: &str) -> Self {
        Self {
            return_date: Some(return_date.to_string()),
            ..Self::one_way(origin, destination, date)
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnywhereRequest {
    pub origin: String,
    pub date: String,
    pub region: Region,
    pub max_results: usize,
    /// Breadth hint; the sweep covers `max(3 * limit, max_results)` airports.
    pub limit: usize,
    pub excluded_countries: Vec<String>,
    pub excluded_airports: Vec<String>,
    pub options: SearchOptions,
    pub max_budget: Option<f64>,
    pub sort_by: SortKey,
    pub date_flex: u32,
    pub time_window: TimeWindow,
    pub max_concurrency: usize,
}

impl AnywhereRequest {
    pub fn new(origin: &str, date: &str) -> Self {
        Self {
            origin: origin.to_string(),
            date: date.to_string(),
            region: Region::default(),
            max_results: 10,
            limit: 10,
            excluded_countries: Vec::new(),
            excluded_airports: Vec::new(),
            options: SearchOptions::default(),
            max_budget: None,
            sort_by: SortKey::Price,
            date_flex: 0,
            time_window: TimeWindow::default(),
            max_concurrency: 3,
        }
    }
}

fn positive_budget(budget: Option<f64>) -> Option<f64> {
    budget.filter(|b| b.is_finite() && *b > 0.0)
}

fn normalized_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn empty_result(mode: SearchMode) -> BasicSearchResult {
    BasicSearchResult {
        mode,
        results: Vec::new(),
        no_result_hint: None,
    }
}

impl SearchEngine {
    /// One-way or round-trip search on a fixed route with optional date flex.
    pub async fn find_basic(&self, request: &BasicRequest) -> Result<BasicSearchResult, SearchError> {
        let origin = normalized_code(&request.origin);
        let destination = normalized_code(&request.destination);
        if origin.is_empty() {
            return Err(SearchError::NoOrigins);
        }
        if destination.is_empty() {
            return Err(SearchError::NoDestinations);
        }
        let outbound_date = parse_date(&request.date)?;
        let inbound_date = request.return_date.as_deref().map(parse_date).transpose()?;
        let mode = if inbound_date.is_some() {
            SearchMode::RoundTrip
        } else {
            SearchMode::OneWay
        };
        let budget = positive_budget(request.max_budget);

        let outbound = self
            .route_options(&origin, &destination, outbound_date, request)
            .await;
        if outbound.is_empty() {
            return Ok(empty_result(mode));
        }

        let Some(inbound_date) = inbound_date else {
            let (within, over): (Vec<TripOption>, Vec<TripOption>) = outbound
                .into_iter()
                .map(|leg| TripOption::new(vec![leg]))
                .partition(|trip| !budget.is_some_and(|b| trip.total_price > b));
            let (results, no_result_hint) =
                finish_ranking(within, over, request.sort_by, request.max_results, budget);
            return Ok(BasicSearchResult {
                mode,
                results,
                no_result_hint,
            });
        };

        let inbound = self
            .route_options(&destination, &origin, inbound_date, request)
            .await;
        if inbound.is_empty() {
            return Ok(empty_result(mode));
        }

        let mut combined = Vec::new();
        let mut over = Vec::new();
        for out in &outbound {
            for back in &inbound {
                let trip = TripOption::new(vec![out.clone(), back.clone()]);
                if budget.is_some_and(|b| trip.total_price > b) {
                    over.push(trip);
                } else {
                    combined.push(trip);
                }
            }
        }
        tracing::debug!(
            "Round trip {}<->{}: {} outbound x {} inbound",
            origin,
            destination,
            outbound.len(),
            inbound.len()
        );

        let (results, no_result_hint) = finish_ranking(
            dedup_trips(combined),
            over,
            request.sort_by,
            request.max_results,
            budget,
        );
        Ok(BasicSearchResult {
            mode,
            results,
            no_result_hint,
        })
    }

    // Every acceptable offer on the route across the flex window, cheapest first.
    // Each date keeps at most `max_results` de-duplicated offers.
    async fn route_options(
        &self,
        origin: &str,
        destination: &str,
        date: NaiveDate,
        request: &BasicRequest,
    ) -> Vec<Leg> {
        let dates = expand_dates_with_flex(date, request.date_flex);
        let limiter = ConcurrencyLimiter::for_width(dates.len(), request.max_concurrency);
        let limiter = &limiter;

        let per_date = join_all(dates.iter().map(|day| async move {
            let key = QueryKey::new(origin, destination, *day, &request.options);
            self.fetcher().fetch_options(&key, limiter, "ROUTE").await
        }))
        .await;

        let mut legs: Vec<Leg> = per_date
            .into_iter()
            .flat_map(|quotes| {
                let legs: Vec<Leg> = quotes
                    .iter()
                    .map(Leg::from)
                    .filter(|leg| request.time_window.matches(leg))
                    .collect();
                let mut legs = dedup_legs(legs);
                legs.sort_by(|a, b| a.numeric_price.total_cmp(&b.numeric_price));
                legs.truncate(request.max_results);
                legs
            })
            .collect();
        legs.sort_by(|a, b| a.numeric_price.total_cmp(&b.numeric_price));
        legs
    }

    /// Cheapest single legs from one origin to anywhere in a region.
    pub async fn find_anywhere(
        &self,
        request: &AnywhereRequest,
    ) -> Result<BasicSearchResult, SearchError> {
        let origin = normalized_code(&request.origin);
        if origin.is_empty() {
            return Err(SearchError::NoOrigins);
        }
        let date = parse_date(&request.date)?;
        let budget = positive_budget(request.max_budget);

        let width = (request.limit * 3).max(request.max_results);
        let limiter = ConcurrencyLimiter::for_width(width, request.max_concurrency);
        let sweep = DestinationSweep {
            region: &request.region,
            excluded_countries: request.excluded_countries.clone(),
            excluded_airports: &request.excluded_airports,
            options: &request.options,
            label: "ANYWHERE",
        };

        let dates = expand_dates_with_flex(date, request.date_flex);
        let sweeps = join_all(
            dates
                .iter()
                .map(|day| self.discover_destinations(&origin, *day, width, &sweep, &limiter)),
        )
        .await;

        if sweeps
            .iter()
            .all(|found| matches!(found, Err(SearchError::NoDestinations)))
        {
            return Err(SearchError::NoDestinations);
        }

        let mut results = Vec::new();
        let mut over = Vec::new();
        for quote in sweeps.into_iter().flatten().flatten() {
            let trip = TripOption::new(vec![Leg::from(&quote)]);
            if budget.is_some_and(|b| trip.total_price > b) {
                over.push(trip);
            } else if request.time_window.matches(&trip.legs[0]) {
                results.push(trip);
            }
        }

        let (results, no_result_hint) =
            finish_ranking(results, over, request.sort_by, request.max_results, budget);
        Ok(BasicSearchResult {
            mode: SearchMode::Anywhere,
            results,
            no_result_hint,
        })
    }
}
