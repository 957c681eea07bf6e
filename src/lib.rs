// Flight itinerary search engine: cached, coalesced and bounded quote lookups
// feeding one-way, round-trip, anywhere and multi-city loop searches

pub mod airports;
pub mod basic_search;
pub mod cache;
pub mod coalesce;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod orchestrator;
pub mod parsing;
pub mod provider;
pub mod ranker;
pub mod sqlite_cache;
pub mod trace;

// Re-export key types for convenience
pub use airports::Region;
pub use basic_search::{AnywhereRequest, BasicRequest};
pub use cache::{CacheConfig, CacheStats, QuoteCache, TtlQuoteCache};
pub use coalesce::RequestCoalescer;
pub use error::{CacheError, ProviderError, SearchError};
pub use fetcher::{BoundedFetcher, ConcurrencyLimiter, FetcherConfig, RetryConfig};
pub use model::{
    BasicSearchResult, Itinerary, Leg, OfferFilters, QueryKey, Quote, SeatClass, SearchMode,
    SearchOptions, TripOption,
};
pub use orchestrator::{OdysseyConfig, OdysseyRequest, OdysseyResult, SearchEngine, StageStats, StayRange};
pub use provider::{ProviderRequest, QuoteProvider, RawOffer};
pub use ranker::{SortKey, TimeWindow};
pub use sqlite_cache::SqliteQuoteCache;
pub use trace::{TraceEvent, TraceSink};
