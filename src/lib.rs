// Look-to-book flight resolver
// Answers flight searches from a TTL cache, a quota-metered live provider and
// free fallback sources, attaching affiliate booking links to every offer.

pub mod cache;
pub mod clock;
pub mod config;
pub mod links;
pub mod locations;
pub mod model;
pub mod providers;
pub mod quota;
pub mod resolver;
pub mod store;

// Re-export key types for convenience
pub use cache::{CacheStatsReport, CachedOffers, FlightCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BulkConfig, CacheConfig, LinkConfig, MeteredConfig, QuotaConfig, ResolverConfig};
pub use links::BookingLinks;
pub use model::{KeyError, Offer, OfferSource, SearchKey};
pub use providers::{
    CheapestFare, CheapestFareLookup, FlightProvider, ProviderError, ProviderOutcome,
};
pub use quota::{QuotaDecision, QuotaStatus, QuotaTracker};
pub use resolver::{
    CheapestDeal, HybridSearchResult, LookToBookEngine, Providers, ResultSource, SearchResult,
    SystemStatus,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
