// Look-to-book resolver
// Decides per search whether to answer from the cache, spend metered quota on
// the live provider, or fall back to the bulk and static sources. Booking
// links are attached to whatever comes back.

use crate::cache::{CacheStatsReport, FlightCache};
use crate::clock::{Clock, SystemClock};
use crate::config::ResolverConfig;
use crate::links::BookingLinks;
use crate::locations::estimate_duration_minutes;
use crate::model::{Offer, OfferSource, SearchKey};
use crate::providers::bulk::{CachedBulkProvider, TravelpayoutsHttpApi};
use crate::providers::fallback::StaticFallbackProvider;
use crate::providers::metered::{AmadeusHttpApi, MeteredLiveProvider};
use crate::providers::{
    CheapestFare, CheapestFareLookup, FlightProvider, ProviderError, ProviderOutcome,
};
use crate::quota::{QuotaStatus, QuotaTracker};
use crate::store::KeyValueStore;
use chrono::NaiveTime;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CHEAPEST_BADGE: &str = "Cheapest Found";
const NO_RESULTS: &str = "No flights found from any source";

// The adapters the resolver consults, in precedence order
pub struct Providers {
    pub metered: Arc<dyn FlightProvider>,
    pub bulk: Arc<dyn FlightProvider>,
    pub fallback: Arc<dyn FlightProvider>,
    pub cheapest: Option<Arc<dyn CheapestFareLookup>>,
}

impl Providers {
    // HTTP-backed adapters built from configuration. The metered cool-down
    // is shared through `store`.
    pub fn from_config(
        config: &ResolverConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metered = MeteredLiveProvider::new(
            AmadeusHttpApi::new(config.metered.clone()),
            &config.metered,
            clock,
        )
        .with_shared_cooldown(store, &config.key_prefix);
        let bulk = Arc::new(CachedBulkProvider::new(TravelpayoutsHttpApi::new(
            config.bulk.clone(),
        )));

        let cheapest: Arc<dyn CheapestFareLookup> = bulk.clone();

        Self {
            metered: Arc::new(metered),
            bulk,
            fallback: Arc::new(StaticFallbackProvider::with_builtin_routes()),
            cheapest: Some(cheapest),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultSource {
    Cache,
    MeteredLive,
    CachedBulk,
    StaticFallback,
    None,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Cache => "cache",
            ResultSource::MeteredLive => "metered-live",
            ResultSource::CachedBulk => "cached-bulk",
            ResultSource::StaticFallback => "static-fallback",
            ResultSource::None => "none",
        }
    }
}

impl From<OfferSource> for ResultSource {
    fn from(source: OfferSource) -> Self {
        match source {
            OfferSource::MeteredLive => ResultSource::MeteredLive,
            OfferSource::CachedBulk => ResultSource::CachedBulk,
            OfferSource::StaticFallback => ResultSource::StaticFallback,
        }
    }
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub success: bool,
    pub source: ResultSource,
    pub offers: Vec<Offer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    // Age label of a cache hit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_stats: Option<CacheStatsReport>,
}

impl SearchResult {
    fn found(source: ResultSource, offers: Vec<Offer>) -> Self {
        Self {
            success: true,
            source,
            offers,
            error: None,
            cache_age: None,
            quota: None,
            cache_stats: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            source: ResultSource::None,
            offers: Vec::new(),
            error: Some(error.into()),
            cache_age: None,
            quota: None,
            cache_stats: None,
        }
    }

    pub fn lowest_price(&self) -> Option<u32> {
        self.offers.iter().map(|o| o.price).min()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheapestDeal {
    pub price: u32,
    pub airline: String,
    pub booking_url: String,
    pub badge: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridSearchResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub cheapest_deal: Option<CheapestDeal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub cache: CacheStatsReport,
    pub quota: QuotaStatus,
    pub marker_configured: bool,
}

fn retag(offers: Vec<Offer>, source: OfferSource) -> Vec<Offer> {
    offers
        .into_iter()
        .map(|mut offer| {
            offer.source = source;
            offer
        })
        .collect()
}

pub struct LookToBookEngine {
    cache: FlightCache,
    quota: QuotaTracker,
    providers: Providers,
    links: BookingLinks,
    provider_timeout: Duration,
}

impl LookToBookEngine {
    pub fn new(config: ResolverConfig, store: Arc<dyn KeyValueStore>, providers: Providers) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock), providers)
    }

    pub fn with_clock(
        config: ResolverConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        providers: Providers,
    ) -> Self {
        let cache = FlightCache::new(
            store.clone(),
            clock.clone(),
            config.cache.clone(),
            &config.key_prefix,
        );
        // Quota writes take priority over cached results when the store fills up
        let evictor = cache.clone();
        let quota = QuotaTracker::new(store, clock, config.quota.clone(), &config.key_prefix)
            .with_reclaimer(Arc::new(move || evictor.reclaim_space()));

        Self {
            cache,
            quota,
            providers,
            links: BookingLinks::from_config(&config.links),
            provider_timeout: config.provider_timeout,
        }
    }

    // Engine wired to the HTTP providers
    pub fn from_config(config: ResolverConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let providers = Providers::from_config(&config, store.clone(), clock.clone());
        Self::with_clock(config, store, clock, providers)
    }

    pub fn cache(&self) -> &FlightCache {
        &self.cache
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn links(&self) -> &BookingLinks {
        &self.links
    }

    async fn call(
        &self,
        provider: &dyn FlightProvider,
        key: &SearchKey,
        adults: u32,
    ) -> ProviderOutcome {
        match tokio::time::timeout(self.provider_timeout, provider.search(key, adults)).await {
            Ok(outcome) => outcome,
            Err(_) => ProviderOutcome::Failed(ProviderError::Timeout(
                self.provider_timeout.as_millis() as u64,
            )),
        }
    }

    // Resolve a search from free-form input. City names are accepted for
    // either location; the date must be `YYYY-MM-DD`.
    pub async fn search(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
        adults: u32,
    ) -> SearchResult {
        match SearchKey::parse(origin, destination, date) {
            Ok(key) => self.search_key(&key, adults).await,
            Err(e) => {
                warn!(origin, dest = destination, date, error = %e, "rejected search input");
                SearchResult::failure(e.to_string())
            }
        }
    }

    pub async fn search_key(&self, key: &SearchKey, adults: u32) -> SearchResult {
        info!(
            origin = %key.origin,
            dest = %key.destination,
            date = %key.date,
            "resolving search"
        );

        if let Some(hit) = self.cache.get(key) {
            let mut result =
                SearchResult::found(ResultSource::Cache, self.links.attach(hit.offers, key, adults));
            result.cache_age = Some(hit.age_label);
            result.cache_stats = Some(self.cache.stats());
            return result;
        }

        let decision = self.quota.can_make_request();
        let mut blocked_quota = None;

        if decision.allowed {
            match self.call(self.providers.metered.as_ref(), key, adults).await {
                ProviderOutcome::Offers(offers) => {
                    let quota = self.quota.record_request();
                    let offers = retag(offers, OfferSource::MeteredLive);
                    self.cache.set(key, &offers);

                    info!(
                        source = ResultSource::MeteredLive.as_str(),
                        count = offers.len(),
                        used = quota.used,
                        limit = quota.limit,
                        "resolved from live provider"
                    );
                    let mut result = SearchResult::found(
                        ResultSource::MeteredLive,
                        self.links.attach(offers, key, adults),
                    );
                    result.quota = Some(quota);
                    result.cache_stats = Some(self.cache.stats());
                    return result;
                }
                ProviderOutcome::Empty => {
                    info!(route = %key.route(), "live provider returned no offers");
                }
                ProviderOutcome::Failed(e) => {
                    warn!(route = %key.route(), error = %e, "live provider failed");
                }
            }
        } else {
            warn!(
                reason = decision.reason.as_deref().unwrap_or_default(),
                "metered quota exhausted, skipping live provider"
            );
            blocked_quota = Some(decision.status);
        }

        for provider in [&self.providers.bulk, &self.providers.fallback] {
            let source = provider.source();
            match self.call(provider.as_ref(), key, adults).await {
                ProviderOutcome::Offers(offers) => {
                    info!(source = source.as_str(), count = offers.len(), "resolved from fallback");
                    let offers = retag(offers, source);
                    let mut result =
                        SearchResult::found(source.into(), self.links.attach(offers, key, adults));
                    result.quota = blocked_quota;
                    result.cache_stats = Some(self.cache.stats());
                    return result;
                }
                ProviderOutcome::Empty => {
                    debug!(source = source.as_str(), "no offers");
                }
                ProviderOutcome::Failed(e) => {
                    warn!(source = source.as_str(), error = %e, "provider failed");
                }
            }
        }

        warn!(route = %key.route(), date = %key.date, "no source produced offers");
        let mut result = SearchResult::failure(NO_RESULTS);
        result.quota = blocked_quota;
        result
    }

    async fn cheapest_for_key(&self, key: &SearchKey, adults: u32) -> Option<CheapestDeal> {
        let lookup = self.providers.cheapest.as_ref()?;

        let fare: CheapestFare =
            match tokio::time::timeout(self.provider_timeout, lookup.cheapest(key)).await {
                Ok(Ok(Some(fare))) => fare,
                Ok(Ok(None)) => return None,
                Ok(Err(e)) => {
                    debug!(error = %e, "cheapest fare lookup failed");
                    return None;
                }
                Err(_) => {
                    debug!("cheapest fare lookup timed out");
                    return None;
                }
            };

        Some(CheapestDeal {
            price: fare.price,
            airline: fare.airline,
            booking_url: self.links.deep_link(key, adults),
            badge: CHEAPEST_BADGE.to_string(),
        })
    }

    pub async fn cheapest_deal(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
    ) -> Option<CheapestDeal> {
        let key = SearchKey::parse(origin, destination, date).ok()?;
        self.cheapest_for_key(&key, 1).await
    }

    // Run the normal search and the cheapest-fare lookup together. A cheaper
    // fare is put first, badged, unless the same price and airline is
    // already listed.
    pub async fn hybrid_search(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
        adults: u32,
    ) -> HybridSearchResult {
        let key = match SearchKey::parse(origin, destination, date) {
            Ok(key) => key,
            Err(e) => {
                return HybridSearchResult {
                    result: SearchResult::failure(e.to_string()),
                    cheapest_deal: None,
                }
            }
        };

        let (mut result, deal) = futures::join!(
            self.search_key(&key, adults),
            self.cheapest_for_key(&key, adults)
        );

        if let Some(deal) = &deal {
            let lowest = result.lowest_price().unwrap_or(u32::MAX);
            let listed = result
                .offers
                .iter()
                .any(|offer| offer.same_fare(deal.price, &deal.airline));

            if result.success && deal.price < lowest && !listed {
                info!(price = deal.price, airline = %deal.airline, "prepending cheaper fare");
                result.offers.insert(0, deal_offer(deal, &key));
            }
        }

        HybridSearchResult {
            result,
            cheapest_deal: deal,
        }
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            cache: self.cache.stats(),
            quota: self.quota.status(),
            marker_configured: self.links.is_configured(),
        }
    }
}

fn deal_offer(deal: &CheapestDeal, key: &SearchKey) -> Offer {
    let duration_minutes = estimate_duration_minutes(&key.origin, &key.destination);
    let departure_time = NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default();
    let (arrival_time, _) =
        departure_time.overflowing_add_signed(chrono::Duration::minutes(duration_minutes as i64));

    Offer {
        id: "cheapest-deal".to_string(),
        origin: key.origin.clone(),
        destination: key.destination.clone(),
        operator: deal.airline.clone(),
        operator_code: None,
        flight_number: None,
        price: deal.price,
        duration_minutes,
        departure_time,
        arrival_time,
        stops: 0,
        source: OfferSource::CachedBulk,
        booking_url: Some(deal.booking_url.clone()),
        badge: Some(deal.badge.clone()),
        special_deal: true,
    }
}
