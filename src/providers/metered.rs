// Metered live provider (Amadeus flight offers)
// Owns its session token, a rate-limit cool-down gate and a request pacer.
// The transport sits behind `LiveFareApi` so the adapter logic can be driven
// without a network.

use super::{FlightProvider, ProviderError, ProviderOutcome};
use crate::clock::Clock;
use crate::config::MeteredConfig;
use crate::locations::airline_name;
use crate::model::{Offer, OfferSource, SearchKey};
use crate::store::{read_json, write_json, KeyValueStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

// Data structures for the flight-offers JSON response
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FlightOffersResponse {
    #[serde(default)]
    pub data: Vec<LiveOffer>,
    #[serde(default)]
    pub dictionaries: Option<Dictionaries>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveOffer {
    pub id: String,
    #[serde(default)]
    pub itineraries: Vec<Itinerary>,
    pub price: LivePrice,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Itinerary {
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Segment {
    pub departure: SegmentEndpoint,
    pub arrival: SegmentEndpoint,
    #[serde(rename = "carrierCode")]
    pub carrier_code: String,
    #[serde(default)]
    pub number: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmentEndpoint {
    #[serde(rename = "iataCode")]
    pub iata_code: String,
    // Local time, "2026-05-20T06:00:00"
    pub at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LivePrice {
    pub total: String,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Dictionaries {
    #[serde(default)]
    pub carriers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    // Seconds
    pub expires_in: i64,
}

#[async_trait]
pub trait LiveFareApi: Send + Sync + 'static {
    async fn request_token(&self) -> Result<TokenGrant, ProviderError>;

    async fn flight_offers(
        &self,
        token: &str,
        key: &SearchKey,
        adults: u32,
    ) -> Result<FlightOffersResponse, ProviderError>;
}

// Parse an ISO-8601 duration such as "PT2H10M" or "P1DT3H" into minutes.
pub fn parse_iso_duration(raw: &str) -> Option<u32> {
    let rest = raw.trim().strip_prefix('P')?;
    let mut minutes: u32 = 0;
    let mut number = String::new();
    let mut in_time = false;
    let mut seen_unit = false;

    for c in rest.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' => number.push(c),
            unit => {
                let value: u32 = number.parse().ok()?;
                number.clear();
                let part = match (in_time, unit) {
                    (false, 'D') => value.checked_mul(24 * 60)?,
                    (true, 'H') => value.checked_mul(60)?,
                    (true, 'M') => value,
                    (true, 'S') => 0,
                    _ => return None,
                };
                minutes = minutes.checked_add(part)?;
                seen_unit = true;
            }
        }
    }

    if number.is_empty() && seen_unit {
        Some(minutes)
    } else {
        None
    }
}

fn parse_local_time(at: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(at, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(at, "%Y-%m-%dT%H:%M"))
        .ok()
}

// Convert a flight-offers response into offers, dropping entries that have
// no segments, an unreadable timestamp or a non-positive price.
pub fn normalize_offers(response: FlightOffersResponse) -> Vec<Offer> {
    let carriers = response
        .dictionaries
        .map(|d| d.carriers)
        .unwrap_or_default();

    response
        .data
        .into_iter()
        .filter_map(|live| {
            let itinerary = live.itineraries.first()?;
            let first = itinerary.segments.first()?;
            let last = itinerary.segments.last()?;

            let price = live.price.total.trim().parse::<f64>().ok()?.round();
            if price < 1.0 || price > u32::MAX as f64 {
                debug!(id = %live.id, total = %live.price.total, "dropping offer with invalid price");
                return None;
            }

            let departure = parse_local_time(&first.departure.at)?;
            let arrival = parse_local_time(&last.arrival.at)?;
            let duration_minutes = itinerary
                .duration
                .as_deref()
                .and_then(parse_iso_duration)
                .unwrap_or_else(|| (arrival - departure).num_minutes().max(0) as u32);

            let code = first.carrier_code.clone();
            let operator = airline_name(&code)
                .map(str::to_string)
                .or_else(|| carriers.get(&code).cloned())
                .unwrap_or_else(|| code.clone());

            Some(Offer {
                id: live.id.clone(),
                origin: first.departure.iata_code.clone(),
                destination: last.arrival.iata_code.clone(),
                operator,
                flight_number: Some(format!("{}{}", code, first.number)),
                operator_code: Some(code),
                price: price as u32,
                duration_minutes,
                departure_time: departure.time(),
                arrival_time: arrival.time(),
                stops: itinerary.segments.len() as u32 - 1,
                source: OfferSource::MeteredLive,
                booking_url: None,
                badge: None,
                special_deal: false,
            })
        })
        .collect()
}

struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

// Session token owned by one adapter. Refreshed a fixed margin before the
// upstream expiry; concurrent callers share a single refresh.
pub struct TokenManager {
    cached: Mutex<Option<CachedToken>>,
    margin: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl TokenManager {
    pub fn new(margin: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cached: Mutex::new(None),
            margin,
            clock,
        }
    }

    pub async fn token<A: LiveFareApi + ?Sized>(&self, api: &A) -> Result<String, ProviderError> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();

        if let Some(token) = cached.as_ref() {
            if now < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let grant = api.request_token().await?;
        let value = grant.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: now + chrono::Duration::seconds(grant.expires_in) - self.margin,
        });
        info!(expires_in = grant.expires_in, "obtained metered provider token");
        Ok(value)
    }

    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

// "Cooled down until" gate tripped by an upstream rate-limit response.
// The timestamp is process-wide for the adapter and can be mirrored into the
// shared store so other instances honour it too.
pub struct Cooldown {
    until: RwLock<Option<DateTime<Utc>>>,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
    mirror: Option<(Arc<dyn KeyValueStore>, String)>,
}

impl Cooldown {
    pub fn new(window: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            until: RwLock::new(None),
            window,
            clock,
            mirror: None,
        }
    }

    pub fn shared(mut self, store: Arc<dyn KeyValueStore>, key_prefix: &str) -> Self {
        self.mirror = Some((store, format!("{}:metered_cooldown", key_prefix)));
        self
    }

    fn mirrored_until(&self) -> Option<DateTime<Utc>> {
        let (store, key) = self.mirror.as_ref()?;
        match read_json::<DateTime<Utc>>(store.as_ref(), key) {
            Ok(until) => until,
            Err(e) => {
                debug!(error = %e, "unreadable cooldown marker");
                None
            }
        }
    }

    // Some(until) while calls must be withheld
    pub fn active_until(&self) -> Option<DateTime<Utc>> {
        let local = *self.until.read();
        let until = local.max(self.mirrored_until())?;
        (self.clock.now() < until).then_some(until)
    }

    pub fn trip(&self) -> DateTime<Utc> {
        let until = self.clock.now() + self.window;
        *self.until.write() = Some(until);

        if let Some((store, key)) = &self.mirror {
            if let Err(e) = write_json(store.as_ref(), key, &until) {
                warn!(error = %e, "failed to share cooldown marker");
            }
        }
        until
    }
}

// Keeps a minimum interval between consecutive upstream calls.
pub struct RequestPacer {
    last: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            min_interval,
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct MeteredLiveProvider<A: LiveFareApi> {
    api: A,
    tokens: TokenManager,
    cooldown: Cooldown,
    pacer: RequestPacer,
}

impl<A: LiveFareApi> MeteredLiveProvider<A> {
    pub fn new(api: A, config: &MeteredConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            tokens: TokenManager::new(
                chrono::Duration::seconds(config.token_refresh_margin_seconds),
                clock.clone(),
            ),
            cooldown: Cooldown::new(
                chrono::Duration::seconds(config.cooldown_seconds as i64),
                clock,
            ),
            pacer: RequestPacer::new(Duration::from_millis(config.min_request_interval_ms)),
        }
    }

    // Share the cool-down marker through the store
    pub fn with_shared_cooldown(mut self, store: Arc<dyn KeyValueStore>, key_prefix: &str) -> Self {
        self.cooldown = self.cooldown.shared(store, key_prefix);
        self
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }
}

#[async_trait]
impl<A: LiveFareApi> FlightProvider for MeteredLiveProvider<A> {
    fn source(&self) -> OfferSource {
        OfferSource::MeteredLive
    }

    async fn search(&self, key: &SearchKey, adults: u32) -> ProviderOutcome {
        if let Some(until) = self.cooldown.active_until() {
            info!(%until, "metered provider cooling down, skipping call");
            return ProviderOutcome::Failed(ProviderError::CoolingDown { until });
        }

        let token = match self.tokens.token(&self.api).await {
            Ok(token) => token,
            Err(ProviderError::RateLimited) => {
                let until = self.cooldown.trip();
                warn!(%until, "metered token endpoint rate limited, backing off");
                return ProviderOutcome::Failed(ProviderError::RateLimited);
            }
            Err(e) => {
                warn!(error = %e, "metered provider authentication failed");
                return ProviderOutcome::Failed(e);
            }
        };

        self.pacer.wait().await;

        match self.api.flight_offers(&token, key, adults).await {
            Ok(response) => {
                let offers = normalize_offers(response);
                debug!(count = offers.len(), route = %key.route(), "metered provider responded");
                ProviderOutcome::from_offers(offers)
            }
            Err(ProviderError::RateLimited) => {
                let until = self.cooldown.trip();
                warn!(%until, "metered provider rate limited, backing off");
                ProviderOutcome::Failed(ProviderError::RateLimited)
            }
            Err(e @ ProviderError::Auth(_)) => {
                self.tokens.invalidate().await;
                warn!(error = %e, "metered provider rejected token");
                ProviderOutcome::Failed(e)
            }
            Err(e) => {
                warn!(error = %e, "metered provider search failed");
                ProviderOutcome::Failed(e)
            }
        }
    }
}

// reqwest transport for the Amadeus self-service API
pub struct AmadeusHttpApi {
    client: Client,
    config: MeteredConfig,
}

impl AmadeusHttpApi {
    pub fn new(config: MeteredConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent("look_to_book/0.1")
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }
}

async fn error_body(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}

#[async_trait]
impl LiveFareApi for AmadeusHttpApi {
    async fn request_token(&self) -> Result<TokenGrant, ProviderError> {
        if !self.config.has_credentials() {
            return Err(ProviderError::NotConfigured(
                "AMADEUS_API_KEY / AMADEUS_API_SECRET".to_string(),
            ));
        }

        let url = format!("{}/v1/security/oauth2/token", self.config.base_url);
        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.api_key.as_str()),
                ("client_secret", self.config.api_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            return Err(ProviderError::Auth(error_body(response).await));
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                code: status.as_u16(),
                message: error_body(response).await,
            });
        }

        Ok(response.json::<TokenGrant>().await?)
    }

    async fn flight_offers(
        &self,
        token: &str,
        key: &SearchKey,
        adults: u32,
    ) -> Result<FlightOffersResponse, ProviderError> {
        let url = format!("{}/v2/shopping/flight-offers", self.config.base_url);
        let date = key.date.format("%Y-%m-%d").to_string();
        let adults = adults.max(1).to_string();
        let max = self.config.max_results.to_string();

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(&[
                ("originLocationCode", key.origin.as_str()),
                ("destinationLocationCode", key.destination.as_str()),
                ("departureDate", date.as_str()),
                ("adults", adults.as_str()),
                ("currencyCode", self.config.currency.as_str()),
                ("max", max.as_str()),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
            StatusCode::UNAUTHORIZED => Err(ProviderError::Auth(error_body(response).await)),
            status if !status.is_success() => Err(ProviderError::Status {
                code: status.as_u16(),
                message: error_body(response).await,
            }),
            _ => Ok(response.json::<FlightOffersResponse>().await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{NaiveTime, TimeZone};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    fn sample_response() -> FlightOffersResponse {
        serde_json::from_value(serde_json::json!({
            "data": [
                {
                    "id": "1",
                    "itineraries": [{
                        "duration": "PT2H10M",
                        "segments": [{
                            "departure": { "iataCode": "DEL", "at": "2026-05-20T06:00:00" },
                            "arrival": { "iataCode": "BOM", "at": "2026-05-20T08:10:00" },
                            "carrierCode": "6E",
                            "number": "2175"
                        }]
                    }],
                    "price": { "total": "3499.60", "currency": "INR" }
                },
                {
                    "id": "2",
                    "itineraries": [{
                        "duration": "PT5H",
                        "segments": [
                            {
                                "departure": { "iataCode": "DEL", "at": "2026-05-20T09:00:00" },
                                "arrival": { "iataCode": "JAI", "at": "2026-05-20T10:00:00" },
                                "carrierCode": "XY",
                                "number": "11"
                            },
                            {
                                "departure": { "iataCode": "JAI", "at": "2026-05-20T12:00:00" },
                                "arrival": { "iataCode": "BOM", "at": "2026-05-20T14:00:00" },
                                "carrierCode": "XY",
                                "number": "12"
                            }
                        ]
                    }],
                    "price": { "total": "4100.00" }
                },
                {
                    "id": "3",
                    "itineraries": [{ "segments": [] }],
                    "price": { "total": "999" }
                },
                {
                    "id": "4",
                    "itineraries": [{
                        "segments": [{
                            "departure": { "iataCode": "DEL", "at": "2026-05-20T06:00:00" },
                            "arrival": { "iataCode": "BOM", "at": "2026-05-20T08:10:00" },
                            "carrierCode": "AI",
                            "number": "101"
                        }]
                    }],
                    "price": { "total": "0.00" }
                }
            ],
            "dictionaries": { "carriers": { "XY": "FLYNAS", "6E": "INDIGO" } }
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_offers() {
        let offers = normalize_offers(sample_response());
        assert_eq!(offers.len(), 2);

        let direct = &offers[0];
        assert_eq!(direct.operator, "IndiGo");
        assert_eq!(direct.flight_number.as_deref(), Some("6E2175"));
        assert_eq!(direct.price, 3500);
        assert_eq!(direct.duration_label(), "2h 10m");
        assert_eq!(direct.departure_time, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert!(direct.is_direct());
        assert_eq!(direct.source, OfferSource::MeteredLive);

        let connecting = &offers[1];
        assert_eq!(connecting.operator, "FLYNAS");
        assert_eq!(connecting.stops, 1);
        assert_eq!(connecting.destination, "BOM");
        assert_eq!(connecting.arrival_time, NaiveTime::from_hms_opt(14, 0, 0).unwrap());
    }

    #[test_case("PT2H10M", Some(130) ; "hours and minutes")]
    #[test_case("PT45M", Some(45) ; "minutes only")]
    #[test_case("PT3H", Some(180) ; "hours only")]
    #[test_case("P1DT2H", Some(1560) ; "with days")]
    #[test_case("2H10M", None ; "missing prefix")]
    #[test_case("PT", None ; "no units")]
    #[test_case("PT5X", None ; "unknown unit")]
    #[test_case("P9999999D", None ; "day count overflows")]
    #[test_case("P3000000DT5H", None ; "sum overflows")]
    fn test_parse_iso_duration(raw: &str, expected: Option<u32>) {
        assert_eq!(parse_iso_duration(raw), expected);
    }

    #[test]
    fn test_overflowing_duration_falls_back_to_timestamps() {
        let mut response = sample_response();
        response.data[0].itineraries[0].duration = Some("P3000000DT5H".to_string());

        let offers = normalize_offers(response);
        assert_eq!(offers[0].duration_minutes, 130);
    }

    // Transport double with scripted token and search results
    struct ScriptedApi {
        token_calls: AtomicUsize,
        search_calls: AtomicUsize,
        token_ttl: i64,
        token_errors: parking_lot::Mutex<VecDeque<ProviderError>>,
        results: parking_lot::Mutex<VecDeque<Result<FlightOffersResponse, ProviderError>>>,
    }

    impl ScriptedApi {
        fn new(results: Vec<Result<FlightOffersResponse, ProviderError>>) -> Self {
            Self {
                token_calls: AtomicUsize::new(0),
                search_calls: AtomicUsize::new(0),
                token_ttl: 1799,
                token_errors: parking_lot::Mutex::new(VecDeque::new()),
                results: parking_lot::Mutex::new(results.into()),
            }
        }

        fn failing_token(self, errors: Vec<ProviderError>) -> Self {
            *self.token_errors.lock() = errors.into();
            self
        }
    }

    #[async_trait]
    impl LiveFareApi for Arc<ScriptedApi> {
        async fn request_token(&self) -> Result<TokenGrant, ProviderError> {
            let n = self.token_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.token_errors.lock().pop_front() {
                return Err(error);
            }
            Ok(TokenGrant {
                access_token: format!("token-{}", n),
                expires_in: self.token_ttl,
            })
        }

        async fn flight_offers(
            &self,
            _token: &str,
            _key: &SearchKey,
            _adults: u32,
        ) -> Result<FlightOffersResponse, ProviderError> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(sample_response()))
        }
    }

    fn test_config() -> MeteredConfig {
        MeteredConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            min_request_interval_ms: 0,
            ..MeteredConfig::default()
        }
    }

    fn setup(
        results: Vec<Result<FlightOffersResponse, ProviderError>>,
    ) -> (
        MeteredLiveProvider<Arc<ScriptedApi>>,
        Arc<ScriptedApi>,
        Arc<ManualClock>,
    ) {
        let api = Arc::new(ScriptedApi::new(results));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 18, 9, 0, 0).unwrap(),
        ));
        let provider = MeteredLiveProvider::new(api.clone(), &test_config(), clock.clone());
        (provider, api, clock)
    }

    fn key() -> SearchKey {
        SearchKey::parse("DEL", "BOM", "2026-05-20").unwrap()
    }

    #[tokio::test]
    async fn test_token_is_reused_until_refresh_margin() {
        let (provider, api, clock) = setup(vec![]);

        assert!(matches!(provider.search(&key(), 1).await, ProviderOutcome::Offers(_)));
        assert!(matches!(provider.search(&key(), 1).await, ProviderOutcome::Offers(_)));
        assert_eq!(api.token_calls.load(Ordering::SeqCst), 1);

        // 1799s lifetime minus the 300s margin
        clock.advance(chrono::Duration::seconds(1499));
        provider.search(&key(), 1).await;
        assert_eq!(api.token_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_starts_cooldown() {
        let (provider, api, clock) = setup(vec![Err(ProviderError::RateLimited)]);

        assert_eq!(
            provider.search(&key(), 1).await,
            ProviderOutcome::Failed(ProviderError::RateLimited)
        );
        assert!(matches!(
            provider.search(&key(), 1).await,
            ProviderOutcome::Failed(ProviderError::CoolingDown { .. })
        ));
        assert_eq!(api.search_calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::seconds(60));
        assert!(matches!(provider.search(&key(), 1).await, ProviderOutcome::Offers(_)));
        assert_eq!(api.search_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limited_token_request_starts_cooldown() {
        let api = Arc::new(
            ScriptedApi::new(vec![]).failing_token(vec![ProviderError::RateLimited]),
        );
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 18, 9, 0, 0).unwrap(),
        ));
        let provider = MeteredLiveProvider::new(api.clone(), &test_config(), clock.clone());

        assert_eq!(
            provider.search(&key(), 1).await,
            ProviderOutcome::Failed(ProviderError::RateLimited)
        );
        assert!(matches!(
            provider.search(&key(), 1).await,
            ProviderOutcome::Failed(ProviderError::CoolingDown { .. })
        ));
        assert_eq!(api.token_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.search_calls.load(Ordering::SeqCst), 0);

        clock.advance(chrono::Duration::seconds(60));
        assert!(matches!(provider.search(&key(), 1).await, ProviderOutcome::Offers(_)));
        assert_eq!(api.token_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cooldown_is_shared_through_store() {
        let store = Arc::new(MemoryStore::new());
        let (first, _, clock) = setup(vec![Err(ProviderError::RateLimited)]);
        let first = first.with_shared_cooldown(store.clone(), "test");

        let other_api = Arc::new(ScriptedApi::new(vec![]));
        let second = MeteredLiveProvider::new(other_api.clone(), &test_config(), clock.clone())
            .with_shared_cooldown(store.clone(), "test");

        first.search(&key(), 1).await;
        assert!(store.get("test:metered_cooldown").unwrap().is_some());

        assert!(matches!(
            second.search(&key(), 1).await,
            ProviderOutcome::Failed(ProviderError::CoolingDown { .. })
        ));
        assert_eq!(other_api.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_drops_cached_token() {
        let (provider, api, _) = setup(vec![Err(ProviderError::Auth("expired".into()))]);

        assert!(matches!(
            provider.search(&key(), 1).await,
            ProviderOutcome::Failed(ProviderError::Auth(_))
        ));
        provider.search(&key(), 1).await;
        assert_eq!(api.token_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_response_is_empty_outcome() {
        let (provider, _, _) = setup(vec![Ok(FlightOffersResponse::default())]);
        assert_eq!(provider.search(&key(), 1).await, ProviderOutcome::Empty);
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_without_network() {
        let api = AmadeusHttpApi::new(MeteredConfig::default());
        assert!(matches!(
            api.request_token().await,
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_pacer_spaces_requests() {
        let pacer = RequestPacer::new(Duration::from_millis(50));
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
