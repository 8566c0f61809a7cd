// Cached bulk fare provider (Travelpayouts / Aviasales data API)
// Serves prices the upstream has already aggregated from recent searches.
// Never touches the metered quota.

use super::{CheapestFare, CheapestFareLookup, FlightProvider, ProviderError, ProviderOutcome};
use crate::config::BulkConfig;
use crate::locations::{estimate_duration_minutes, operator_name};
use crate::model::{Offer, OfferSource, SearchKey};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

// Data structures for the fare data JSON responses
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PricesForDatesResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<DatedFare>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatedFare {
    pub price: f64,
    pub airline: String,
    // Upstream sends either a number or a string
    #[serde(default)]
    pub flight_number: Option<serde_json::Value>,
    #[serde(default)]
    pub departure_at: Option<String>,
    #[serde(default)]
    pub transfers: Option<u32>,
    // Minutes
    #[serde(default)]
    pub duration: Option<u32>,
}

// `data` is keyed by destination, then by stop count
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TicketsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: HashMap<String, BTreeMap<String, StopTicket>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StopTicket {
    pub price: f64,
    pub airline: String,
    #[serde(default)]
    pub flight_number: Option<serde_json::Value>,
    #[serde(default)]
    pub departure_at: Option<String>,
}

#[async_trait]
pub trait FareDataApi: Send + Sync + 'static {
    // Fares for the exact departure date
    async fn prices_for_dates(&self, key: &SearchKey)
        -> Result<PricesForDatesResponse, ProviderError>;

    // Cheapest fare per stop count for the departure month
    async fn cheap_tickets(&self, key: &SearchKey) -> Result<TicketsResponse, ProviderError>;

    // Cheapest non-stop fares for the departure month
    async fn direct_tickets(&self, key: &SearchKey) -> Result<TicketsResponse, ProviderError>;
}

// One fare from any of the bulk endpoints, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFare {
    pub price: u32,
    pub airline: String,
    pub flight_number: Option<String>,
    pub departure_at: Option<DateTime<FixedOffset>>,
    pub transfers: u32,
    pub duration_minutes: Option<u32>,
}

fn whole_price(price: f64) -> Option<u32> {
    let rounded = price.round();
    (rounded >= 1.0 && rounded <= u32::MAX as f64).then_some(rounded as u32)
}

fn flight_number_text(value: &Option<serde_json::Value>) -> Option<String> {
    match value.as_ref()? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_departure(raw: &Option<String>) -> Option<DateTime<FixedOffset>> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

fn dated_fares(response: PricesForDatesResponse) -> Vec<BulkFare> {
    if !response.success {
        return Vec::new();
    }
    response
        .data
        .into_iter()
        .filter_map(|fare| {
            Some(BulkFare {
                price: whole_price(fare.price)?,
                flight_number: flight_number_text(&fare.flight_number),
                departure_at: parse_departure(&fare.departure_at),
                transfers: fare.transfers.unwrap_or(0),
                duration_minutes: fare.duration.filter(|d| *d > 0),
                airline: fare.airline,
            })
        })
        .collect()
}

fn ticket_fares(response: TicketsResponse, destination: &str, direct_only: bool) -> Vec<BulkFare> {
    if !response.success {
        return Vec::new();
    }
    let Some(by_stops) = response.data.get(destination) else {
        return Vec::new();
    };

    by_stops
        .iter()
        .filter_map(|(stops, ticket)| {
            let transfers = if direct_only {
                0
            } else {
                stops.parse().unwrap_or(0)
            };
            Some(BulkFare {
                price: whole_price(ticket.price)?,
                airline: ticket.airline.clone(),
                flight_number: flight_number_text(&ticket.flight_number),
                departure_at: parse_departure(&ticket.departure_at),
                transfers,
                duration_minutes: None,
            })
        })
        .collect()
}

// Combine endpoint results in order, keeping the first fare for each
// price and airline pair, cheapest first.
pub fn merge_fares(groups: Vec<Vec<BulkFare>>) -> Vec<BulkFare> {
    let mut seen = HashSet::new();
    let mut merged: Vec<BulkFare> = groups
        .into_iter()
        .flatten()
        .filter(|fare| seen.insert((fare.price, fare.airline.clone())))
        .collect();
    merged.sort_by_key(|fare| fare.price);
    merged
}

fn to_offer(fare: BulkFare, key: &SearchKey, index: usize) -> Offer {
    let duration_minutes = fare
        .duration_minutes
        .unwrap_or_else(|| estimate_duration_minutes(&key.origin, &key.destination));
    let departure_time = fare
        .departure_at
        .map(|at| at.time())
        .unwrap_or_else(|| NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default());
    let (arrival_time, _) =
        departure_time.overflowing_add_signed(Duration::minutes(duration_minutes as i64));

    let id = match &fare.flight_number {
        Some(number) => format!("{}-{}", fare.airline, number),
        None => format!("{}-cb{}", fare.airline, index),
    };

    Offer {
        id,
        origin: key.origin.clone(),
        destination: key.destination.clone(),
        operator: operator_name(&fare.airline),
        flight_number: fare
            .flight_number
            .map(|number| format!("{}{}", fare.airline, number)),
        operator_code: Some(fare.airline),
        price: fare.price,
        duration_minutes,
        departure_time,
        arrival_time,
        stops: fare.transfers,
        source: OfferSource::CachedBulk,
        booking_url: None,
        badge: None,
        special_deal: false,
    }
}

pub struct CachedBulkProvider<A: FareDataApi> {
    api: A,
}

impl<A: FareDataApi> CachedBulkProvider<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<A: FareDataApi> FlightProvider for CachedBulkProvider<A> {
    fn source(&self) -> OfferSource {
        OfferSource::CachedBulk
    }

    async fn search(&self, key: &SearchKey, _adults: u32) -> ProviderOutcome {
        let (dated, cheap, direct) = futures::join!(
            self.api.prices_for_dates(key),
            self.api.cheap_tickets(key),
            self.api.direct_tickets(key),
        );

        let mut groups = Vec::with_capacity(3);
        let mut failures = Vec::new();

        match dated {
            Ok(response) => groups.push(dated_fares(response)),
            Err(e) => failures.push(("prices_for_dates", e)),
        }
        match cheap {
            Ok(response) => groups.push(ticket_fares(response, &key.destination, false)),
            Err(e) => failures.push(("prices_cheap", e)),
        }
        match direct {
            Ok(response) => groups.push(ticket_fares(response, &key.destination, true)),
            Err(e) => failures.push(("prices_direct", e)),
        }

        for (endpoint, error) in &failures {
            warn!(endpoint, error = %error, "bulk fare endpoint failed");
        }
        if groups.is_empty() {
            if let Some((_, error)) = failures.into_iter().next() {
                return ProviderOutcome::Failed(error);
            }
        }

        let offers: Vec<Offer> = merge_fares(groups)
            .into_iter()
            .enumerate()
            .map(|(i, fare)| to_offer(fare, key, i))
            .collect();
        debug!(count = offers.len(), route = %key.route(), "bulk provider responded");
        ProviderOutcome::from_offers(offers)
    }
}

#[async_trait]
impl<A: FareDataApi> CheapestFareLookup for CachedBulkProvider<A> {
    async fn cheapest(&self, key: &SearchKey) -> Result<Option<CheapestFare>, ProviderError> {
        let response = self.api.prices_for_dates(key).await?;
        Ok(dated_fares(response)
            .into_iter()
            .min_by_key(|fare| fare.price)
            .map(|fare| CheapestFare {
                price: fare.price,
                airline: operator_name(&fare.airline),
            }))
    }
}

// reqwest transport for the Travelpayouts data API
pub struct TravelpayoutsHttpApi {
    client: Client,
    config: BulkConfig,
}

impl TravelpayoutsHttpApi {
    pub fn new(config: BulkConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent("look_to_book/0.1")
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        if self.config.token.is_empty() {
            return Err(ProviderError::NotConfigured("TRAVELPAYOUTS_TOKEN".to_string()));
        }

        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .query(query)
            .query(&[("token", self.config.token.as_str())])
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
            StatusCode::UNAUTHORIZED => Err(ProviderError::Auth(
                response.text().await.unwrap_or_default(),
            )),
            status if !status.is_success() => Err(ProviderError::Status {
                code: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
            _ => Ok(response.json::<T>().await?),
        }
    }

    fn month_query(&self, key: &SearchKey) -> Vec<(&'static str, String)> {
        vec![
            ("origin", key.origin.clone()),
            ("destination", key.destination.clone()),
            ("depart_date", key.date.format("%Y-%m").to_string()),
            ("currency", self.config.currency.clone()),
        ]
    }
}

#[async_trait]
impl FareDataApi for TravelpayoutsHttpApi {
    async fn prices_for_dates(
        &self,
        key: &SearchKey,
    ) -> Result<PricesForDatesResponse, ProviderError> {
        let query = vec![
            ("origin", key.origin.clone()),
            ("destination", key.destination.clone()),
            ("departure_at", key.date.format("%Y-%m-%d").to_string()),
            ("currency", self.config.currency.clone()),
            ("limit", self.config.limit.to_string()),
            ("sorting", "price".to_string()),
            ("direct", "false".to_string()),
            ("market", self.config.market.clone()),
        ];
        self.get_json("/aviasales/v3/prices_for_dates", &query).await
    }

    async fn cheap_tickets(&self, key: &SearchKey) -> Result<TicketsResponse, ProviderError> {
        self.get_json("/v1/prices/cheap", &self.month_query(key)).await
    }

    async fn direct_tickets(&self, key: &SearchKey) -> Result<TicketsResponse, ProviderError> {
        self.get_json("/v1/prices/direct", &self.month_query(key)).await
    }
}
