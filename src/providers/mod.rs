// Flight provider adapters
// Each adapter turns an upstream response into normalized offers and reports
// its outcome as a value; nothing here panics or propagates upstream errors
// to the resolver.

pub mod bulk;
pub mod fallback;
pub mod metered;

use crate::model::{Offer, OfferSource, SearchKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

// Error types for provider adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Cooling down after rate limit until {until}")]
    CoolingDown { until: DateTime<Utc> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(0)
        } else if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::Status {
                code: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

// What a single adapter call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    Offers(Vec<Offer>),
    Empty,
    Failed(ProviderError),
}

impl ProviderOutcome {
    pub fn from_offers(offers: Vec<Offer>) -> Self {
        if offers.is_empty() {
            ProviderOutcome::Empty
        } else {
            ProviderOutcome::Offers(offers)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProviderOutcome::Offers(_) => "offers",
            ProviderOutcome::Empty => "empty",
            ProviderOutcome::Failed(_) => "failed",
        }
    }
}

#[async_trait]
pub trait FlightProvider: Send + Sync + 'static {
    fn source(&self) -> OfferSource;

    async fn search(&self, key: &SearchKey, adults: u32) -> ProviderOutcome;
}

// Lowest known fare for a route, used by the hybrid search
#[derive(Debug, Clone, PartialEq)]
pub struct CheapestFare {
    pub price: u32,
    pub airline: String,
}

#[async_trait]
pub trait CheapestFareLookup: Send + Sync + 'static {
    async fn cheapest(&self, key: &SearchKey) -> Result<Option<CheapestFare>, ProviderError>;
}

// Scripted providers for resolver tests
#[cfg(test)]
pub mod mock_providers {
    use super::*;
    use chrono::NaiveTime;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    pub fn offer(source: OfferSource, id: &str, price: u32, operator: &str) -> Offer {
        Offer {
            id: id.to_string(),
            origin: "DEL".to_string(),
            destination: "BOM".to_string(),
            operator: operator.to_string(),
            operator_code: None,
            flight_number: None,
            price,
            duration_minutes: 130,
            departure_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            arrival_time: NaiveTime::from_hms_opt(8, 10, 0).unwrap(),
            stops: 0,
            source,
            booking_url: None,
            badge: None,
            special_deal: false,
        }
    }

    pub fn offers(source: OfferSource, prices: &[u32]) -> Vec<Offer> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| offer(source, &format!("{}-{}", source, i), *price, "IndiGo"))
            .collect()
    }

    // Provider that replays queued outcomes, then repeats a default one.
    pub struct MockProvider {
        source: OfferSource,
        script: Mutex<VecDeque<ProviderOutcome>>,
        default: Mutex<ProviderOutcome>,
        calls: AtomicUsize,
        delay_ms: AtomicU64,
    }

    impl MockProvider {
        pub fn new(source: OfferSource) -> Self {
            Self {
                source,
                script: Mutex::new(VecDeque::new()),
                default: Mutex::new(ProviderOutcome::Empty),
                calls: AtomicUsize::new(0),
                delay_ms: AtomicU64::new(0),
            }
        }

        pub fn returning(source: OfferSource, outcome: ProviderOutcome) -> Self {
            Self {
                default: Mutex::new(outcome),
                ..Self::new(source)
            }
        }

        pub async fn push(&self, outcome: ProviderOutcome) {
            self.script.lock().await.push_back(outcome);
        }

        pub async fn set_default(&self, outcome: ProviderOutcome) {
            *self.default.lock().await = outcome;
        }

        pub fn set_delay(&self, delay_ms: u64) {
            self.delay_ms.store(delay_ms, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FlightProvider for MockProvider {
        fn source(&self) -> OfferSource {
            self.source
        }

        async fn search(&self, _key: &SearchKey, _adults: u32) -> ProviderOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            if let Some(next) = self.script.lock().await.pop_front() {
                return next;
            }
            self.default.lock().await.clone()
        }
    }

    pub struct MockCheapest {
        result: Result<Option<CheapestFare>, ProviderError>,
        pub calls: AtomicUsize,
    }

    impl MockCheapest {
        pub fn new(result: Result<Option<CheapestFare>, ProviderError>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CheapestFareLookup for MockCheapest {
        async fn cheapest(&self, _key: &SearchKey) -> Result<Option<CheapestFare>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }
}
