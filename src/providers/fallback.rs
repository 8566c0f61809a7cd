// Static fallback provider
// Local timetable consulted when neither upstream produced anything.
// Never fails; unknown routes are simply empty.

use super::{FlightProvider, ProviderOutcome};
use crate::locations::airline_name;
use crate::model::{Offer, OfferSource, SearchKey};
use async_trait::async_trait;
use chrono::NaiveTime;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct StaticFlight {
    pub operator: String,
    pub price: u32,
    pub departure: NaiveTime,
    pub arrival: NaiveTime,
    pub duration_minutes: u32,
    pub stops: u32,
}

impl StaticFlight {
    pub fn new(operator: &str, price: u32, departure: NaiveTime, duration_minutes: u32) -> Self {
        let (arrival, _) =
            departure.overflowing_add_signed(chrono::Duration::minutes(duration_minutes as i64));
        Self {
            operator: operator.to_string(),
            price,
            departure,
            arrival,
            duration_minutes,
            stops: 0,
        }
    }

    pub fn with_stops(mut self, stops: u32) -> Self {
        self.stops = stops;
        self
    }

    // Accepts carrier codes as well as display names
    pub fn display_operator(&self) -> &str {
        airline_name(&self.operator).unwrap_or(&self.operator)
    }
}

// (origin, destination, operator, price, departure "HH:MM", minutes, stops)
const BUILTIN_FLIGHTS: &[(&str, &str, &str, u32, &str, u32, u32)] = &[
    ("VGA", "DEL", "IndiGo", 8500, "10:00", 135, 0),
    ("VGA", "DEL", "Air India", 9200, "14:00", 150, 0),
    ("VGA", "DEL", "SpiceJet", 7800, "06:00", 165, 1),
    ("HYD", "DEL", "Akasa Air", 3800, "18:00", 130, 0),
    ("HYD", "DEL", "Vistara", 4500, "09:00", 135, 0),
    ("HYD", "DEL", "IndiGo", 4200, "07:30", 125, 0),
    ("HYD", "DEL", "Air India", 5100, "20:00", 140, 0),
    ("BLR", "DEL", "IndiGo", 4800, "05:30", 160, 0),
    ("BLR", "DEL", "Vistara", 5200, "11:00", 155, 0),
    ("BLR", "DEL", "Air India", 5800, "16:30", 165, 0),
    ("BOM", "DEL", "IndiGo", 3500, "06:00", 125, 0),
    ("BOM", "DEL", "Vistara", 4100, "09:00", 130, 0),
    ("BOM", "DEL", "Air India", 3900, "15:00", 135, 0),
    ("MAA", "DEL", "IndiGo", 5200, "07:00", 170, 0),
    ("MAA", "DEL", "SpiceJet", 4800, "12:00", 180, 0),
    ("GOI", "BOM", "IndiGo", 2800, "08:00", 75, 0),
    ("GOI", "BOM", "SpiceJet", 2500, "14:00", 80, 0),
];

fn route_key(origin: &str, destination: &str) -> String {
    format!("{}-{}", origin, destination)
}

#[derive(Debug, Default)]
pub struct StaticFallbackProvider {
    routes: RwLock<HashMap<String, Vec<StaticFlight>>>,
}

impl StaticFallbackProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_routes() -> Self {
        let provider = Self::new();
        for (origin, destination, operator, price, departure, minutes, stops) in BUILTIN_FLIGHTS {
            if let Ok(departure) = NaiveTime::parse_from_str(departure, "%H:%M") {
                provider.add_flight(
                    origin,
                    destination,
                    StaticFlight::new(operator, *price, departure, *minutes).with_stops(*stops),
                );
            }
        }
        provider
    }

    pub fn add_flight(&self, origin: &str, destination: &str, flight: StaticFlight) {
        self.routes
            .write()
            .entry(route_key(origin, destination))
            .or_default()
            .push(flight);
    }

    pub fn add_route(&self, origin: &str, destination: &str, flights: Vec<StaticFlight>) {
        self.routes
            .write()
            .entry(route_key(origin, destination))
            .or_default()
            .extend(flights);
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    pub fn offers_for(&self, key: &SearchKey) -> Vec<Offer> {
        let routes = self.routes.read();
        let Some(flights) = routes.get(&route_key(&key.origin, &key.destination)) else {
            return Vec::new();
        };

        let mut offers: Vec<Offer> = flights
            .iter()
            .enumerate()
            .map(|(i, flight)| Offer {
                id: format!("sf-{}{}-{}", key.origin, key.destination, i),
                origin: key.origin.clone(),
                destination: key.destination.clone(),
                operator: flight.display_operator().to_string(),
                operator_code: None,
                flight_number: None,
                price: flight.price,
                duration_minutes: flight.duration_minutes,
                departure_time: flight.departure,
                arrival_time: flight.arrival,
                stops: flight.stops,
                source: OfferSource::StaticFallback,
                booking_url: None,
                badge: None,
                special_deal: false,
            })
            .filter(|offer| offer.price > 0)
            .collect();
        offers.sort_by_key(|offer| offer.price);
        offers
    }
}

#[async_trait]
impl FlightProvider for StaticFallbackProvider {
    fn source(&self) -> OfferSource {
        OfferSource::StaticFallback
    }

    async fn search(&self, key: &SearchKey, _adults: u32) -> ProviderOutcome {
        ProviderOutcome::from_offers(self.offers_for(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_route_sorted_by_price() {
        let provider = StaticFallbackProvider::with_builtin_routes();
        let key = SearchKey::parse("Mumbai", "Delhi", "2026-05-20").unwrap();

        let ProviderOutcome::Offers(offers) = provider.search(&key, 1).await else {
            panic!("expected offers");
        };
        let prices: Vec<u32> = offers.iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![3500, 3900, 4100]);
        assert_eq!(offers[0].arrival_time, NaiveTime::from_hms_opt(8, 5, 0).unwrap());
        assert!(offers.iter().all(|o| o.source == OfferSource::StaticFallback));
    }

    #[tokio::test]
    async fn test_unknown_route_is_empty() {
        let provider = StaticFallbackProvider::with_builtin_routes();
        let key = SearchKey::parse("DEL", "SXR", "2026-05-20").unwrap();
        assert_eq!(provider.search(&key, 1).await, ProviderOutcome::Empty);
    }

    #[test]
    fn test_add_route() {
        let provider = StaticFallbackProvider::new();
        let six = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        provider.add_route(
            "DEL",
            "GOI",
            vec![
                StaticFlight::new("6E", 5100, six, 155),
                StaticFlight::new("SpiceJet", 4700, six, 160).with_stops(1),
            ],
        );

        let key = SearchKey::parse("DEL", "GOI", "2026-05-20").unwrap();
        let offers = provider.offers_for(&key);
        assert_eq!(provider.route_count(), 1);
        assert_eq!(offers[0].price, 4700);
        assert_eq!(offers[0].stops, 1);
        assert_eq!(offers[1].operator, "IndiGo");
    }
}
