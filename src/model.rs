// Core data model shared by the cache, the provider adapters and the resolver

use crate::locations::iata_code;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    #[error("Missing location: {0}")]
    MissingLocation(&'static str),

    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
}

// Canonical identity of a flight search.
// Locations are stored as uppercase IATA codes so that "Delhi", "delhi"
// and "DEL" all map to the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchKey {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
}

impl SearchKey {
    pub fn new(origin: &str, destination: &str, date: NaiveDate) -> Result<Self, KeyError> {
        let origin = iata_code(origin);
        if origin.is_empty() {
            return Err(KeyError::MissingLocation("origin"));
        }
        let destination = iata_code(destination);
        if destination.is_empty() {
            return Err(KeyError::MissingLocation("destination"));
        }

        Ok(Self {
            origin,
            destination,
            date,
        })
    }

    pub fn parse(origin: &str, destination: &str, date: &str) -> Result<Self, KeyError> {
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|_| KeyError::InvalidDate(date.to_string()))?;
        Self::new(origin, destination, date)
    }

    // "DEL_BOM_2026-05-20"
    pub fn storage_suffix(&self) -> String {
        format!(
            "{}_{}_{}",
            self.origin,
            self.destination,
            self.date.format("%Y-%m-%d")
        )
    }

    pub fn route(&self) -> String {
        format!("{}→{}", self.origin, self.destination)
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.route(), self.date.format("%Y-%m-%d"))
    }
}

// Which adapter produced an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OfferSource {
    MeteredLive,
    CachedBulk,
    StaticFallback,
}

impl OfferSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferSource::MeteredLive => "metered-live",
            OfferSource::CachedBulk => "cached-bulk",
            OfferSource::StaticFallback => "static-fallback",
        }
    }
}

impl fmt::Display for OfferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// A normalized, priced flight option.
// `price` is in whole rupees and always positive; adapters drop anything
// else while normalizing upstream payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub origin: String,
    pub destination: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_number: Option<String>,
    pub price: u32,
    pub duration_minutes: u32,
    pub departure_time: NaiveTime,
    pub arrival_time: NaiveTime,
    pub stops: u32,
    pub source: OfferSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default)]
    pub special_deal: bool,
}

impl Offer {
    pub fn duration_label(&self) -> String {
        format_duration(self.duration_minutes)
    }

    pub fn is_direct(&self) -> bool {
        self.stops == 0
    }

    // Two offers describe the same fare when price and operator match
    pub fn same_fare(&self, price: u32, operator: &str) -> bool {
        self.price == price && self.operator == operator
    }
}

pub fn format_duration(minutes: u32) -> String {
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_spellings_share_a_key() {
        let by_city = SearchKey::parse("Delhi", "mumbai", "2026-05-20").unwrap();
        let by_code = SearchKey::parse("DEL", "BOM", "2026-05-20").unwrap();
        assert_eq!(by_city, by_code);
        assert_eq!(by_city.storage_suffix(), "DEL_BOM_2026-05-20");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            SearchKey::parse("DEL", "BOM", "20/05/2026"),
            Err(KeyError::InvalidDate("20/05/2026".to_string()))
        );
        assert_eq!(
            SearchKey::parse("  ", "BOM", "2026-05-20"),
            Err(KeyError::MissingLocation("origin"))
        );
    }

    #[test]
    fn test_offer_source_serializes_kebab_case() {
        let json = serde_json::to_string(&OfferSource::StaticFallback).unwrap();
        assert_eq!(json, "\"static-fallback\"");
        assert_eq!(OfferSource::MeteredLive.to_string(), "metered-live");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(130), "2h 10m");
        assert_eq!(format_duration(65), "1h 05m");
    }
}
