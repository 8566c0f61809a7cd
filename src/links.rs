// Affiliate booking links
// Links depend only on the search and the configured marker, so cached offers
// get theirs rebuilt on every read.

use crate::config::LinkConfig;
use crate::model::{Offer, SearchKey};

const SEARCH_BASE: &str = "https://www.aviasales.com/search";

#[derive(Debug, Clone, Default)]
pub struct BookingLinks {
    marker: String,
}

impl BookingLinks {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.marker.clone())
    }

    pub fn is_configured(&self) -> bool {
        !self.marker.is_empty()
    }

    // `https://www.aviasales.com/search/{ORIGIN}{DDMM}{DEST}{adults}?marker={marker}`
    pub fn deep_link(&self, key: &SearchKey, adults: u32) -> String {
        format!(
            "{}/{}{}{}{}?marker={}",
            SEARCH_BASE,
            key.origin,
            key.date.format("%d%m"),
            key.destination,
            adults.max(1),
            self.marker
        )
    }

    pub fn attach(&self, offers: Vec<Offer>, key: &SearchKey, adults: u32) -> Vec<Offer> {
        let link = self.deep_link(key, adults);
        offers
            .into_iter()
            .map(|mut offer| {
                offer.booking_url = Some(link.clone());
                offer
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("DEL", "BOM", "2026-05-20", 1, "https://www.aviasales.com/search/DEL2005BOM1?marker=696077" ; "single adult")]
    #[test_case("Hyderabad", "delhi", "2026-06-01", 2, "https://www.aviasales.com/search/HYD0106DEL2?marker=696077" ; "city names")]
    #[test_case("BLR", "GOI", "2026-12-31", 0, "https://www.aviasales.com/search/BLR3112GOI1?marker=696077" ; "zero adults clamps to one")]
    fn test_deep_link(origin: &str, dest: &str, date: &str, adults: u32, expected: &str) {
        let links = BookingLinks::new("696077");
        let key = SearchKey::parse(origin, dest, date).unwrap();
        assert_eq!(links.deep_link(&key, adults), expected);
    }

    #[test]
    fn test_missing_marker() {
        let links = BookingLinks::default();
        assert!(!links.is_configured());
        let key = SearchKey::parse("DEL", "BOM", "2026-05-20").unwrap();
        assert!(links.deep_link(&key, 1).ends_with("?marker="));
    }
}
