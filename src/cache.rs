// Result cache for metered-live searches
// Entries live in the shared key-value store under
// "{prefix}:flights:{ORIGIN}_{DEST}_{DATE}" and die once their age reaches the TTL.
// No operation here returns an error: storage problems degrade to a miss or a
// skipped save.

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::model::{Offer, SearchKey};
use crate::store::{read_json, KeyValueStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

// Days of per-day stats kept, today included
pub const STATS_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: SearchKey,
    pub offers: Vec<Offer>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.age(now) >= ttl
    }
}

// A cache hit
#[derive(Debug, Clone, PartialEq)]
pub struct CachedOffers {
    pub offers: Vec<Offer>,
    pub created_at: DateTime<Utc>,
    pub age_label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCacheCounters {
    #[serde(default)]
    pub hits: u64,
    #[serde(default)]
    pub misses: u64,
    #[serde(default)]
    pub saves: u64,
    #[serde(default)]
    pub expired: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheEvent {
    Hit,
    Miss,
    Save,
    Expired,
}

// Stats for the cache
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatsReport {
    pub today: DailyCacheCounters,
    pub total: DailyCacheCounters,
    pub requests: u64,
    // Percentage of lookups served from the cache, one decimal
    pub hit_rate: f64,
    pub cached_keys: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedRoute {
    pub route: String,
    pub date: NaiveDate,
    pub offer_count: usize,
    pub age_hours: i64,
    pub expires_in_hours: i64,
}

// Human readable age: minutes up to an hour, whole hours after that.
pub fn age_label(age: chrono::Duration) -> String {
    let minutes = (age.num_milliseconds() as f64 / 60_000.0).round() as i64;
    if minutes <= 60 {
        format!("{}min ago", minutes.max(0))
    } else {
        format!("{}h ago", (minutes as f64 / 60.0).round() as i64)
    }
}

#[derive(Clone)]
pub struct FlightCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    entry_prefix: String,
    stats_key: String,
}

impl FlightCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
        key_prefix: &str,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            entry_prefix: format!("{}:flights:", key_prefix),
            stats_key: format!("{}:cache_stats", key_prefix),
        }
    }

    pub fn entry_key(&self, key: &SearchKey) -> String {
        format!("{}{}", self.entry_prefix, key.storage_suffix())
    }

    fn remove(&self, storage_key: &str) {
        if let Err(e) = self.store.delete(storage_key) {
            warn!(key = storage_key, error = %e, "failed to delete cache entry");
        }
    }

    // Look up a live entry. Expired and unreadable entries are deleted and
    // reported as a miss.
    pub fn get(&self, key: &SearchKey) -> Option<CachedOffers> {
        let storage_key = self.entry_key(key);
        let now = self.clock.now();

        let entry = match read_json::<CacheEntry>(self.store.as_ref(), &storage_key) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.record(CacheEvent::Miss);
                return None;
            }
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!(key = %storage_key, %reason, "dropping corrupt cache entry");
                self.remove(&storage_key);
                self.record(CacheEvent::Miss);
                return None;
            }
            Err(e) => {
                warn!(key = %storage_key, error = %e, "cache read failed, treating as miss");
                self.record(CacheEvent::Miss);
                return None;
            }
        };

        let age = entry.age(now);
        if entry.is_expired(now, self.config.ttl()) {
            info!(
                origin = %key.origin,
                dest = %key.destination,
                age_hours = age.num_hours(),
                "cache entry expired"
            );
            self.remove(&storage_key);
            self.record(CacheEvent::Expired);
            self.record(CacheEvent::Miss);
            return None;
        }

        let label = age_label(age);
        info!(
            origin = %key.origin,
            dest = %key.destination,
            date = %key.date,
            age = %label,
            "cache hit"
        );
        self.record(CacheEvent::Hit);

        Some(CachedOffers {
            offers: entry.offers,
            created_at: entry.created_at,
            age_label: label,
        })
    }

    // Store offers for a search, replacing any previous entry. Returns false
    // when the write could not be made even after clearing the cache.
    pub fn set(&self, key: &SearchKey, offers: &[Offer]) -> bool {
        let storage_key = self.entry_key(key);
        let entry = CacheEntry {
            key: key.clone(),
            offers: offers
                .iter()
                .cloned()
                .map(|mut offer| {
                    offer.booking_url = None;
                    offer
                })
                .collect(),
            created_at: self.clock.now(),
        };

        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "failed to serialize cache entry");
                return false;
            }
        };

        match self.store.set(&storage_key, raw.clone()) {
            Ok(()) => {}
            Err(StoreError::Full { needed, available }) => {
                warn!(needed, available, "storage full, clearing flight cache");
                self.reclaim_space();
                if let Err(e) = self.store.set(&storage_key, raw) {
                    warn!(key = %storage_key, error = %e, "cache write failed after clearing");
                    return false;
                }
            }
            Err(e) => {
                warn!(key = %storage_key, error = %e, "cache write failed");
                return false;
            }
        }

        info!(
            origin = %key.origin,
            dest = %key.destination,
            date = %key.date,
            count = offers.len(),
            ttl_hours = self.config.ttl_hours,
            "cached offers"
        );
        self.record(CacheEvent::Save);
        self.cleanup();
        true
    }

    fn entry_keys(&self) -> Vec<String> {
        match self.store.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k.starts_with(&self.entry_prefix))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list cache keys");
                Vec::new()
            }
        }
    }

    // Physically remove expired and corrupt entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl();

        let doomed: Vec<String> = self
            .entry_keys()
            .into_iter()
            .filter(|k| match read_json::<CacheEntry>(self.store.as_ref(), k) {
                Ok(Some(entry)) => entry.is_expired(now, ttl),
                Ok(None) => false,
                Err(StoreError::Corrupt { .. }) => true,
                Err(_) => false,
            })
            .collect();

        for key in &doomed {
            self.remove(key);
        }
        if !doomed.is_empty() {
            info!(removed = doomed.len(), "cache cleanup");
        }
        doomed.len()
    }

    pub fn clear_all(&self) -> usize {
        let keys = self.entry_keys();
        for key in &keys {
            self.remove(key);
        }
        info!(removed = keys.len(), "cleared flight cache");
        keys.len()
    }

    // Frees room after a write hit the store capacity: every flight entry goes
    // and stats keep only today's bucket. Returns the number of entries removed.
    pub fn reclaim_space(&self) -> usize {
        let removed = self.clear_all();
        let today = self.clock.today();

        let result = self.store.update(&self.stats_key, &mut |current| {
            let mut stats: BTreeMap<NaiveDate, DailyCacheCounters> =
                serde_json::from_str(current?).ok()?;
            stats.retain(|day, _| *day == today);
            serde_json::to_string(&stats).ok()
        });
        if let Err(e) = result {
            debug!(error = %e, "failed to trim cache stats");
        }
        removed
    }

    pub fn cached_routes(&self) -> Vec<CachedRoute> {
        let now = self.clock.now();
        let ttl = self.config.ttl();

        let mut routes: Vec<CachedRoute> = self
            .entry_keys()
            .iter()
            .filter_map(|k| read_json::<CacheEntry>(self.store.as_ref(), k).ok().flatten())
            .filter(|entry| !entry.is_expired(now, ttl))
            .map(|entry| {
                let age_hours = entry.age(now).num_hours();
                CachedRoute {
                    route: entry.key.route(),
                    date: entry.key.date,
                    offer_count: entry.offers.len(),
                    age_hours,
                    expires_in_hours: ttl.num_hours() - age_hours,
                }
            })
            .collect();

        routes.sort_by(|a, b| a.route.cmp(&b.route).then(a.date.cmp(&b.date)));
        routes
    }

    fn load_stats(&self) -> BTreeMap<NaiveDate, DailyCacheCounters> {
        match read_json(self.store.as_ref(), &self.stats_key) {
            Ok(Some(stats)) => stats,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                debug!(error = %e, "cache stats unreadable");
                BTreeMap::new()
            }
        }
    }

    fn record(&self, event: CacheEvent) {
        let today = self.clock.today();
        let result = self.store.update(&self.stats_key, &mut |current| {
            let mut stats: BTreeMap<NaiveDate, DailyCacheCounters> = current
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default();
            let day = stats.entry(today).or_default();
            match event {
                CacheEvent::Hit => day.hits += 1,
                CacheEvent::Miss => day.misses += 1,
                CacheEvent::Save => day.saves += 1,
                CacheEvent::Expired => day.expired += 1,
            }
            let oldest = today - chrono::Duration::days(STATS_RETENTION_DAYS - 1);
            stats.retain(|day, _| *day >= oldest);
            serde_json::to_string(&stats).ok()
        });

        if let Err(e) = result {
            debug!(error = %e, "failed to record cache stat");
        }
    }

    pub fn stats(&self) -> CacheStatsReport {
        let stats = self.load_stats();
        let today = stats
            .get(&self.clock.today())
            .copied()
            .unwrap_or_default();

        let total = stats
            .values()
            .fold(DailyCacheCounters::default(), |mut acc, day| {
                acc.hits += day.hits;
                acc.misses += day.misses;
                acc.saves += day.saves;
                acc.expired += day.expired;
                acc
            });

        let requests = total.hits + total.misses;
        let hit_rate = if requests == 0 {
            0.0
        } else {
            (total.hits as f64 / requests as f64 * 1000.0).round() / 10.0
        };

        CacheStatsReport {
            today,
            total,
            requests,
            hit_rate,
            cached_keys: self.entry_keys().len(),
        }
    }
}
