// Resolver configuration
// Defaults match the free-tier limits of the live provider; every value can be
// overridden from the environment.

use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

// Cache configuration options
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_hours: 16 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours as i64)
    }
}

// Monthly budget for the metered provider
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub monthly_limit: u32,
    // Fraction of the limit at which usage is reported as a warning
    pub warning_threshold: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            monthly_limit: 2000,
            warning_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeteredConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub currency: String,
    pub max_results: u32,
    pub cooldown_seconds: u64,
    pub min_request_interval_ms: u64,
    pub token_refresh_margin_seconds: i64,
}

impl Default for MeteredConfig {
    fn default() -> Self {
        Self {
            base_url: "https://test.api.amadeus.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            currency: "INR".to_string(),
            max_results: 10,
            cooldown_seconds: 60,
            min_request_interval_ms: 1000,
            token_refresh_margin_seconds: 300,
        }
    }
}

impl MeteredConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BulkConfig {
    pub base_url: String,
    pub token: String,
    pub currency: String,
    pub market: String,
    pub limit: u32,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.travelpayouts.com".to_string(),
            token: String::new(),
            currency: "inr".to_string(),
            market: "in".to_string(),
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkConfig {
    pub marker: String,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    // Namespace for every key written to the store
    pub key_prefix: String,
    pub provider_timeout: Duration,
    pub cache: CacheConfig,
    pub quota: QuotaConfig,
    pub metered: MeteredConfig,
    pub bulk: BulkConfig,
    pub links: LinkConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            key_prefix: "look_to_book".to_string(),
            provider_timeout: Duration::from_secs(10),
            cache: CacheConfig::default(),
            quota: QuotaConfig::default(),
            metered: MeteredConfig::default(),
            bulk: BulkConfig::default(),
            links: LinkConfig::default(),
        }
    }
}

impl ResolverConfig {
    // Build a configuration from defaults overridden by environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("AMADEUS_API_KEY") {
            config.metered.api_key = v;
        }
        if let Some(v) = lookup("AMADEUS_API_SECRET") {
            config.metered.api_secret = v;
        }
        if let Some(v) = lookup("AMADEUS_BASE_URL") {
            config.metered.base_url = v;
        }
        if let Some(v) = lookup("TRAVELPAYOUTS_TOKEN") {
            config.bulk.token = v;
        }
        if let Some(v) = lookup("TRAVELPAYOUTS_MARKER") {
            config.links.marker = v;
        }
        if let Some(v) = lookup("LOOK_TO_BOOK_KEY_PREFIX") {
            config.key_prefix = v;
        }
        if let Some(v) = parse_var(&lookup, "QUOTA_MONTHLY_LIMIT")? {
            config.quota.monthly_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "QUOTA_WARNING_THRESHOLD")? {
            config.quota.warning_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHE_TTL_HOURS")? {
            config.cache.ttl_hours = v;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "PROVIDER_TIMEOUT_MS")? {
            config.provider_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.quota.monthly_limit == 0 {
            bail!("QUOTA_MONTHLY_LIMIT must be greater than zero");
        }
        if !(self.quota.warning_threshold > 0.0 && self.quota.warning_threshold <= 1.0) {
            bail!(
                "QUOTA_WARNING_THRESHOLD must be in (0, 1], got {}",
                self.quota.warning_threshold
            );
        }
        if self.cache.ttl_hours == 0 {
            bail!("CACHE_TTL_HOURS must be greater than zero");
        }
        if self.provider_timeout.is_zero() {
            bail!("PROVIDER_TIMEOUT_MS must be greater than zero");
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {name}: '{raw}'"))
        })
        .transpose()
}
