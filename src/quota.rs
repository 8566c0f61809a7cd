// Monthly quota tracker for the metered live provider
// Keeps one record per calendar month in the shared store. Reads never fail:
// a missing, stale or unreadable record is replaced by a fresh one.

use crate::clock::Clock;
use crate::config::QuotaConfig;
use crate::store::{read_json, write_json, KeyValueStore, StoreError};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

// Persisted usage for one month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    // "YYYY-MM"
    pub month: String,
    pub used: u32,
    pub limit: u32,
    pub first_request: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
    #[serde(default)]
    pub daily_breakdown: BTreeMap<NaiveDate, u32>,
}

impl QuotaRecord {
    pub fn fresh(month: &str, limit: u32) -> Self {
        Self {
            month: month.to_string(),
            used: 0,
            limit,
            first_request: None,
            last_request: None,
            daily_breakdown: BTreeMap::new(),
        }
    }
}

// Snapshot reported to callers, with derived values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub month: String,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub percent_used: f64,
    pub is_warning: bool,
    pub is_limit_reached: bool,
    pub daily_average: u32,
    pub projected_monthly: u32,
    pub first_request: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub status: QuotaStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub requests: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyRecommendation {
    pub recommended: u32,
    pub today_used: u32,
    pub today_remaining: u32,
    pub days_remaining: u32,
}

pub fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    first_of_next_month(date)
        .pred_opt()
        .map_or(30, |last| last.day())
}

// Frees store space when a write hits the capacity limit. Returns how many
// entries were removed.
pub type SpaceReclaimer = Arc<dyn Fn() -> usize + Send + Sync>;

pub struct QuotaTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
    key: String,
    reclaim: Option<SpaceReclaimer>,
}

impl QuotaTracker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: QuotaConfig,
        key_prefix: &str,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            key: format!("{}:metered_quota", key_prefix),
            reclaim: None,
        }
    }

    // Called once when recording usage finds the store full
    pub fn with_reclaimer(mut self, reclaim: SpaceReclaimer) -> Self {
        self.reclaim = Some(reclaim);
        self
    }

    pub fn limit(&self) -> u32 {
        self.config.monthly_limit
    }

    fn current_month(&self) -> String {
        self.clock.now().format("%Y-%m").to_string()
    }

    fn warning_at(&self) -> u32 {
        (self.config.monthly_limit as f64 * self.config.warning_threshold).ceil() as u32
    }

    fn start_fresh(&self, month: &str) -> QuotaRecord {
        let record = QuotaRecord::fresh(month, self.config.monthly_limit);
        if let Err(e) = write_json(self.store.as_ref(), &self.key, &record) {
            warn!(error = %e, "failed to persist fresh quota record");
        }
        record
    }

    fn load_record(&self) -> QuotaRecord {
        let month = self.current_month();
        match read_json::<QuotaRecord>(self.store.as_ref(), &self.key) {
            Ok(Some(record)) if record.month == month => record,
            Ok(Some(stale)) => {
                info!(
                    previous = %stale.month,
                    current = %month,
                    "new month detected, resetting quota counter"
                );
                self.start_fresh(&month)
            }
            Ok(None) => self.start_fresh(&month),
            Err(e) => {
                warn!(error = %e, "quota record unreadable, starting fresh");
                self.start_fresh(&month)
            }
        }
    }

    fn describe(&self, record: &QuotaRecord) -> QuotaStatus {
        let limit = self.config.monthly_limit;
        let used = record.used;
        let percent_used = if limit == 0 {
            100.0
        } else {
            (used as f64 / limit as f64 * 1000.0).round() / 10.0
        };

        let active_days = record.daily_breakdown.len() as u32;
        let daily_average = if active_days == 0 {
            0
        } else {
            (used as f64 / active_days as f64).round() as u32
        };
        let projected_monthly = daily_average * days_in_month(self.clock.today());

        QuotaStatus {
            month: record.month.clone(),
            used,
            limit,
            remaining: limit.saturating_sub(used),
            percent_used,
            is_warning: used >= self.warning_at(),
            is_limit_reached: used >= limit,
            daily_average,
            projected_monthly,
            first_request: record.first_request,
            last_request: record.last_request,
        }
    }

    // Current month's usage. Persists a fresh record when none exists for
    // this month.
    pub fn status(&self) -> QuotaStatus {
        let record = self.load_record();
        self.describe(&record)
    }

    pub fn can_make_request(&self) -> QuotaDecision {
        let status = self.status();

        if status.is_limit_reached {
            warn!(limit = status.limit, "monthly quota reached");
            return QuotaDecision {
                allowed: false,
                reason: Some(format!(
                    "Monthly limit of {} API calls reached. Resets on {}.",
                    status.limit,
                    self.reset_date().format("%-d %b %Y")
                )),
                status,
            };
        }

        if status.is_warning {
            warn!(
                remaining = status.remaining,
                "metered quota nearly exhausted"
            );
        }

        QuotaDecision {
            allowed: true,
            reason: None,
            status,
        }
    }

    // Charge one successful metered call against this month's budget.
    pub fn record_request(&self) -> QuotaStatus {
        let now = self.clock.now();
        let today = now.date_naive();
        let month = now.format("%Y-%m").to_string();
        let limit = self.config.monthly_limit;

        let mut updated: Option<QuotaRecord> = None;
        let mut apply = |current: Option<&str>| {
            let mut record = current
                .and_then(|raw| serde_json::from_str::<QuotaRecord>(raw).ok())
                .filter(|r| r.month == month)
                .unwrap_or_else(|| QuotaRecord::fresh(&month, limit));

            record.used += 1;
            record.limit = limit;
            record.last_request = Some(now);
            record.first_request.get_or_insert(now);
            *record.daily_breakdown.entry(today).or_insert(0) += 1;

            let raw = serde_json::to_string(&record).ok();
            updated = Some(record);
            raw
        };

        let mut result = self.store.update(&self.key, &mut apply);
        if matches!(result, Err(StoreError::Full { .. })) {
            if let Some(reclaim) = &self.reclaim {
                let freed = reclaim();
                warn!(freed, "storage full while recording quota usage, retrying");
                result = self.store.update(&self.key, &mut apply);
            }
        }

        if let Err(e) = result {
            warn!(error = %e, "failed to record quota usage");
            return self.status();
        }

        match updated {
            Some(record) => {
                let status = self.describe(&record);
                info!(
                    used = status.used,
                    limit = status.limit,
                    percent = status.percent_used,
                    "metered quota usage recorded"
                );
                if status.used > status.limit {
                    warn!(
                        used = status.used,
                        limit = status.limit,
                        "metered usage exceeded the monthly limit"
                    );
                }
                status
            }
            None => self.status(),
        }
    }

    pub fn reset_date(&self) -> NaiveDate {
        first_of_next_month(self.clock.today())
    }

    // Per-day usage, most recent first
    pub fn usage_history(&self) -> Vec<DailyUsage> {
        let record = self.load_record();
        record
            .daily_breakdown
            .iter()
            .rev()
            .map(|(date, requests)| DailyUsage {
                date: *date,
                requests: *requests,
            })
            .collect()
    }

    pub fn daily_recommendation(&self) -> DailyRecommendation {
        let record = self.load_record();
        let status = self.describe(&record);
        let today = self.clock.today();

        let days_remaining = days_in_month(today) - today.day() + 1;
        let recommended = status.remaining / days_remaining;
        let today_used = record.daily_breakdown.get(&today).copied().unwrap_or(0);

        DailyRecommendation {
            recommended,
            today_used,
            today_remaining: recommended.saturating_sub(today_used),
            days_remaining,
        }
    }

    pub fn reset(&self) -> QuotaStatus {
        if let Err(e) = self.store.delete(&self.key) {
            warn!(error = %e, "failed to delete quota record");
        }
        info!("metered quota reset");
        let record = QuotaRecord::fresh(&self.current_month(), self.config.monthly_limit);
        self.describe(&record)
    }
}
