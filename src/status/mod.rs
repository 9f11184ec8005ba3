//! Status aggregation for the public status page.
//!
//! Reads the trailing window of pings for every active target and derives
//! per-day uptime, overall uptime and a live status from the latest pings.
//! The computed view is cached process-wide for a short TTL.

mod aggregate;
mod cache;

pub use aggregate::*;
pub use cache::*;

use crate::db::{DbError, PlayerCounts, ProbeKind, StatusPageConfig, Store};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Length of the analysis window.
pub const WINDOW_DAYS: i64 = 90;

/// How many of the most recent pings decide the live status.
pub const LIVE_SAMPLE_SIZE: usize = 10;

pub const DAY_OPERATIONAL_THRESHOLD: f64 = 98.5;
pub const DAY_DEGRADED_THRESHOLD: f64 = 90.0;

pub const LIVE_OPERATIONAL_THRESHOLD: f64 = 90.0;
pub const LIVE_DEGRADED_THRESHOLD: f64 = 50.0;

/// Classification of one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DayState {
    Operational,
    Degraded,
    Down,
    NoData,
}

/// Classification of a target's immediate health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LiveState {
    Operational,
    Degraded,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStatus {
    pub date: NaiveDate,
    pub uptime_percentage: f64,
    pub total_checks: u32,
    pub successful_checks: u32,
    pub status: DayState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub endpoint_id: i64,
    pub endpoint_title: String,
    pub endpoint_description: Option<String>,
    pub endpoint_url: String,
    pub endpoint_type: ProbeKind,
    pub server_ip: Option<String>,
    pub whitelist_enabled: bool,
    pub modpack_url: Option<String>,
    pub overall_uptime: f64,
    #[serde(rename = "last90Days")]
    pub last_90_days: Vec<DayStatus>,
    pub current_status: LiveState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_players: Option<PlayerCounts>,
}

/// Everything the status page renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub config: StatusPageConfig,
    pub endpoints: Vec<TargetStatus>,
}

/// Computes the status view on demand and caches it for `ttl`.
///
/// Two callers missing the cache at once both recompute; the inputs are the
/// same so either result is fine.
pub struct StatusAggregator {
    store: Arc<Store>,
    cache: TtlCache<StatusView>,
}

impl StatusAggregator {
    pub fn new(store: Arc<Store>, ttl: Duration) -> Self {
        Self {
            store,
            cache: TtlCache::new(ttl),
        }
    }

    /// The current view, from cache when fresh.
    pub fn status(&self) -> Result<Arc<StatusView>, DbError> {
        self.status_at(Instant::now(), Utc::now())
    }

    fn status_at(&self, clock: Instant, now: DateTime<Utc>) -> Result<Arc<StatusView>, DbError> {
        if let Some(view) = self.cache.get_at(clock) {
            return Ok(view);
        }

        let view = self.compute(now)?;
        Ok(self.cache.put_at(clock, view))
    }

    /// Build a fresh view with one bulk ping query across all active targets.
    pub fn compute(&self, now: DateTime<Utc>) -> Result<StatusView, DbError> {
        let config = self.store.get_status_config()?;
        let targets = self.store.get_active_targets()?;
        let ids: Vec<i64> = targets.iter().map(|t| t.id).collect();
        let pings = self.store.get_pings_since(&ids, window_start(now))?;

        tracing::debug!(
            "Computed status for {} targets from {} pings",
            targets.len(),
            pings.len()
        );

        Ok(build_view(config, &targets, pings, now))
    }
}
