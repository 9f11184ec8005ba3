//! Turning raw pings into per-day and live status.

use crate::db::{MonitoredTarget, PingRecord, ProbeKind, StatusPageConfig};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashMap;

use super::{
    DayState, DayStatus, LiveState, StatusView, TargetStatus, DAY_DEGRADED_THRESHOLD, DAY_OPERATIONAL_THRESHOLD,
    LIVE_DEGRADED_THRESHOLD, LIVE_OPERATIONAL_THRESHOLD, LIVE_SAMPLE_SIZE, WINDOW_DAYS,
};

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    total: u32,
    successful: u32,
}

impl Tally {
    fn add(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.successful += 1;
        }
    }

    fn of<'a>(pings: impl IntoIterator<Item = &'a PingRecord>) -> Self {
        let mut tally = Tally::default();
        for p in pings {
            tally.add(p.success);
        }
        tally
    }

    /// Success rate in percent; 100 when nothing was checked.
    fn uptime(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            f64::from(self.successful) * 100.0 / f64::from(self.total)
        }
    }
}

/// Start of the analysis window ending at `now`.
pub fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - ChronoDuration::days(WINDOW_DAYS)
}

pub fn classify_day(uptime: f64) -> DayState {
    if uptime >= DAY_OPERATIONAL_THRESHOLD {
        DayState::Operational
    } else if uptime >= DAY_DEGRADED_THRESHOLD {
        DayState::Degraded
    } else {
        DayState::Down
    }
}

pub fn classify_live(uptime: f64) -> LiveState {
    if uptime >= LIVE_OPERATIONAL_THRESHOLD {
        LiveState::Operational
    } else if uptime >= LIVE_DEGRADED_THRESHOLD {
        LiveState::Degraded
    } else {
        LiveState::Down
    }
}

/// Build the status view for `targets` from every ping fetched for them.
pub fn build_view(
    config: StatusPageConfig,
    targets: &[MonitoredTarget],
    pings: Vec<PingRecord>,
    now: DateTime<Utc>,
) -> StatusView {
    let mut by_target: HashMap<i64, Vec<PingRecord>> = HashMap::new();
    for ping in pings {
        by_target.entry(ping.target_id).or_default().push(ping);
    }

    let endpoints = targets
        .iter()
        .map(|t| {
            let pings = by_target.get(&t.id).map(Vec::as_slice).unwrap_or(&[]);
            summarize_target(t, pings, now)
        })
        .collect();

    StatusView { config, endpoints }
}

/// Summarize one target. `pings` must be ordered oldest first; anything
/// outside the window is ignored.
pub fn summarize_target(target: &MonitoredTarget, pings: &[PingRecord], now: DateTime<Utc>) -> TargetStatus {
    let start = window_start(now);
    let in_window: Vec<&PingRecord> = pings
        .iter()
        .filter(|p| p.timestamp >= start && p.timestamp <= now)
        .collect();

    let mut by_date: HashMap<NaiveDate, Tally> = HashMap::new();
    for p in &in_window {
        by_date.entry(p.timestamp.date_naive()).or_default().add(p.success);
    }

    let created = target.created_at.date_naive();
    let last_day = now.date_naive();
    let days = start
        .date_naive()
        .iter_days()
        .take_while(|d| *d <= last_day)
        .map(|date| {
            let tally = by_date.get(&date).copied().unwrap_or_default();
            let status = if date < created || tally.total == 0 {
                DayState::NoData
            } else {
                classify_day(tally.uptime())
            };
            DayStatus {
                date,
                uptime_percentage: tally.uptime(),
                total_checks: tally.total,
                successful_checks: tally.successful,
                status,
            }
        })
        .collect();

    let recent_from = in_window.len().saturating_sub(LIVE_SAMPLE_SIZE);
    let recent = Tally::of(in_window[recent_from..].iter().copied());

    let current_players = match target.kind {
        ProbeKind::GameServer => in_window.last().and_then(|p| p.players),
        ProbeKind::Http => None,
    };

    TargetStatus {
        endpoint_id: target.id,
        endpoint_title: target.title.clone(),
        endpoint_description: target.description.clone(),
        endpoint_url: target.address.clone(),
        endpoint_type: target.kind,
        server_ip: target.server_ip.clone(),
        whitelist_enabled: target.whitelist_enabled,
        modpack_url: target.modpack_url.clone(),
        overall_uptime: Tally::of(in_window.iter().copied()).uptime(),
        last_90_days: days,
        current_status: classify_live(recent.uptime()),
        current_players,
    }
}
