//! Cadence rules for turning a target's interval into a timer period.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// The effective firing interval of a timer.
///
/// Intervals under a minute fire every N seconds. Anything from 60 seconds up
/// is truncated to whole minutes, so 90s fires once a minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    EverySeconds(u32),
    EveryMinutes(u32),
}

impl Cadence {
    pub fn from_interval(interval_seconds: u32) -> Self {
        let secs = interval_seconds.max(1);
        if secs < 60 {
            Cadence::EverySeconds(secs)
        } else {
            Cadence::EveryMinutes(secs / 60)
        }
    }

    pub fn period(&self) -> Duration {
        match *self {
            Cadence::EverySeconds(n) => Duration::from_secs(u64::from(n)),
            Cadence::EveryMinutes(n) => Duration::from_secs(u64::from(n) * 60),
        }
    }

    /// Time from `now` until the next wall-clock multiple of the period,
    /// counted from the Unix epoch. Periods of an hour or more are not
    /// special-cased, so 90 minutes fires every 90 minutes.
    pub fn delay_until_next_tick(&self, now: DateTime<Utc>) -> Duration {
        let period_ms = self.period().as_millis() as i64;
        let rem = now.timestamp_millis().rem_euclid(period_ms);
        Duration::from_millis((period_ms - rem) as u64)
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Cadence::EverySeconds(1) => write!(f, "every second"),
            Cadence::EverySeconds(n) => write!(f, "every {} seconds", n),
            Cadence::EveryMinutes(1) => write!(f, "every minute"),
            Cadence::EveryMinutes(n) => write!(f, "every {} minutes", n),
        }
    }
}
