//! Probe module for service monitoring.
//!
//! Supports HTTP status checks and Minecraft server-list-ping queries. A
//! driver never fails: every error becomes a failed [`PingOutcome`].

mod http;
mod minecraft;

pub use http::*;
pub use minecraft::*;

use crate::db::{MonitoredTarget, PingRecord, PlayerCounts, ProbeKind};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Timeout for a single HTTP probe.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a whole game-server status exchange.
pub const GAME_SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// The result of one probe attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PingOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub error_message: Option<String>,
    pub players: Option<PlayerCounts>,
}

impl PingOutcome {
    /// A failed outcome carrying the error text.
    pub fn failed(latency_ms: f64, error: impl ToString) -> Self {
        Self {
            success: false,
            status_code: None,
            latency_ms,
            error_message: Some(error.to_string()),
            players: None,
        }
    }

    /// Turn the outcome into a record for `target_id`, completed at `timestamp`.
    pub fn into_record(self, target_id: i64, timestamp: DateTime<Utc>) -> PingRecord {
        PingRecord {
            id: 0,
            target_id,
            timestamp,
            status_code: self.status_code,
            latency_ms: self.latency_ms,
            success: self.success,
            error_message: self.error_message,
            players: self.players,
        }
    }
}

/// Something that can check a target.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &MonitoredTarget) -> PingOutcome;
}

/// Dispatches to the real network drivers by probe kind.
pub struct NetworkProber {
    client: reqwest::Client,
    game_server_timeout: Duration,
}

impl NetworkProber {
    pub fn new() -> Result<Self, ProbeError> {
        Self::with_timeouts(HTTP_TIMEOUT, GAME_SERVER_TIMEOUT)
    }

    pub fn with_timeouts(http_timeout: Duration, game_server_timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .user_agent(concat!("pingboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            game_server_timeout,
        })
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn probe(&self, target: &MonitoredTarget) -> PingOutcome {
        // Add jitter to avoid thundering herd
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        match target.kind {
            ProbeKind::Http => {
                run_http_probe(&self.client, &target.address, target.expected_status_code).await
            }
            ProbeKind::GameServer => {
                run_game_server_probe(&target.address, target.port, self.game_server_timeout).await
            }
        }
    }
}
