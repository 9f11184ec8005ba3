//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Smallest polling interval accepted for a target, in seconds.
pub const MIN_INTERVAL_SECONDS: u32 = 10;

/// Default port for Minecraft servers.
pub const DEFAULT_GAME_SERVER_PORT: u16 = 25565;

/// Which probe driver checks a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    Http,
    #[serde(alias = "minecraft")]
    GameServer,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Http => "http",
            ProbeKind::GameServer => "game-server",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(ProbeKind::Http),
            "game-server" | "minecraft" => Ok(ProbeKind::GameServer),
            other => Err(format!("unknown probe kind: {}", other)),
        }
    }
}

/// A monitored target definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredTarget {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: ProbeKind,
    /// URL for http targets, host (optionally `host:port`) for game servers.
    #[serde(rename = "url")]
    pub address: String,
    pub port: Option<u16>,
    /// Address shown to players, game servers only.
    pub server_ip: Option<String>,
    pub whitelist_enabled: bool,
    pub modpack_url: Option<String>,
    pub interval_seconds: u32,
    pub expected_status_code: u16,
    pub is_active: bool,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

impl Default for MonitoredTarget {
    fn default() -> Self {
        Self {
            id: 0,
            title: String::new(),
            description: None,
            kind: ProbeKind::Http,
            address: String::new(),
            port: None,
            server_ip: None,
            whitelist_enabled: false,
            modpack_url: None,
            interval_seconds: 60,
            expected_status_code: 200,
            is_active: true,
            sort_order: 0,
            created_at: Utc::now(),
        }
    }
}

impl MonitoredTarget {
    /// Drop fields that only mean something for the other probe kind.
    pub fn normalize(&mut self) {
        if self.interval_seconds < MIN_INTERVAL_SECONDS {
            self.interval_seconds = MIN_INTERVAL_SECONDS;
        }
        match self.kind {
            ProbeKind::Http => {
                self.port = None;
                self.server_ip = None;
                self.whitelist_enabled = false;
                self.modpack_url = None;
            }
            ProbeKind::GameServer => {
                if self.port.is_none() {
                    self.port = Some(DEFAULT_GAME_SERVER_PORT);
                }
            }
        }
    }
}

/// Online/max player counts reported by a game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCounts {
    pub online: u32,
    pub max: u32,
}

/// A single probe outcome as written to the store. Never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRecord {
    pub id: i64,
    pub target_id: i64,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub players: Option<PlayerCounts>,
}

/// Branding for the public status page. A single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPageConfig {
    pub id: i64,
    pub page_title: String,
    pub company_name: String,
    pub logo_url: Option<String>,
    pub primary_color: String,
    pub header_text: Option<String>,
    pub footer_text: Option<String>,
}

impl Default for StatusPageConfig {
    fn default() -> Self {
        Self {
            id: 0,
            page_title: "Status".to_string(),
            company_name: "Pingboard".to_string(),
            logo_url: None,
            primary_color: "#3b82f6".to_string(),
            header_text: None,
            footer_text: None,
        }
    }
}

/// Partial update of the status page configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPageConfigPatch {
    pub page_title: Option<String>,
    pub company_name: Option<String>,
    pub logo_url: Option<String>,
    pub primary_color: Option<String>,
    pub header_text: Option<String>,
    pub footer_text: Option<String>,
}

impl StatusPageConfigPatch {
    pub fn apply(self, config: &mut StatusPageConfig) {
        if let Some(v) = self.page_title {
            config.page_title = v;
        }
        if let Some(v) = self.company_name {
            config.company_name = v;
        }
        if let Some(v) = self.logo_url {
            config.logo_url = Some(v);
        }
        if let Some(v) = self.primary_color {
            config.primary_color = v;
        }
        if let Some(v) = self.header_text {
            config.header_text = Some(v);
        }
        if let Some(v) = self.footer_text {
            config.footer_text = Some(v);
        }
    }
}
