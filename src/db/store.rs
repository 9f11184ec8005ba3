//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const TARGET_COLUMNS: &str = "id, title, description, kind, address, port, server_ip, whitelist_enabled, \
     modpack_url, interval_seconds, expected_status_code, is_active, sort_order, created_at";

const PING_COLUMNS: &str =
    "id, target_id, timestamp, status_code, latency_ms, success, error_message, players_online, players_max";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(idx, _, err) => {
                DbError::Corrupt(format!("column {}: {}", idx, err))
            }
            e => DbError::Sqlite(e),
        }
    }
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Bring the schema up to date.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn.lock().unwrap();
        let report = embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        for migration in report.applied_migrations() {
            tracing::info!("Applied migration {}", migration);
        }
        Ok(())
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID. The target is appended to the
    /// end of the sort order.
    pub fn add_target(&self, target: &mut MonitoredTarget) -> Result<i64, DbError> {
        target.normalize();

        let conn = self.conn.lock().unwrap();
        let max_sort: Option<i64> =
            conn.query_row("SELECT MAX(sort_order) FROM targets", [], |r| r.get(0))?;
        target.sort_order = max_sort.map_or(0, |s| s + 1);

        conn.execute(
            "INSERT INTO targets (title, description, kind, address, port, server_ip, whitelist_enabled, \
             modpack_url, interval_seconds, expected_status_code, is_active, sort_order, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                target.title,
                target.description,
                target.kind.as_str(),
                target.address,
                target.port,
                target.server_ip,
                target.whitelist_enabled,
                target.modpack_url,
                target.interval_seconds,
                target.expected_status_code,
                target.is_active,
                target.sort_order,
                format_db_time(target.created_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update an existing target. The creation time is never rewritten.
    pub fn update_target(&self, target: &MonitoredTarget) -> Result<(), DbError> {
        let mut target = target.clone();
        target.normalize();

        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE targets SET title=?1, description=?2, kind=?3, address=?4, port=?5, server_ip=?6, \
             whitelist_enabled=?7, modpack_url=?8, interval_seconds=?9, expected_status_code=?10, \
             is_active=?11, sort_order=?12 WHERE id=?13",
            params![
                target.title,
                target.description,
                target.kind.as_str(),
                target.address,
                target.port,
                target.server_ip,
                target.whitelist_enabled,
                target.modpack_url,
                target.interval_seconds,
                target.expected_status_code,
                target.is_active,
                target.sort_order,
                target.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get all targets in display order.
    pub fn get_targets(&self) -> Result<Vec<MonitoredTarget>, DbError> {
        self.query_targets("")
    }

    /// Get all targets flagged active, in display order.
    pub fn get_active_targets(&self) -> Result<Vec<MonitoredTarget>, DbError> {
        self.query_targets("WHERE is_active = 1")
    }

    fn query_targets(&self, filter: &str) -> Result<Vec<MonitoredTarget>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM targets {} ORDER BY sort_order ASC, id ASC",
            TARGET_COLUMNS, filter
        ))?;

        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<MonitoredTarget, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS),
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Delete a target and its pings.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM pings WHERE target_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    // --- Pings ---

    /// Append a ping record and return its ID.
    pub fn insert_ping(&self, ping: &PingRecord) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pings (target_id, timestamp, status_code, latency_ms, success, error_message, \
             players_online, players_max) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ping.target_id,
                format_db_time(ping.timestamp),
                ping.status_code,
                ping.latency_ms,
                ping.success,
                ping.error_message,
                ping.players.map(|p| p.online),
                ping.players.map(|p| p.max),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get all pings for the given targets at or after `since`, oldest first.
    pub fn get_pings_since(
        &self,
        target_ids: &[i64],
        since: DateTime<Utc>,
    ) -> Result<Vec<PingRecord>, DbError> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (0..target_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM pings WHERE timestamp >= ?1 AND target_id IN ({}) ORDER BY timestamp ASC, id ASC",
            PING_COLUMNS, placeholders
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(target_ids.len() + 1);
        values.push(format_db_time(since).into());
        values.extend(target_ids.iter().map(|id| rusqlite::types::Value::from(*id)));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let pings = stmt
            .query_map(params_from_iter(values), ping_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(pings)
    }

    // --- Status page configuration ---

    /// Get the status page configuration, creating the default row if absent.
    pub fn get_status_config(&self) -> Result<StatusPageConfig, DbError> {
        let conn = self.conn.lock().unwrap();
        if let Some(config) = select_status_config(&conn)? {
            return Ok(config);
        }

        let mut config = StatusPageConfig::default();
        insert_status_config(&conn, &mut config)?;
        Ok(config)
    }

    /// Apply a partial update to the status page configuration.
    pub fn update_status_config(&self, patch: StatusPageConfigPatch) -> Result<StatusPageConfig, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut config = match select_status_config(&conn)? {
            Some(config) => config,
            None => {
                let mut config = StatusPageConfig::default();
                insert_status_config(&conn, &mut config)?;
                config
            }
        };

        patch.apply(&mut config);
        conn.execute(
            "UPDATE status_page_config SET page_title=?1, company_name=?2, logo_url=?3, primary_color=?4, \
             header_text=?5, footer_text=?6 WHERE id=?7",
            params![
                config.page_title,
                config.company_name,
                config.logo_url,
                config.primary_color,
                config.header_text,
                config.footer_text,
                config.id,
            ],
        )?;
        Ok(config)
    }
}

fn select_status_config(conn: &Connection) -> SqlResult<Option<StatusPageConfig>> {
    conn.query_row(
        "SELECT id, page_title, company_name, logo_url, primary_color, header_text, footer_text \
         FROM status_page_config ORDER BY id ASC LIMIT 1",
        [],
        |row| {
            Ok(StatusPageConfig {
                id: row.get(0)?,
                page_title: row.get(1)?,
                company_name: row.get(2)?,
                logo_url: row.get(3)?,
                primary_color: row.get(4)?,
                header_text: row.get(5)?,
                footer_text: row.get(6)?,
            })
        },
    )
    .optional()
}

fn insert_status_config(conn: &Connection, config: &mut StatusPageConfig) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO status_page_config (page_title, company_name, logo_url, primary_color, header_text, footer_text) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            config.page_title,
            config.company_name,
            config.logo_url,
            config.primary_color,
            config.header_text,
            config.footer_text,
        ],
    )?;
    config.id = conn.last_insert_rowid();
    Ok(())
}

fn target_from_row(row: &Row<'_>) -> SqlResult<MonitoredTarget> {
    let kind: String = row.get(3)?;
    let kind = kind
        .parse::<ProbeKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;

    Ok(MonitoredTarget {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        kind,
        address: row.get(4)?,
        port: row.get(5)?,
        server_ip: row.get(6)?,
        whitelist_enabled: row.get(7)?,
        modpack_url: row.get(8)?,
        interval_seconds: row.get(9)?,
        expected_status_code: row.get(10)?,
        is_active: row.get(11)?,
        sort_order: row.get(12)?,
        created_at: time_column(row, 13)?,
    })
}

fn ping_from_row(row: &Row<'_>) -> SqlResult<PingRecord> {
    let online: Option<u32> = row.get(7)?;
    let max: Option<u32> = row.get(8)?;

    Ok(PingRecord {
        id: row.get(0)?,
        target_id: row.get(1)?,
        timestamp: time_column(row, 2)?,
        status_code: row.get(3)?,
        latency_ms: row.get(4)?,
        success: row.get(5)?,
        error_message: row.get(6)?,
        players: online.zip(max).map(|(online, max)| PlayerCounts { online, max }),
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("bad timestamp: {}", s).into())
    })
}

fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
