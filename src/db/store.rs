//! SQLite database store implementation.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Not found")]
    NotFound,
    #[error("Already exists: {0}")]
    Duplicate(String),
    #[error("Store lock poisoned")]
    Poisoned,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";
const DATE_FORMAT: &str = "%Y-%m-%d";

const SITE_COLUMNS: &str = "id, owner, name, url, description, status, response_time, last_check, \
     uptime, average_response_time, notifications, monitoring_token, created_at";

/// Thread-safe database store.
///
/// Writers are not coordinated beyond the connection mutex: two read-modify-write
/// cycles on the same site resolve as last write wins.
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

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Sites ---

    /// Insert a freshly authorized site in `pending` state.
    pub fn add_site(&self, new: NewSite, now: DateTime<Utc>) -> Result<Site, DbError> {
        let mut site = Site {
            owner: new.owner,
            name: new.name,
            url: new.url,
            description: new.description,
            monitoring_token: new.monitoring_token,
            last_check: now,
            created_at: now,
            ..Default::default()
        };
        let notifications = serde_json::to_string(&site.notifications)?;

        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO sites (owner, name, url, description, status, response_time, last_check, \
             uptime, average_response_time, notifications, monitoring_token, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                site.owner,
                site.name,
                site.url,
                site.description,
                site.status.as_str(),
                site.response_time,
                format_db_time(site.last_check),
                site.uptime,
                site.average_response_time,
                notifications,
                site.monitoring_token,
                format_db_time(site.created_at),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(DbError::Duplicate(format!("site {}", site.url)));
            }
            Err(e) => return Err(e.into()),
        }

        site.id = conn.last_insert_rowid();
        Ok(site)
    }

    /// Get a site with its full history and daily buckets.
    pub fn get_site(&self, id: i64) -> Result<Site, DbError> {
        let conn = self.conn()?;
        let mut site = conn
            .query_row(
                &format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS),
                params![id],
                site_from_row,
            )
            .optional()?
            .ok_or(DbError::NotFound)?;

        site.status_history = load_history(&conn, id)?;
        site.daily_stats = load_daily_stats(&conn, id)?;
        Ok(site)
    }

    /// List sites, newest first, with daily buckets but without history.
    pub fn list_sites(&self, owner: Option<&str>) -> Result<Vec<Site>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sites WHERE (?1 IS NULL OR owner = ?1) ORDER BY created_at DESC, id DESC",
            SITE_COLUMNS
        ))?;

        let mut sites = stmt
            .query_map(params![owner], site_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        for site in &mut sites {
            site.daily_stats = load_daily_stats(&conn, site.id)?;
        }

        Ok(sites)
    }

    /// IDs of every registered site.
    pub fn get_site_ids(&self) -> Result<Vec<i64>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM sites ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Persist the monitoring state of a site: status, derived stats, history and daily buckets.
    pub fn save_site_state(&self, site: &Site) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let updated = tx.execute(
            "UPDATE sites SET status = ?1, response_time = ?2, last_check = ?3, uptime = ?4, \
             average_response_time = ?5 WHERE id = ?6",
            params![
                site.status.as_str(),
                site.response_time,
                format_db_time(site.last_check),
                site.uptime,
                site.average_response_time,
                site.id,
            ],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }

        tx.execute("DELETE FROM status_history WHERE site_id = ?1", params![site.id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO status_history (site_id, time, status, response_time, status_code, error, visitors) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for entry in &site.status_history {
                stmt.execute(params![
                    site.id,
                    format_db_time(entry.timestamp),
                    entry.status.as_str(),
                    entry.response_time,
                    entry.status_code,
                    entry.error,
                    entry.visitors,
                ])?;
            }
        }

        tx.execute("DELETE FROM daily_stats WHERE site_id = ?1", params![site.id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO daily_stats (site_id, date, uptime, average_response_time, error_count, total_checks, visitors) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for bucket in &site.daily_stats {
                stmt.execute(params![
                    site.id,
                    bucket.date.format(DATE_FORMAT).to_string(),
                    bucket.uptime,
                    bucket.average_response_time,
                    bucket.error_count,
                    bucket.total_checks,
                    bucket.visitors,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Replace the notification settings of a site.
    pub fn update_notifications(&self, id: i64, notifications: &Notifications) -> Result<(), DbError> {
        let json = serde_json::to_string(notifications)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sites SET notifications = ?1 WHERE id = ?2",
            params![json, id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Replace the monitoring token of a site.
    pub fn update_token(&self, id: i64, token: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sites SET monitoring_token = ?1 WHERE id = ?2",
            params![token, id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Delete a site and everything that belongs to it.
    pub fn delete_site(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM alerts WHERE site_id = ?1", params![id])?;
        tx.execute("DELETE FROM daily_stats WHERE site_id = ?1", params![id])?;
        tx.execute("DELETE FROM status_history WHERE site_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM sites WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    // --- Daily stats retention ---

    /// Delete daily buckets dated before `cutoff`, optionally restricted to one owner.
    ///
    /// Returns the number of buckets removed.
    pub fn delete_daily_stats_before(&self, owner: Option<&str>, cutoff: NaiveDate) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM daily_stats WHERE date < ?1 \
             AND site_id IN (SELECT id FROM sites WHERE ?2 IS NULL OR owner = ?2)",
            params![cutoff.format(DATE_FORMAT).to_string(), owner],
        )?;
        Ok(removed)
    }

    // --- Alerts ---

    /// Persist a new unacknowledged alert.
    pub fn add_alert(
        &self,
        site_id: i64,
        message: &str,
        severity: Severity,
        time: DateTime<Utc>,
    ) -> Result<Alert, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO alerts (site_id, message, severity, time, acknowledged) VALUES (?1, ?2, ?3, ?4, 0)",
            params![site_id, message, severity.as_str(), format_db_time(time)],
        )?;

        Ok(Alert {
            id: conn.last_insert_rowid(),
            site_id,
            message: message.to_string(),
            severity,
            timestamp: time,
            acknowledged: false,
        })
    }

    /// Get all alerts for a site, newest first.
    pub fn get_alerts(&self, site_id: i64) -> Result<Vec<Alert>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, site_id, message, severity, time, acknowledged FROM alerts \
             WHERE site_id = ?1 ORDER BY time DESC, id DESC",
        )?;

        let alerts = stmt
            .query_map(params![site_id], |row| {
                let severity: String = row.get(3)?;
                Ok(Alert {
                    id: row.get(0)?,
                    site_id: row.get(1)?,
                    message: row.get(2)?,
                    severity: severity
                        .parse()
                        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?,
                    timestamp: time_column(row, 4)?,
                    acknowledged: row.get(5)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(alerts)
    }

    /// Latest unacknowledged alerts across an owner's sites.
    pub fn get_recent_alerts(&self, owner: &str, limit: i64) -> Result<Vec<RecentAlert>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, s.name, a.message, a.severity, a.time FROM alerts a \
             JOIN sites s ON a.site_id = s.id \
             WHERE a.acknowledged = 0 AND s.owner = ?1 \
             ORDER BY a.time DESC, a.id DESC LIMIT ?2",
        )?;

        let alerts = stmt
            .query_map(params![owner, limit], |row| {
                let severity: String = row.get(3)?;
                Ok(RecentAlert {
                    id: row.get(0)?,
                    site_name: row.get(1)?,
                    message: row.get(2)?,
                    severity: severity
                        .parse()
                        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?,
                    timestamp: time_column(row, 4)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(alerts)
    }

    /// Mark an alert as acknowledged.
    pub fn acknowledge_alert(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let updated = conn.execute("UPDATE alerts SET acknowledged = 1 WHERE id = ?1", params![id])?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

fn site_from_row(row: &Row<'_>) -> SqlResult<Site> {
    let status: String = row.get(5)?;
    let notifications: String = row.get(10)?;

    Ok(Site {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        description: row.get(4)?,
        status: status
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))?,
        response_time: row.get(6)?,
        last_check: time_column(row, 7)?,
        uptime: row.get(8)?,
        average_response_time: row.get(9)?,
        status_history: Vec::new(),
        daily_stats: Vec::new(),
        notifications: serde_json::from_str(&notifications)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
        monitoring_token: row.get(11)?,
        created_at: time_column(row, 12)?,
    })
}

fn load_history(conn: &Connection, site_id: i64) -> Result<Vec<HistoryEntry>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT time, status, response_time, status_code, error, visitors FROM status_history \
         WHERE site_id = ?1 ORDER BY id ASC",
    )?;

    let entries = stmt
        .query_map(params![site_id], |row| {
            let status: String = row.get(1)?;
            Ok(HistoryEntry {
                timestamp: time_column(row, 0)?,
                status: status
                    .parse()
                    .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?,
                response_time: row.get(2)?,
                status_code: row.get(3)?,
                error: row.get(4)?,
                visitors: row.get(5)?,
            })
        })?
        .collect::<SqlResult<Vec<_>>>()?;

    Ok(entries)
}

fn load_daily_stats(conn: &Connection, site_id: i64) -> Result<Vec<DailyBucket>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT date, uptime, average_response_time, error_count, total_checks, visitors FROM daily_stats \
         WHERE site_id = ?1 ORDER BY date ASC",
    )?;

    let buckets = stmt
        .query_map(params![site_id], |row| {
            let date: String = row.get(0)?;
            Ok(DailyBucket {
                date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
                uptime: row.get(1)?,
                average_response_time: row.get(2)?,
                error_count: row.get(3)?,
                total_checks: row.get(4)?,
                visitors: row.get(5)?,
            })
        })?
        .collect::<SqlResult<Vec<_>>>()?;

    Ok(buckets)
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    Ok(parse_db_time(&s).unwrap_or_else(Utc::now))
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}
