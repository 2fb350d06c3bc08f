//! Configuration module for uptrail.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptrail.db")
    pub db_path: String,
    pub monitor: MonitorConfig,
    /// Outbound email; `None` disables the email channel.
    pub smtp: Option<SmtpConfig>,
}

/// Probe, alerting and scheduling knobs.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub settle_delay: Duration,
    pub probe_timeout: Duration,
    pub auth_timeout: Duration,
    pub delivery_timeout: Duration,
    pub max_concurrent_probes: usize,
    /// Up responses slower than this raise a slow-response alert.
    pub slow_response_ms: i64,
    /// Rolling uptime percentage below which a low-availability alert is raised.
    pub availability_threshold: f64,
    /// Optional registration allowlist; `None` allows any domain.
    pub allowed_domains: Option<Vec<String>>,
    pub token_prefix: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true, STARTTLS otherwise.
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptrail.db".to_string(),
            monitor: MonitorConfig::default(),
            smtp: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            settle_delay: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(10_000),
            auth_timeout: Duration::from_millis(10_000),
            delivery_timeout: Duration::from_millis(5_000),
            max_concurrent_probes: 8,
            slow_response_ms: 5_000,
            availability_threshold: 95.0,
            allowed_domains: None,
            token_prefix: "uptrail_".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTRAIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPTRAIL_DB_PATH`: Database file path (default: "uptrail.db")
    /// - `UPTRAIL_CHECK_INTERVAL_SECS`, `UPTRAIL_SETTLE_DELAY_SECS`
    /// - `UPTRAIL_PROBE_TIMEOUT_MS`, `UPTRAIL_AUTH_TIMEOUT_MS`, `UPTRAIL_DELIVERY_TIMEOUT_MS`
    /// - `UPTRAIL_MAX_CONCURRENT_PROBES`
    /// - `UPTRAIL_SLOW_RESPONSE_MS`, `UPTRAIL_AVAILABILITY_THRESHOLD`
    /// - `UPTRAIL_ALLOWED_DOMAINS`: comma-separated allowlist (unset: no restriction)
    /// - `UPTRAIL_TOKEN_PREFIX`
    /// - `UPTRAIL_SMTP_HOST`, `UPTRAIL_SMTP_PORT`, `UPTRAIL_SMTP_SECURE`,
    ///   `UPTRAIL_SMTP_USER`, `UPTRAIL_SMTP_PASS`, `UPTRAIL_SMTP_FROM`
    pub fn load() -> Self {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn load_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let m = &mut cfg.monitor;

        if let Some(port) = parse_var(&lookup, "UPTRAIL_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Some(db_path) = lookup("UPTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "UPTRAIL_CHECK_INTERVAL_SECS").filter(|s| *s > 0) {
            m.check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "UPTRAIL_SETTLE_DELAY_SECS") {
            m.settle_delay = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "UPTRAIL_PROBE_TIMEOUT_MS").filter(|ms| *ms > 0) {
            m.probe_timeout = Duration::from_millis(ms);
        }
        // The authorization check follows the probe timeout unless set explicitly.
        m.auth_timeout = parse_var::<u64, _>(&lookup, "UPTRAIL_AUTH_TIMEOUT_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(m.probe_timeout);
        if let Some(ms) = parse_var::<u64, _>(&lookup, "UPTRAIL_DELIVERY_TIMEOUT_MS").filter(|ms| *ms > 0) {
            m.delivery_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<usize, _>(&lookup, "UPTRAIL_MAX_CONCURRENT_PROBES").filter(|n| *n > 0) {
            m.max_concurrent_probes = n;
        }
        if let Some(ms) = parse_var(&lookup, "UPTRAIL_SLOW_RESPONSE_MS") {
            m.slow_response_ms = ms;
        }
        if let Some(pct) = parse_var(&lookup, "UPTRAIL_AVAILABILITY_THRESHOLD") {
            m.availability_threshold = pct;
        }
        if let Some(domains) = lookup("UPTRAIL_ALLOWED_DOMAINS") {
            let list: Vec<String> = domains
                .split(',')
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
            if !list.is_empty() {
                m.allowed_domains = Some(list);
            }
        }
        if let Some(prefix) = lookup("UPTRAIL_TOKEN_PREFIX") {
            m.token_prefix = prefix;
        }

        cfg.smtp = match (lookup("UPTRAIL_SMTP_HOST"), lookup("UPTRAIL_SMTP_FROM")) {
            (Some(host), Some(from)) => Some(SmtpConfig {
                host,
                port: parse_var(&lookup, "UPTRAIL_SMTP_PORT").unwrap_or(587),
                secure: parse_var(&lookup, "UPTRAIL_SMTP_SECURE").unwrap_or(false),
                username: lookup("UPTRAIL_SMTP_USER"),
                password: lookup("UPTRAIL_SMTP_PASS"),
                from,
            }),
            _ => None,
        };

        cfg
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}
