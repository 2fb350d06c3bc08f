//! Database model types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Maximum number of history entries kept per site.
pub const HISTORY_LIMIT: usize = 1000;

/// Maximum number of daily buckets kept per site.
pub const DAILY_STATS_LIMIT: usize = 30;

/// Observed availability of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Up,
    Down,
    #[default]
    Pending,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Up => "up",
            SiteStatus::Down => "down",
            SiteStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(SiteStatus::Up),
            "down" => Ok(SiteStatus::Down),
            "pending" => Ok(SiteStatus::Pending),
            other => Err(format!("unknown site status: {}", other)),
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// One observation of a site, either from a probe or from the tracking pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub status: SiteStatus,
    /// Milliseconds
    pub response_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub visitors: i64,
}

impl HistoryEntry {
    /// Entry recorded when the tracking pixel is loaded.
    pub fn visit(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            status: SiteStatus::Up,
            response_time: 0,
            status_code: None,
            error: None,
            visitors: 1,
        }
    }
}

/// Per calendar day aggregate of a site's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub uptime: f64,
    pub average_response_time: i64,
    pub error_count: i64,
    pub total_checks: i64,
    pub visitors: i64,
}

/// Chat platforms understood by the webhook formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum WebhookPlatform {
    Discord,
    Slack,
    Teams,
    GoogleChat,
    #[default]
    Generic,
}

impl From<String> for WebhookPlatform {
    fn from(s: String) -> Self {
        match s.as_str() {
            "discord" => WebhookPlatform::Discord,
            "slack" => WebhookPlatform::Slack,
            "teams" => WebhookPlatform::Teams,
            "google_chat" => WebhookPlatform::GoogleChat,
            _ => WebhookPlatform::Generic,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub addresses: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub platform: WebhookPlatform,
}

/// Per-site notification channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notifications {
    #[serde(default)]
    pub email: EmailSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

/// A monitored site.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub url: String,
    pub description: String,
    pub status: SiteStatus,
    pub response_time: i64,
    pub last_check: DateTime<Utc>,
    pub uptime: f64,
    pub average_response_time: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub status_history: Vec<HistoryEntry>,
    pub daily_stats: Vec<DailyBucket>,
    pub notifications: Notifications,
    #[serde(skip_serializing)]
    pub monitoring_token: String,
    pub created_at: DateTime<Utc>,
}

impl Default for Site {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            owner: String::new(),
            name: String::new(),
            url: String::new(),
            description: String::new(),
            status: SiteStatus::Pending,
            response_time: 0,
            last_check: now,
            uptime: 100.0,
            average_response_time: 0.0,
            status_history: Vec::new(),
            daily_stats: Vec::new(),
            notifications: Notifications::default(),
            monitoring_token: String::new(),
            created_at: now,
        }
    }
}

/// Registration request for a new site.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSite {
    pub owner: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    pub monitoring_token: String,
}

/// A persisted alert.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub site_id: i64,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Unacknowledged alert joined with its site name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentAlert {
    pub id: i64,
    pub site_name: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Fleet summary for one owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_sites: usize,
    pub sites_up: usize,
    pub sites_down: usize,
    pub average_uptime: f64,
    pub total_errors: i64,
    pub daily_stats: Vec<OverviewDay>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewDay {
    pub date: NaiveDate,
    pub uptime: f64,
    pub average_response_time: f64,
    pub error_count: i64,
    pub total_checks: i64,
}
