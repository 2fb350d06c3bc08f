//! Probe module for site health checks.

mod http;

pub use http::*;

use crate::db::{HistoryEntry, SiteStatus};

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
}

/// Normalized outcome of a single probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub status: SiteStatus,
    pub response_time_ms: i64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl ProbeResult {
    /// Outcome for a probe that got an HTTP response.
    pub fn from_status(status_code: u16, response_time_ms: i64) -> Self {
        let status = if (200..400).contains(&status_code) {
            SiteStatus::Up
        } else {
            SiteStatus::Down
        };

        Self {
            status,
            response_time_ms,
            status_code: Some(status_code),
            error: None,
        }
    }

    /// Outcome for a probe that never got a response, or a check that failed internally.
    pub fn failed(response_time_ms: i64, error: impl ToString) -> Self {
        Self {
            status: SiteStatus::Down,
            response_time_ms,
            status_code: None,
            error: Some(error.to_string()),
        }
    }

    pub fn to_entry(&self, timestamp: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            timestamp,
            status: self.status,
            response_time: self.response_time_ms,
            status_code: self.status_code,
            error: self.error.clone(),
            visitors: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_classification() {
        assert_eq!(ProbeResult::from_status(200, 10).status, SiteStatus::Up);
        assert_eq!(ProbeResult::from_status(301, 10).status, SiteStatus::Up);
        assert_eq!(ProbeResult::from_status(399, 10).status, SiteStatus::Up);
        assert_eq!(ProbeResult::from_status(400, 10).status, SiteStatus::Down);
        assert_eq!(ProbeResult::from_status(503, 10).status, SiteStatus::Down);
        assert_eq!(ProbeResult::from_status(199, 10).status, SiteStatus::Down);
    }

    #[test]
    fn test_failed_has_no_status_code() {
        let result = ProbeResult::failed(250, ProbeError::Network("connection refused".into()));
        assert_eq!(result.status, SiteStatus::Down);
        assert_eq!(result.status_code, None);
        assert_eq!(result.error.as_deref(), Some("network error: connection refused"));

        let entry = result.to_entry(Utc::now());
        assert_eq!(entry.response_time, 250);
        assert_eq!(entry.visitors, 0);
    }
}
