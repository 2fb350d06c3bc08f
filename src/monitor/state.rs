//! Up/down/pending state machine.
//!
//! A probe's status always becomes the site's status. Reportable events are
//! derived by comparing the previous status with the probe outcome before
//! stats are recomputed, plus an availability check after the history append.

use crate::db::{Severity, Site, SiteStatus};
use crate::probe::ProbeResult;

use super::stats;

use chrono::{DateTime, Utc};

/// Alerting thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub slow_response_ms: i64,
    pub availability: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            slow_response_ms: 5000,
            availability: 95.0,
        }
    }
}

/// Signal derived from a probe outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionEvent {
    WentDown {
        status_code: Option<u16>,
        error: Option<String>,
    },
    Recovered {
        downtime_minutes: i64,
    },
    SlowResponse {
        response_time_ms: i64,
    },
    LowAvailability {
        uptime: f64,
    },
    /// The check itself failed before a normal outcome could be recorded.
    ProbeError {
        error: String,
    },
}

impl TransitionEvent {
    pub fn severity(&self) -> Severity {
        match self {
            TransitionEvent::WentDown { .. } | TransitionEvent::ProbeError { .. } => Severity::Critical,
            TransitionEvent::SlowResponse { .. } | TransitionEvent::LowAvailability { .. } => Severity::Warning,
            TransitionEvent::Recovered { .. } => Severity::Info,
        }
    }

    /// Text stored on the persisted alert.
    pub fn alert_message(&self) -> String {
        match self {
            TransitionEvent::WentDown { status_code, error } => match (error, status_code) {
                (Some(error), _) => format!("Site is unreachable: {}", error),
                (None, Some(code)) => format!("Site is down: HTTP {}", code),
                (None, None) => "Site is down".to_string(),
            },
            TransitionEvent::Recovered { downtime_minutes } => {
                format!("Site is reachable again after {} minutes of downtime", downtime_minutes)
            }
            TransitionEvent::SlowResponse { response_time_ms } => {
                format!("High response time: {}ms", response_time_ms)
            }
            TransitionEvent::LowAvailability { uptime } => format!("Low availability: {:.2}%", uptime),
            TransitionEvent::ProbeError { error } => format!("Check failed: {}", error),
        }
    }
}

/// Events caused by the status change itself and by response latency.
pub fn transition_events(
    previous: SiteStatus,
    last_down: Option<DateTime<Utc>>,
    probe: &ProbeResult,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Vec<TransitionEvent> {
    let mut events = Vec::new();

    match (previous, probe.status) {
        (SiteStatus::Up, SiteStatus::Down) => events.push(TransitionEvent::WentDown {
            status_code: probe.status_code,
            error: probe.error.clone(),
        }),
        (SiteStatus::Down, SiteStatus::Up) => {
            let downtime_minutes = last_down
                .map(|t| ((now - t).num_milliseconds() as f64 / 60_000.0).round() as i64)
                .unwrap_or(0);
            events.push(TransitionEvent::Recovered { downtime_minutes });
        }
        // First observation from pending never alerts.
        _ => {}
    }

    if probe.status == SiteStatus::Up && probe.response_time_ms > thresholds.slow_response_ms {
        events.push(TransitionEvent::SlowResponse {
            response_time_ms: probe.response_time_ms,
        });
    }

    events
}

/// Fold a probe outcome into the site and return the events it raised.
pub fn apply_probe(
    site: &mut Site,
    probe: &ProbeResult,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Vec<TransitionEvent> {
    let last_down = site
        .status_history
        .iter()
        .rev()
        .find(|e| e.status == SiteStatus::Down)
        .map(|e| e.timestamp);

    let mut events = transition_events(site.status, last_down, probe, now, thresholds);

    site.status = probe.status;
    site.response_time = probe.response_time_ms;
    site.last_check = now;
    stats::record_entry(site, probe.to_entry(now), stats::local_date(now));

    if site.uptime < thresholds.availability {
        events.push(TransitionEvent::LowAvailability { uptime: site.uptime });
    }

    events
}
