//! Health-check pipeline and on-demand site operations.

mod state;
pub mod stats;
mod tracking;

pub use state::*;
pub use tracking::*;

use crate::authorize::{generate_token, SiteAuthorizer};
use crate::config::MonitorConfig;
use crate::db::{
    Alert, EmailSettings, HistoryEntry, NewSite, Notifications, Overview, RecentAlert, Site, Store, WebhookSettings,
};
use crate::error::MonitorError;
use crate::notify::{AlertDispatcher, Channel};
use crate::probe::{HealthChecker, ProbeResult};
use crate::scheduler::purge_daily_stats;

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use url::Url;

const RECENT_ALERTS_LIMIT: i64 = 10;

/// Drives probe, state, stats and alerting for individual sites.
pub struct Monitor {
    store: Arc<Store>,
    checker: HealthChecker,
    authorizer: SiteAuthorizer,
    dispatcher: Arc<AlertDispatcher>,
    thresholds: Thresholds,
    token_prefix: String,
}

impl Monitor {
    pub fn new(
        store: Arc<Store>,
        config: &MonitorConfig,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            store,
            checker: HealthChecker::new(config.probe_timeout)?,
            authorizer: SiteAuthorizer::new(config.auth_timeout, config.allowed_domains.clone())?,
            dispatcher,
            thresholds: Thresholds {
                slow_response_ms: config.slow_response_ms,
                availability: config.availability_threshold,
            },
            token_prefix: config.token_prefix.clone(),
        })
    }

    pub fn generate_token(&self) -> String {
        generate_token(&self.token_prefix)
    }

    // --- Registration and ownership ---

    /// Authorize and persist a new site in `pending` state.
    pub async fn register(&self, mut new: NewSite) -> Result<Site, MonitorError> {
        new.name = new.name.trim().to_string();
        new.url = new.url.trim().to_string();
        new.monitoring_token = new.monitoring_token.trim().to_string();

        if new.owner.trim().is_empty() {
            return Err(MonitorError::Validation("owner is required".to_string()));
        }
        if new.name.is_empty() {
            return Err(MonitorError::Validation("name is required".to_string()));
        }
        if new.monitoring_token.is_empty() {
            return Err(MonitorError::Validation("monitoring token is required".to_string()));
        }
        self.authorizer.validate_url(&new.url)?;

        self.authorizer.authorize(&new.url, &new.monitoring_token).await?;

        let site = self
            .store
            .add_site(new, Utc::now())
            .map_err(MonitorError::from_db("site"))?;
        tracing::info!("Registered site {} ({}) for {}", site.name, site.url, site.owner);
        Ok(site)
    }

    /// Check that the stored token is still the one the site publishes.
    pub async fn verify(&self, site_id: i64) -> Result<(), MonitorError> {
        let site = self.load(site_id)?;
        self.authorizer.authorize(&site.url, &site.monitoring_token).await?;
        Ok(())
    }

    /// Replace the stored token once the site publishes the new one.
    pub async fn regenerate_token(&self, site_id: i64, token: &str) -> Result<(), MonitorError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(MonitorError::Validation("monitoring token is required".to_string()));
        }

        let site = self.load(site_id)?;
        self.authorizer.authorize(&site.url, token).await?;
        self.store
            .update_token(site_id, token)
            .map_err(MonitorError::from_db("site"))?;
        tracing::info!("Replaced monitoring token of {}", site.name);
        Ok(())
    }

    // --- Health checks ---

    /// Probe a site once, persist the outcome, then alert on any resulting events.
    pub async fn check_site(&self, site_id: i64) -> Result<Site, MonitorError> {
        let mut site = self.load(site_id)?;
        let probe = self.checker.probe(&site.url).await;
        let now = Utc::now();

        let events = apply_probe(&mut site, &probe, now, &self.thresholds);
        self.store
            .save_site_state(&site)
            .map_err(MonitorError::from_db("site"))?;

        tracing::info!(
            "Checked {}: {} in {}ms (uptime {:.2}%)",
            site.name,
            site.status,
            site.response_time,
            site.uptime
        );

        self.dispatch_all(&site, &events).await;
        Ok(site)
    }

    /// Mark a site down after its check failed internally.
    pub async fn record_failure(&self, site_id: i64, cause: &str) -> Result<(), MonitorError> {
        let mut site = self.load(site_id)?;
        let probe = ProbeResult::failed(0, cause);

        let mut events = apply_probe(&mut site, &probe, Utc::now(), &self.thresholds);
        if !events.iter().any(|e| matches!(e, TransitionEvent::WentDown { .. })) {
            events.insert(
                0,
                TransitionEvent::ProbeError {
                    error: cause.to_string(),
                },
            );
        }

        self.store
            .save_site_state(&site)
            .map_err(MonitorError::from_db("site"))?;
        tracing::warn!("Check of {} failed: {}", site.name, cause);

        self.dispatch_all(&site, &events).await;
        Ok(())
    }

    /// Count a tracking-pixel visit once the token matches the site's well-known file.
    pub async fn record_visit(&self, site_id: i64, token: &str) -> Result<(), MonitorError> {
        let site = self.load(site_id)?;
        self.authorizer.authorize(&site.url, token).await?;

        let mut site = self.load(site_id)?;
        let now = Utc::now();
        stats::record_entry(&mut site, HistoryEntry::visit(now), stats::local_date(now));
        self.store
            .save_site_state(&site)
            .map_err(MonitorError::from_db("site"))?;

        tracing::debug!("Recorded visit for {}", site.name);
        Ok(())
    }

    async fn dispatch_all(&self, site: &Site, events: &[TransitionEvent]) {
        for event in events {
            if let Err(e) = self.dispatcher.dispatch(site, event).await {
                tracing::error!("Failed to persist alert for {}: {}", site.name, e);
            }
        }
    }

    // --- Notification settings ---

    pub fn update_email(&self, site_id: i64, settings: EmailSettings) -> Result<Notifications, MonitorError> {
        let mut addresses = BTreeSet::new();
        for address in settings.addresses {
            let address = address.trim().to_string();
            if address.parse::<lettre::Address>().is_err() {
                return Err(MonitorError::Validation(format!("invalid email address: {}", address)));
            }
            addresses.insert(address);
        }

        let mut site = self.load(site_id)?;
        site.notifications.email = EmailSettings {
            enabled: settings.enabled,
            addresses,
        };
        self.save_notifications(&site)
    }

    pub fn update_webhook(&self, site_id: i64, settings: WebhookSettings) -> Result<Notifications, MonitorError> {
        let url = settings
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        if let Some(raw) = &url {
            let parsed = Url::parse(raw)
                .map_err(|e| MonitorError::Validation(format!("invalid webhook URL {}: {}", raw, e)))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(MonitorError::Validation("webhook URL must use http or https".to_string()));
            }
        } else if settings.enabled {
            return Err(MonitorError::Validation("an enabled webhook needs a URL".to_string()));
        }

        let mut site = self.load(site_id)?;
        site.notifications.webhook = WebhookSettings {
            enabled: settings.enabled,
            url,
            platform: settings.platform,
        };
        self.save_notifications(&site)
    }

    fn save_notifications(&self, site: &Site) -> Result<Notifications, MonitorError> {
        self.store
            .update_notifications(site.id, &site.notifications)
            .map_err(MonitorError::from_db("site"))?;
        Ok(site.notifications.clone())
    }

    /// Send a test notification on one channel and report the delivery outcome.
    pub async fn test_notification(&self, site_id: i64, channel: Channel) -> Result<(), MonitorError> {
        let site = self.load(site_id)?;
        let notifications = &site.notifications;

        match channel {
            Channel::Email if !notifications.email.enabled => {
                return Err(MonitorError::Validation("email notifications are disabled".to_string()));
            }
            Channel::Email if notifications.email.addresses.is_empty() => {
                return Err(MonitorError::Validation("no email addresses configured".to_string()));
            }
            Channel::Webhook if !notifications.webhook.enabled => {
                return Err(MonitorError::Validation("webhook notifications are disabled".to_string()));
            }
            Channel::Webhook if notifications.webhook.url.is_none() => {
                return Err(MonitorError::Validation("no webhook URL configured".to_string()));
            }
            _ => {}
        }

        self.dispatcher.send_test(&site, channel).await?;
        Ok(())
    }

    // --- Records ---

    pub fn get_site(&self, site_id: i64) -> Result<Site, MonitorError> {
        self.load(site_id)
    }

    pub fn list_sites(&self, owner: Option<&str>) -> Result<Vec<Site>, MonitorError> {
        self.store.list_sites(owner).map_err(MonitorError::Storage)
    }

    pub fn site_logs(&self, site_id: i64) -> Result<Vec<HistoryEntry>, MonitorError> {
        Ok(self.load(site_id)?.status_history)
    }

    pub fn delete_site(&self, site_id: i64) -> Result<(), MonitorError> {
        self.store
            .delete_site(site_id)
            .map_err(MonitorError::from_db("site"))?;
        tracing::info!("Deleted site {}", site_id);
        Ok(())
    }

    pub fn site_alerts(&self, site_id: i64) -> Result<Vec<Alert>, MonitorError> {
        self.load(site_id)?;
        self.store.get_alerts(site_id).map_err(MonitorError::Storage)
    }

    pub fn recent_alerts(&self, owner: &str) -> Result<Vec<RecentAlert>, MonitorError> {
        self.store
            .get_recent_alerts(owner, RECENT_ALERTS_LIMIT)
            .map_err(MonitorError::Storage)
    }

    pub fn acknowledge_alert(&self, alert_id: i64) -> Result<(), MonitorError> {
        self.store
            .acknowledge_alert(alert_id)
            .map_err(MonitorError::from_db("alert"))
    }

    pub fn overview(&self, owner: Option<&str>) -> Result<Overview, MonitorError> {
        let sites = self.list_sites(owner)?;
        Ok(stats::overview(&sites, stats::local_date(Utc::now())))
    }

    /// Purge expired daily buckets for one owner's sites.
    pub fn purge_stats(&self, owner: &str) -> Result<usize, MonitorError> {
        purge_daily_stats(&self.store, Some(owner), stats::local_date(Utc::now())).map_err(MonitorError::Storage)
    }

    fn load(&self, site_id: i64) -> Result<Site, MonitorError> {
        self.store.get_site(site_id).map_err(MonitorError::from_db("site"))
    }
}
