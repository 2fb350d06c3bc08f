//! Alert persistence and outbound notifications.

mod email;
mod webhook;

pub use email::*;
pub use webhook::*;

use crate::db::{Alert, DbError, Site, Store};
use crate::monitor::TransitionEvent;

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

pub const RED: u32 = 15158332;
pub const GREEN: u32 = 3066993;
pub const YELLOW: u32 = 16776960;

/// Delivery error types.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("email delivery failed: {0}")]
    Email(String),
    #[error("webhook delivery failed: {0}")]
    Webhook(String),
    #[error("webhook returned HTTP {0}")]
    WebhookStatus(u16),
    #[error("{0}")]
    NotConfigured(String),
}

/// Notification channel selectable for test deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Webhook,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EventField {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            inline: false,
        }
    }
}

/// Platform-neutral notification content, rendered by the email and webhook formatters.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub kind: &'static str,
    pub emoji: &'static str,
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EventField>,
}

impl NotificationEvent {
    pub fn from_transition(site: &Site, event: &TransitionEvent) -> Self {
        match event {
            TransitionEvent::WentDown { status_code, error } => {
                let cause = match (error, status_code) {
                    (Some(error), _) => error.clone(),
                    (None, Some(code)) => format!("HTTP {}", code),
                    (None, None) => "Site unreachable".to_string(),
                };
                Self {
                    kind: "site_down",
                    emoji: "🔴",
                    title: "Site Down".to_string(),
                    description: format!("{} is currently unreachable.", site.name),
                    color: RED,
                    fields: vec![EventField::new("Error", cause)],
                }
            }
            TransitionEvent::Recovered { downtime_minutes } => Self {
                kind: "site_up",
                emoji: "🟢",
                title: "Site Recovered".to_string(),
                description: format!("{} is reachable again.", site.name),
                color: GREEN,
                fields: vec![EventField::new("Downtime", format!("{} minutes", downtime_minutes))],
            },
            TransitionEvent::SlowResponse { response_time_ms } => Self {
                kind: "high_response_time",
                emoji: "⚠️",
                title: "High Response Time".to_string(),
                description: format!("{} is responding unusually slowly.", site.name),
                color: YELLOW,
                fields: vec![EventField::new("Response time", format!("{}ms", response_time_ms))],
            },
            TransitionEvent::LowAvailability { uptime } => Self {
                kind: "low_availability",
                emoji: "📉",
                title: "Low Availability".to_string(),
                description: format!("Uptime of {} dropped below the alert threshold.", site.name),
                color: YELLOW,
                fields: vec![EventField::new("Uptime", format!("{:.2}%", uptime))],
            },
            TransitionEvent::ProbeError { error } => Self {
                kind: "probe_error",
                emoji: "❗",
                title: "Check Failed".to_string(),
                description: format!("The health check for {} could not be completed.", site.name),
                color: RED,
                fields: vec![EventField::new("Error", error.clone())],
            },
        }
    }

    pub fn test(site: &Site, channel: Channel) -> Self {
        let channel = match channel {
            Channel::Email => "email",
            Channel::Webhook => "webhook",
        };
        Self {
            kind: "test",
            emoji: "📌",
            title: format!("Test {} notification", channel),
            description: format!("The {} notification for {} works.", channel, site.name),
            color: GREEN,
            fields: vec![EventField::new("Channel", channel)],
        }
    }

    /// Whether the event reports the site as down.
    pub fn is_down(&self) -> bool {
        matches!(self.kind, "site_down" | "probe_error")
    }
}

/// Persists alerts and fans them out to the site's notification channels.
pub struct AlertDispatcher {
    store: Arc<Store>,
    webhook: WebhookSender,
    mailer: Option<Mailer>,
}

impl AlertDispatcher {
    pub fn new(store: Arc<Store>, webhook: WebhookSender, mailer: Option<Mailer>) -> Self {
        Self { store, webhook, mailer }
    }

    /// Persist an alert for `event`, then attempt delivery on every enabled channel.
    ///
    /// Only the alert write can fail; delivery failures are logged and absorbed.
    pub async fn dispatch(&self, site: &Site, event: &TransitionEvent) -> Result<Alert, DbError> {
        let alert = self
            .store
            .add_alert(site.id, &event.alert_message(), event.severity(), Utc::now())?;

        tracing::info!(
            "Alert {} ({}) for {}: {}",
            alert.id,
            alert.severity.as_str(),
            site.name,
            alert.message
        );

        let notification = NotificationEvent::from_transition(site, event);
        let (email, webhook) = tokio::join!(
            self.deliver_email(site, &notification),
            self.deliver_webhook(site, &notification)
        );

        if let Err(e) = email {
            tracing::warn!("Email notification for {} failed: {}", site.name, e);
        }
        if let Err(e) = webhook {
            tracing::warn!("Webhook notification for {} failed: {}", site.name, e);
        }

        Ok(alert)
    }

    /// Deliver a test notification on one channel, surfacing any failure.
    pub async fn send_test(&self, site: &Site, channel: Channel) -> Result<(), DeliveryError> {
        let notification = NotificationEvent::test(site, channel);
        match channel {
            Channel::Email => self.send_email(site, &notification).await,
            Channel::Webhook => match site.notifications.webhook.url.as_deref() {
                Some(url) => self.send_webhook(site, url, &notification).await,
                None => Err(DeliveryError::NotConfigured("no webhook URL configured".to_string())),
            },
        }
    }

    async fn deliver_email(&self, site: &Site, notification: &NotificationEvent) -> Result<(), DeliveryError> {
        let email = &site.notifications.email;
        if !email.enabled || email.addresses.is_empty() {
            return Ok(());
        }
        self.send_email(site, notification).await
    }

    async fn deliver_webhook(&self, site: &Site, notification: &NotificationEvent) -> Result<(), DeliveryError> {
        let webhook = &site.notifications.webhook;
        match webhook.url.as_deref() {
            Some(url) if webhook.enabled => self.send_webhook(site, url, notification).await,
            _ => Ok(()),
        }
    }

    async fn send_email(&self, site: &Site, notification: &NotificationEvent) -> Result<(), DeliveryError> {
        let mailer = self
            .mailer
            .as_ref()
            .ok_or_else(|| DeliveryError::NotConfigured("email delivery is not configured".to_string()))?;

        let (subject, html) = render_email(site, notification, Utc::now());
        mailer.send(&site.notifications.email.addresses, &subject, html).await?;

        tracing::info!(
            "Sent {} email for {} to {} recipients",
            notification.kind,
            site.name,
            site.notifications.email.addresses.len()
        );
        Ok(())
    }

    async fn send_webhook(&self, site: &Site, url: &str, notification: &NotificationEvent) -> Result<(), DeliveryError> {
        let platform = site.notifications.webhook.platform;
        let payload = format_payload(platform, site, notification, Utc::now());
        self.webhook.send(url, &payload).await?;

        tracing::info!("Sent {} webhook ({:?}) for {}", notification.kind, platform, site.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewSite, Notifications, Severity, WebhookPlatform, WebhookSettings};
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn setup() -> (TempDir, Arc<Store>, Site) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("test.db")).unwrap());
        let site = store
            .add_site(
                NewSite {
                    owner: "alice".to_string(),
                    name: "Shop".to_string(),
                    url: "https://shop.example.com".to_string(),
                    description: String::new(),
                    monitoring_token: "tok".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        (dir, store, site)
    }

    fn dispatcher(store: Arc<Store>) -> AlertDispatcher {
        AlertDispatcher::new(store, WebhookSender::new(Duration::from_secs(2)).unwrap(), None)
    }

    fn with_webhook(mut site: Site, url: String, enabled: bool) -> Site {
        site.notifications = Notifications {
            webhook: WebhookSettings {
                enabled,
                url: Some(url),
                platform: WebhookPlatform::Generic,
            },
            ..Default::default()
        };
        site
    }

    fn went_down() -> TransitionEvent {
        TransitionEvent::WentDown {
            status_code: None,
            error: Some("connection refused".to_string()),
        }
    }

    #[test]
    fn test_event_content() {
        let site = Site {
            name: "Shop".to_string(),
            ..Default::default()
        };

        let down = NotificationEvent::from_transition(&site, &went_down());
        assert_eq!(down.kind, "site_down");
        assert_eq!(down.color, RED);
        assert!(down.is_down());
        assert_eq!(down.fields[0].value, "connection refused");

        let up = NotificationEvent::from_transition(&site, &TransitionEvent::Recovered { downtime_minutes: 18 });
        assert_eq!(up.kind, "site_up");
        assert_eq!(up.color, GREEN);
        assert!(!up.is_down());
        assert_eq!(up.fields[0].value, "18 minutes");

        let slow = NotificationEvent::from_transition(&site, &TransitionEvent::SlowResponse { response_time_ms: 6000 });
        assert_eq!(slow.kind, "high_response_time");
        assert_eq!(slow.color, YELLOW);

        let failed = NotificationEvent::from_transition(&site, &TransitionEvent::ProbeError { error: "boom".into() });
        assert!(failed.is_down());

        assert_eq!(NotificationEvent::test(&site, Channel::Webhook).kind, "test");
    }

    #[tokio::test]
    async fn test_dispatch_persists_then_delivers() {
        let (_dir, store, site) = setup();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("user-agent", "uptrail-webhook/1.0"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let site = with_webhook(site, format!("{}/hook", server.uri()), true);
        let alert = dispatcher(store.clone()).dispatch(&site, &went_down()).await.unwrap();

        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(store.get_alerts(site.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_absorbs_delivery_failure() {
        let (_dir, store, site) = setup();
        let site = with_webhook(site, "http://127.0.0.1:1/hook".to_string(), true);

        let alert = dispatcher(store.clone()).dispatch(&site, &went_down()).await.unwrap();

        let alerts = store.get_alerts(site.id).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, alert.id);
    }

    #[tokio::test]
    async fn test_disabled_webhook_is_not_called() {
        let (_dir, store, site) = setup();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let site = with_webhook(site, server.uri(), false);
        dispatcher(store).dispatch(&site, &went_down()).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_test_surfaces_errors_without_alert() {
        let (_dir, store, site) = setup();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let site = with_webhook(site, server.uri(), true);
        let dispatcher = dispatcher(store.clone());

        assert!(matches!(
            dispatcher.send_test(&site, Channel::Webhook).await,
            Err(DeliveryError::WebhookStatus(500))
        ));
        assert!(matches!(
            dispatcher.send_test(&site, Channel::Email).await,
            Err(DeliveryError::NotConfigured(_))
        ));
        assert!(store.get_alerts(site.id).unwrap().is_empty());
    }
}
