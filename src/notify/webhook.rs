//! Chat webhook payload formatters and sender.

use super::{DeliveryError, NotificationEvent};
use crate::db::{Site, WebhookPlatform};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Build the JSON body for a platform.
pub fn format_payload(platform: WebhookPlatform, site: &Site, event: &NotificationEvent, now: DateTime<Utc>) -> Value {
    match platform {
        WebhookPlatform::Discord => discord(site, event, now),
        WebhookPlatform::Slack => slack(site, event),
        WebhookPlatform::Teams => teams(site, event),
        WebhookPlatform::GoogleChat => google_chat(site, event),
        WebhookPlatform::Generic => generic(site, event, now),
    }
}

fn heading(event: &NotificationEvent) -> String {
    format!("{} {}", event.emoji, event.title)
}

fn discord(site: &Site, event: &NotificationEvent, now: DateTime<Utc>) -> Value {
    let mut fields = vec![
        json!({"name": "Site", "value": site.name, "inline": true}),
        json!({"name": "URL", "value": site.url, "inline": true}),
    ];
    fields.extend(
        event
            .fields
            .iter()
            .map(|f| json!({"name": f.name, "value": f.value, "inline": f.inline})),
    );

    json!({
        "embeds": [{
            "title": heading(event),
            "description": event.description,
            "color": event.color,
            "fields": fields,
            "timestamp": now.to_rfc3339(),
        }]
    })
}

fn slack(site: &Site, event: &NotificationEvent) -> Value {
    let mut lines = vec![format!("*Site:* {}", site.name), format!("*URL:* {}", site.url)];
    lines.extend(event.fields.iter().map(|f| format!("*{}:* {}", f.name, f.value)));

    json!({
        "text": heading(event),
        "blocks": [{
            "type": "section",
            "text": {"type": "mrkdwn", "text": lines.join("\n")}
        }]
    })
}

fn teams(site: &Site, event: &NotificationEvent) -> Value {
    let mut facts = vec![
        json!({"name": "Site", "value": site.name}),
        json!({"name": "URL", "value": site.url}),
    ];
    facts.extend(event.fields.iter().map(|f| json!({"name": f.name, "value": f.value})));

    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": format!("{:x}", event.color),
        "title": heading(event),
        "text": event.description,
        "sections": [{"facts": facts}]
    })
}

fn google_chat(site: &Site, event: &NotificationEvent) -> Value {
    let key_value = |label: &str, content: &str| json!({"keyValue": {"topLabel": label, "content": content}});

    let mut widgets = vec![key_value("Site", &site.name), key_value("URL", &site.url)];
    widgets.extend(event.fields.iter().map(|f| key_value(&f.name, &f.value)));

    json!({
        "cards": [{
            "header": {"title": heading(event)},
            "sections": [{"widgets": widgets}]
        }]
    })
}

fn generic(site: &Site, event: &NotificationEvent, now: DateTime<Utc>) -> Value {
    let details: Map<String, Value> = event
        .fields
        .iter()
        .map(|f| (f.name.to_lowercase(), Value::String(f.value.clone())))
        .collect();

    json!({
        "event": event.kind,
        "site": {"name": site.name, "url": site.url},
        "status": if event.is_down() { "down" } else { "up" },
        "timestamp": now.to_rfc3339(),
        "details": details,
    })
}

/// Posts webhook payloads with a bounded timeout.
#[derive(Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("uptrail-webhook/1.0")
            .build()?;
        Ok(Self { client })
    }

    pub async fn send(&self, url: &str, payload: &Value) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Webhook(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::WebhookStatus(status.as_u16()));
        }
        tracing::debug!("Webhook {} answered {}", url, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::TransitionEvent;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn site() -> Site {
        Site {
            name: "Shop".to_string(),
            url: "https://shop.example.com".to_string(),
            ..Default::default()
        }
    }

    fn down_event(site: &Site) -> NotificationEvent {
        NotificationEvent::from_transition(
            site,
            &TransitionEvent::WentDown {
                status_code: Some(503),
                error: None,
            },
        )
    }

    #[test]
    fn test_discord_embed() {
        let site = site();
        let payload = format_payload(WebhookPlatform::Discord, &site, &down_event(&site), Utc::now());
        let embed = &payload["embeds"][0];

        assert_eq!(embed["title"], "🔴 Site Down");
        assert_eq!(embed["color"], 15158332);
        assert_eq!(embed["fields"][0]["value"], "Shop");
        assert_eq!(embed["fields"][1]["value"], "https://shop.example.com");
        assert_eq!(embed["fields"][2]["name"], "Error");
        assert_eq!(embed["fields"][2]["value"], "HTTP 503");
    }

    #[test]
    fn test_slack_blocks() {
        let site = site();
        let payload = format_payload(WebhookPlatform::Slack, &site, &down_event(&site), Utc::now());

        assert_eq!(payload["text"], "🔴 Site Down");
        assert_eq!(payload["blocks"][0]["text"]["type"], "mrkdwn");
        assert_eq!(
            payload["blocks"][0]["text"]["text"],
            "*Site:* Shop\n*URL:* https://shop.example.com\n*Error:* HTTP 503"
        );
    }

    #[test]
    fn test_teams_card_uses_hex_color() {
        let site = site();
        let payload = format_payload(WebhookPlatform::Teams, &site, &down_event(&site), Utc::now());

        assert_eq!(payload["@type"], "MessageCard");
        assert_eq!(payload["themeColor"], "e74c3c");
        assert_eq!(payload["sections"][0]["facts"][1]["value"], "https://shop.example.com");
    }

    #[test]
    fn test_google_chat_card() {
        let site = site();
        let payload = format_payload(WebhookPlatform::GoogleChat, &site, &down_event(&site), Utc::now());
        let widgets = &payload["cards"][0]["sections"][0]["widgets"];

        assert_eq!(payload["cards"][0]["header"]["title"], "🔴 Site Down");
        assert_eq!(widgets[0]["keyValue"]["content"], "Shop");
        assert_eq!(widgets[2]["keyValue"]["topLabel"], "Error");
    }

    #[test]
    fn test_generic_payload() {
        let site = site();
        let recovered = NotificationEvent::from_transition(&site, &TransitionEvent::Recovered { downtime_minutes: 3 });
        let payload = format_payload(WebhookPlatform::Generic, &site, &recovered, Utc::now());

        assert_eq!(payload["event"], "site_up");
        assert_eq!(payload["status"], "up");
        assert_eq!(payload["site"]["url"], "https://shop.example.com");
        assert_eq!(payload["details"]["downtime"], "3 minutes");

        let payload = format_payload(WebhookPlatform::Generic, &site, &down_event(&site), Utc::now());
        assert_eq!(payload["status"], "down");
    }

    #[tokio::test]
    async fn test_sender_posts_json() {
        let server = MockServer::start().await;
        let payload = json!({"event": "test"});
        Mock::given(method("POST"))
            .and(header("user-agent", "uptrail-webhook/1.0"))
            .and(body_json(&payload))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WebhookSender::new(Duration::from_secs(2)).unwrap();
        sender.send(&server.uri(), &payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_sender_rejects_non_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            sender.send(&server.uri(), &json!({})).await,
            Err(DeliveryError::WebhookStatus(404))
        ));
    }
}
