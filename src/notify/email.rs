//! SMTP email notifications.

use super::{DeliveryError, NotificationEvent};
use crate::config::SmtpConfig;
use crate::db::Site;

use chrono::{DateTime, Local, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::collections::BTreeSet;
use std::time::Duration;

/// Async SMTP sender.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self, DeliveryError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| DeliveryError::Email(format!("invalid sender {}: {}", config.from, e)))?;

        let builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| DeliveryError::Email(e.to_string()))?;

        let mut builder = builder.port(config.port).timeout(Some(timeout));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Send one HTML message to every recipient.
    pub async fn send(&self, to: &BTreeSet<String>, subject: &str, html: String) -> Result<(), DeliveryError> {
        let mut message = Message::builder().from(self.from.clone()).subject(subject);
        for address in to {
            let mailbox: Mailbox = address
                .parse()
                .map_err(|e| DeliveryError::Email(format!("invalid recipient {}: {}", address, e)))?;
            message = message.to(mailbox);
        }

        let message = message
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| DeliveryError::Email(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Email(e.to_string()))?;
        Ok(())
    }
}

/// Subject and HTML body for a notification.
pub fn render_email(site: &Site, event: &NotificationEvent, now: DateTime<Utc>) -> (String, String) {
    let subject = format!("{} {} - {}", event.emoji, event.title, site.name);

    let mut details = format!(
        "<li><strong>URL:</strong> {}</li>\n<li><strong>Date:</strong> {}</li>\n",
        escape_html(&site.url),
        now.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    for field in &event.fields {
        details.push_str(&format!(
            "<li><strong>{}:</strong> {}</li>\n",
            escape_html(&field.name),
            escape_html(&field.value)
        ));
    }

    let html = format!(
        "<h2>{} {}</h2>\n<p>{}</p>\n<hr>\n<h3>Details</h3>\n<ul>\n{}</ul>\n",
        event.emoji,
        escape_html(&event.title),
        escape_html(&event.description),
        details
    );

    (subject, html)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::TransitionEvent;

    #[test]
    fn test_render_email() {
        let site = Site {
            name: "Shop <prod>".to_string(),
            url: "https://shop.example.com".to_string(),
            ..Default::default()
        };
        let event = NotificationEvent::from_transition(&site, &TransitionEvent::SlowResponse { response_time_ms: 7200 });

        let (subject, html) = render_email(&site, &event, Utc::now());

        assert_eq!(subject, "⚠️ High Response Time - Shop <prod>");
        assert!(html.contains("Shop &lt;prod&gt;"));
        assert!(html.contains("<li><strong>URL:</strong> https://shop.example.com</li>"));
        assert!(html.contains("<li><strong>Response time:</strong> 7200ms</li>"));
    }

    #[test]
    fn test_mailer_rejects_bad_sender() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            secure: false,
            username: None,
            password: None,
            from: "not an address".to_string(),
        };
        assert!(matches!(
            Mailer::new(&config, Duration::from_secs(1)),
            Err(DeliveryError::Email(_))
        ));
    }
}
