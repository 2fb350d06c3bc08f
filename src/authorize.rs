//! Ownership verification through the site's well-known token file.
//!
//! A site operator proves consent to be monitored by publishing
//! `MONITOR_TOKEN=<token>` in `{site}/.well-known/monitoring-allowed`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const WELL_KNOWN_PATH: &str = ".well-known/monitoring-allowed";
pub const TOKEN_LINE_PREFIX: &str = "MONITOR_TOKEN=";

#[derive(Error, Debug)]
pub enum AuthorizeError {
    #[error("{0}")]
    Validation(String),
    #[error("well-known file unreachable: {0}")]
    Unreachable(String),
    #[error("well-known file returned HTTP {0}")]
    Status(u16),
    #[error("well-known file does not publish a MONITOR_TOKEN line")]
    MissingToken,
    #[error("published token does not match")]
    TokenMismatch,
    #[error("site page unreachable: {0}")]
    PageUnreachable(String),
    #[error("site page returned HTTP {0}")]
    PageStatus(u16),
}

/// Verifies that a site publishes the token it is registered with.
#[derive(Clone)]
pub struct SiteAuthorizer {
    client: reqwest::Client,
    allowed_domains: Option<Vec<String>>,
}

impl SiteAuthorizer {
    pub fn new(timeout: Duration, allowed_domains: Option<Vec<String>>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("uptrail/1.0")
            .build()?;

        Ok(Self {
            client,
            allowed_domains,
        })
    }

    /// Check protocol and, when an allowlist is configured, the domain.
    pub fn validate_url(&self, raw: &str) -> Result<Url, AuthorizeError> {
        let url = Url::parse(raw).map_err(|e| AuthorizeError::Validation(format!("invalid URL {}: {}", raw, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AuthorizeError::Validation(format!(
                "protocol {} is not allowed, use http or https",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| AuthorizeError::Validation(format!("URL {} has no host", raw)))?
            .to_ascii_lowercase();

        if let Some(allowed) = &self.allowed_domains {
            let permitted = allowed
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d)));
            if !permitted {
                return Err(AuthorizeError::Validation(format!(
                    "domain {} is not allowed for monitoring",
                    host
                )));
            }
        }

        Ok(url)
    }

    /// Succeed iff the site publishes exactly `claimed_token`.
    pub async fn authorize(&self, url: &str, claimed_token: &str) -> Result<(), AuthorizeError> {
        let published = self.fetch_published_token(url).await?;
        if published != claimed_token {
            tracing::warn!("Token mismatch for {}", url);
            return Err(AuthorizeError::TokenMismatch);
        }
        Ok(())
    }

    /// Fetch the token currently published by the site.
    pub async fn fetch_published_token(&self, url: &str) -> Result<String, AuthorizeError> {
        let url = self.validate_url(url)?;
        let file_url = well_known_url(&url);

        let response = self
            .client
            .get(&file_url)
            .send()
            .await
            .map_err(|e| AuthorizeError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!("Well-known file at {} returned {}", file_url, status);
            return Err(AuthorizeError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthorizeError::Unreachable(e.to_string()))?;

        parse_published_token(&body)
            .map(str::to_string)
            .ok_or(AuthorizeError::MissingToken)
    }

    /// Fetch the body of the site's page itself.
    pub async fn fetch_page(&self, url: &str) -> Result<String, AuthorizeError> {
        let url = self.validate_url(url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AuthorizeError::PageUnreachable(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AuthorizeError::PageStatus(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| AuthorizeError::PageUnreachable(e.to_string()))
    }
}

/// Location of the token file for a site. Query and fragment are not part of the base.
pub fn well_known_url(url: &Url) -> String {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    format!("{}/{}", base.as_str().trim_end_matches('/'), WELL_KNOWN_PATH)
}

/// Extract the token from the first `MONITOR_TOKEN=` line of a well-known file.
pub fn parse_published_token(body: &str) -> Option<&str> {
    body.lines()
        .find_map(|line| line.strip_prefix(TOKEN_LINE_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Generate a new monitoring token: 32 random bytes, base64url without padding.
pub fn generate_token(prefix: &str) -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve_well_known(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/monitoring-allowed"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn authorizer() -> SiteAuthorizer {
        SiteAuthorizer::new(Duration::from_secs(2), None).unwrap()
    }

    #[test]
    fn test_parse_published_token() {
        assert_eq!(parse_published_token("MONITOR_TOKEN=abc123\n"), Some("abc123"));
        assert_eq!(parse_published_token("# comment\r\nMONITOR_TOKEN= abc123 \r\n"), Some("abc123"));
        assert_eq!(
            parse_published_token("MONITOR_TOKEN=first\nMONITOR_TOKEN=second\n"),
            Some("first")
        );
        assert_eq!(parse_published_token(""), None);
        assert_eq!(parse_published_token("MONITOR_TOKEN=\n"), None);
        assert_eq!(parse_published_token("  MONITOR_TOKEN=indented"), None);
    }

    #[test]
    fn test_well_known_url() {
        let url = |raw: &str| well_known_url(&Url::parse(raw).unwrap());
        assert_eq!(url("https://x.com"), "https://x.com/.well-known/monitoring-allowed");
        assert_eq!(url("https://x.com/?a=1"), "https://x.com/.well-known/monitoring-allowed");
        assert_eq!(
            url("https://x.com/shop/?a=1#top"),
            "https://x.com/shop/.well-known/monitoring-allowed"
        );
    }

    #[test]
    fn test_generate_token() {
        let token = generate_token("uptrail_");
        let encoded = token.strip_prefix("uptrail_").unwrap();
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(encoded.len(), 43);
        assert!(!encoded.contains('='));
        assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(generate_token(""), generate_token(""));
    }

    #[test]
    fn test_validate_url() {
        let auth = authorizer();
        assert!(auth.validate_url("https://example.com").is_ok());
        assert!(matches!(auth.validate_url("ftp://example.com"), Err(AuthorizeError::Validation(_))));
        assert!(matches!(auth.validate_url("not a url"), Err(AuthorizeError::Validation(_))));

        let restricted =
            SiteAuthorizer::new(Duration::from_secs(1), Some(vec!["example.com".to_string()])).unwrap();
        assert!(restricted.validate_url("https://example.com").is_ok());
        assert!(restricted.validate_url("https://status.Example.com/path").is_ok());
        assert!(matches!(
            restricted.validate_url("https://notexample.com"),
            Err(AuthorizeError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_authorize_matching_token() {
        let server = serve_well_known(200, "MONITOR_TOKEN=abc123\n").await;
        let auth = authorizer();

        assert!(auth.authorize(&server.uri(), "abc123").await.is_ok());
        assert!(matches!(
            auth.authorize(&server.uri(), "abc124").await,
            Err(AuthorizeError::TokenMismatch)
        ));
        assert!(matches!(
            auth.authorize(&server.uri(), "ABC123").await,
            Err(AuthorizeError::TokenMismatch)
        ));
    }

    #[tokio::test]
    async fn test_authorize_empty_body() {
        let server = serve_well_known(200, "").await;
        assert!(matches!(
            authorizer().authorize(&server.uri(), "abc123").await,
            Err(AuthorizeError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_authorize_not_found() {
        let server = serve_well_known(404, "MONITOR_TOKEN=abc123\n").await;
        assert!(matches!(
            authorizer().authorize(&server.uri(), "abc123").await,
            Err(AuthorizeError::Status(404))
        ));
    }

    #[tokio::test]
    async fn test_authorize_unreachable() {
        let result = authorizer().authorize("http://127.0.0.1:1", "abc123").await;
        assert!(matches!(result, Err(AuthorizeError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_disallowed_domain_rejected_before_fetch() {
        let server = serve_well_known(200, "MONITOR_TOKEN=abc123\n").await;
        let auth = SiteAuthorizer::new(Duration::from_secs(1), Some(vec!["example.com".to_string()])).unwrap();

        assert!(matches!(
            auth.authorize(&server.uri(), "abc123").await,
            Err(AuthorizeError::Validation(_))
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
