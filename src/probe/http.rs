//! HTTP probe implementation.

use std::time::{Duration, Instant};

use super::{ProbeError, ProbeResult};

/// Issues one GET per probe against a site.
#[derive(Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("uptrail-monitor/1.0")
            .build()?;

        Ok(Self { client, timeout })
    }

    /// Probe the given URL. Never fails: errors become a `down` result.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        let start = Instant::now();
        let result = self.fetch(url).await;
        let elapsed = start.elapsed().as_millis() as i64;

        match result {
            Ok(status_code) => ProbeResult::from_status(status_code, elapsed),
            Err(e) => {
                tracing::debug!("Probe of {} failed after {}ms: {}", url, elapsed, e);
                ProbeResult::failed(elapsed, e)
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<u16, ProbeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();

        // Read the full body to measure complete transfer time
        let _body = response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(status)
    }

    fn classify(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    }
}
