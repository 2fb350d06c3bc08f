//! Tracking snippet installation check.

use super::Monitor;
use crate::authorize::AuthorizeError;
use crate::db::Site;
use crate::error::{ErrorBody, MonitorError};

use regex::Regex;
use serde::Serialize;

/// Which steps of the installation check passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingDetails {
    pub well_known_file: bool,
    pub token_match: bool,
    pub page_reachable: bool,
    pub site_id_match: bool,
    pub endpoint_match: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackingReport {
    pub installed: bool,
    pub details: TrackingDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Markers the tracking snippet must carry: `siteId: '<id>'` and an endpoint ending in `/tracking`.
pub fn find_markers(page: &str, site_id: i64) -> Result<(bool, bool), regex::Error> {
    let site_id_re = Regex::new(&format!(r#"siteId:\s*['"]{}['"]"#, site_id))?;
    let endpoint_re = Regex::new(r#"endpoint:\s*['"][^'"]*/tracking/?['"]"#)?;
    Ok((site_id_re.is_match(page), endpoint_re.is_match(page)))
}

impl Monitor {
    /// Check that the site still publishes its token and embeds the tracking snippet.
    ///
    /// Check failures are reported in the returned report; only a missing site or
    /// a storage failure is an error.
    pub async fn check_tracking(&self, site_id: i64) -> Result<TrackingReport, MonitorError> {
        let site = self.load(site_id)?;
        let mut report = TrackingReport::default();

        match self.inspect_tracking(&site, &mut report.details).await {
            Ok(()) => {
                report.installed = true;
                tracing::info!("Tracking snippet verified for {}", site.name);
            }
            Err(e @ (MonitorError::NotFound(_) | MonitorError::Storage(_))) => return Err(e),
            Err(e) => {
                tracing::info!("Tracking check for {} failed: {}", site.name, e);
                report.error = Some(ErrorBody::from(&e));
            }
        }
        Ok(report)
    }

    async fn inspect_tracking(&self, site: &Site, details: &mut TrackingDetails) -> Result<(), MonitorError> {
        let published = self.authorizer.fetch_published_token(&site.url).await?;
        details.well_known_file = true;
        if published != site.monitoring_token {
            return Err(AuthorizeError::TokenMismatch.into());
        }
        details.token_match = true;

        let page = self.authorizer.fetch_page(&site.url).await?;
        details.page_reachable = true;

        let (site_id_match, endpoint_match) = find_markers(&page, site.id)
            .map_err(|e| MonitorError::Validation(format!("tracking pattern: {}", e)))?;
        details.site_id_match = site_id_match;
        details.endpoint_match = endpoint_match;

        if !site_id_match {
            return Err(MonitorError::Validation(format!(
                "tracking snippet does not declare siteId '{}'",
                site.id
            )));
        }
        if !endpoint_match {
            return Err(MonitorError::Validation(
                "tracking snippet endpoint does not point at /tracking".to_string(),
            ));
        }
        Ok(())
    }
}
