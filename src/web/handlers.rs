//! HTTP request handlers.

use super::AppState;
use crate::db::{EmailSettings, NewSite, WebhookSettings};
use crate::error::{ErrorBody, MonitorError};
use crate::notify::Channel;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

/// 1x1 transparent GIF served by the tracking endpoint.
pub const TRACKING_PIXEL: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff,
    0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00,
    0x00, 0x02, 0x01, 0x44, 0x00, 0x3b,
];

impl MonitorError {
    fn status_code(&self) -> StatusCode {
        match self {
            MonitorError::Validation(_) => StatusCode::BAD_REQUEST,
            MonitorError::Authorization(_) => StatusCode::FORBIDDEN,
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::Delivery(_) => StatusCode::BAD_GATEWAY,
            MonitorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        if let MonitorError::Storage(e) = &self {
            tracing::error!("Storage failure: {}", e);
        }
        (self.status_code(), Json(ErrorBody::from(&self))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner: Option<String>,
}

impl OwnerQuery {
    fn required(self) -> Result<String, MonitorError> {
        self.owner
            .filter(|o| !o.is_empty())
            .ok_or_else(|| MonitorError::Validation("owner is required".to_string()))
    }
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "checkIntervalSecs": state.config.monitor.check_interval.as_secs(),
    }))
}

pub async fn handle_generate_token(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"token": state.monitor.generate_token()}))
}

// ============================================================================
// API: Sites
// ============================================================================

pub async fn handle_list_sites(State(state): State<AppState>, Query(query): Query<OwnerQuery>) -> Response {
    match state.monitor.list_sites(query.owner.as_deref()) {
        Ok(sites) => Json(sites).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_create_site(State(state): State<AppState>, Json(req): Json<NewSite>) -> Response {
    match state.monitor.register(req).await {
        Ok(site) => (StatusCode::CREATED, Json(site)).into_response(),
        Err(e) => {
            tracing::warn!("Registration rejected: {}", e);
            e.into_response()
        }
    }
}

pub async fn handle_get_site(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.monitor.get_site(id) {
        Ok(site) => Json(site).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_delete_site(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.monitor.delete_site(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_refresh_site(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.monitor.check_site(id).await {
        Ok(site) => Json(site).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_site_logs(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.monitor.site_logs(id) {
        Ok(history) => Json(history).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_verify_site(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.monitor.verify(id).await {
        Ok(()) => Json(json!({"verified": true})).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_check_tracking(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.monitor.check_tracking(id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

pub async fn handle_update_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TokenRequest>,
) -> Response {
    match state.monitor.regenerate_token(id, &req.token).await {
        Ok(()) => Json(json!({"updated": true})).into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// API: Notifications
// ============================================================================

pub async fn handle_update_email(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<EmailSettings>,
) -> Response {
    match state.monitor.update_email(id, req) {
        Ok(notifications) => Json(notifications).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_update_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<WebhookSettings>,
) -> Response {
    match state.monitor.update_webhook(id, req) {
        Ok(notifications) => Json(notifications).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct TestNotificationRequest {
    pub channel: Channel,
}

pub async fn handle_test_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TestNotificationRequest>,
) -> Response {
    match state.monitor.test_notification(id, req.channel).await {
        Ok(()) => Json(json!({"sent": true})).into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// API: Alerts and statistics
// ============================================================================

pub async fn handle_recent_alerts(State(state): State<AppState>, Query(query): Query<OwnerQuery>) -> Response {
    let result = query.required().and_then(|owner| state.monitor.recent_alerts(&owner));
    match result {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_site_alerts(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.monitor.site_alerts(id) {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_acknowledge_alert(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.monitor.acknowledge_alert(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_purge_stats(State(state): State<AppState>, Path(owner): Path<String>) -> Response {
    match state.monitor.purge_stats(&owner) {
        Ok(removed) => Json(json!({"removed": removed})).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_overview(State(state): State<AppState>, Query(query): Query<OwnerQuery>) -> Response {
    match state.monitor.overview(query.owner.as_deref()) {
        Ok(overview) => Json(overview).into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Tracking pixel
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TrackingQuery {
    pub token: Option<String>,
}

pub async fn handle_tracking(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
    Query(query): Query<TrackingQuery>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing token").into_response();
    };

    match state.monitor.record_visit(site_id, &token).await {
        Ok(()) => (
            [
                (header::CONTENT_TYPE, "image/gif"),
                (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
                (header::PRAGMA, "no-cache"),
                (header::EXPIRES, "0"),
            ],
            TRACKING_PIXEL,
        )
            .into_response(),
        Err(e) => {
            tracing::debug!("Tracking rejected for site {}: {}", site_id, e);
            (e.status_code(), e.to_string()).into_response()
        }
    }
}
