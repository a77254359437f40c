//! Alert endpoints.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::store::AlertFilter;
use crate::types::{AlertId, AlertSeverity, AlertStatus};

use super::{error_response, AppState};

/// Query parameters for listing alerts.
#[derive(Debug, Default, Deserialize)]
pub struct ListAlertsQuery {
    /// Filter by alert type.
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    /// Filter by severity.
    pub severity: Option<AlertSeverity>,
    /// Filter by status.
    pub status: Option<AlertStatus>,
    /// Maximum number of results.
    pub limit: Option<u32>,
}

/// `GET /alerts`.
pub async fn list(State(state): State<AppState>, Query(query): Query<ListAlertsQuery>) -> Response {
    let mut filter = AlertFilter::new();

    if let Some(alert_type) = query.alert_type {
        filter = filter.with_type(alert_type);
    }
    if let Some(severity) = query.severity {
        filter = filter.with_severity(severity);
    }
    if let Some(status) = query.status {
        filter = filter.with_status(status);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }

    match state.orchestrator.alerts().list(&filter).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /alerts/{id}/resolve`.
pub async fn resolve(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    info!(alert_id = %id, "resolving alert via API");

    match state.orchestrator.alerts().resolve(&AlertId::new(id)).await {
        Ok(alert) => Json(alert).into_response(),
        Err(e) => error_response(&e),
    }
}
