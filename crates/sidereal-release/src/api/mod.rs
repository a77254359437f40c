//! HTTP API for the release service.
//!
//! Provides endpoints for:
//! - The action endpoint (`POST /` with `{"action": ...}`)
//! - Deployment, rollback and validation aliases
//! - Alert listing and resolution
//! - Health and readiness checks
//! - Prometheus metrics

mod actions;
mod alerts;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::deployment::ReleaseOrchestrator;
use crate::error::ReleaseError;
use crate::store::{AlertFilter, DeploymentFilter};
use crate::types::{AlertSeverity, AlertStatus, DeploymentId, DeploymentStatus};

pub use actions::{DeploymentRef, ListDeploymentsQuery, RollbackRequest};
pub use alerts::ListAlertsQuery;

/// Shared application state for the release service.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Orchestrator behind every endpoint.
    pub orchestrator: Arc<ReleaseOrchestrator>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Action endpoint
        .route("/", post(actions::dispatch))
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Deployments
        .route("/deployments", post(actions::deploy))
        .route("/deployments", get(actions::list))
        .route("/deployments/{id}", get(actions::status))
        .route("/deployments/{id}/monitor", delete(actions::cancel))
        .route("/rollback", post(actions::rollback))
        .route("/validate", get(actions::validate))
        // Alerts
        .route("/alerts", get(alerts::list))
        .route("/alerts/{id}/resolve", post(alerts::resolve))
        // Metrics
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// `failed` for a deploy that ran and failed, `error` otherwise.
    pub status: &'static str,
    /// Error message.
    pub error: String,
    /// The failed deployment, if one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<DeploymentId>,
    /// When the error was reported.
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    fn from_error(error: &ReleaseError) -> Self {
        let (status, deployment_id) = match error {
            ReleaseError::DeploymentFailed { id, .. } => ("failed", Some(id.clone())),
            _ => ("error", None),
        };
        Self {
            status,
            error: error.to_string(),
            deployment_id,
            timestamp: Utc::now(),
        }
    }
}

pub(crate) fn error_response(error: &ReleaseError) -> Response {
    (error_to_status(error), Json(ErrorResponse::from_error(error))).into_response()
}

const fn error_to_status(error: &ReleaseError) -> StatusCode {
    match error {
        ReleaseError::DeploymentNotFound(_)
        | ReleaseError::AlertNotFound(_)
        | ReleaseError::MonitorNotFound(_) => StatusCode::NOT_FOUND,
        ReleaseError::UnknownAction(_) | ReleaseError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        ReleaseError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let monitoring = state.orchestrator.monitors().len();

    match state.orchestrator.check_store().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                monitoring,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    monitoring,
                }),
            )
        }
    }
}

/// Metrics endpoint.
async fn metrics(State(state): State<AppState>) -> String {
    let mut output = String::new();

    let statuses = [
        DeploymentStatus::Pending,
        DeploymentStatus::InProgress,
        DeploymentStatus::Success,
        DeploymentStatus::Failed,
    ];

    output.push_str(
        "# HELP sidereal_release_deployments_total Number of deployments by status\n",
    );
    output.push_str("# TYPE sidereal_release_deployments_total gauge\n");

    for status in statuses {
        let filter = DeploymentFilter::new().with_status(status);
        let count = state
            .orchestrator
            .history(&filter)
            .await
            .map(|d| d.len())
            .unwrap_or(0);
        let _ = writeln!(
            output,
            "sidereal_release_deployments_total{{status=\"{status}\"}} {count}"
        );
    }

    let severities = [
        AlertSeverity::Critical,
        AlertSeverity::High,
        AlertSeverity::Medium,
        AlertSeverity::Low,
    ];

    output.push_str("# HELP sidereal_release_open_alerts Number of open alerts by severity\n");
    output.push_str("# TYPE sidereal_release_open_alerts gauge\n");

    for severity in severities {
        let filter = AlertFilter::new()
            .with_status(AlertStatus::Open)
            .with_severity(severity);
        let count = state
            .orchestrator
            .alerts()
            .list(&filter)
            .await
            .map(|a| a.len())
            .unwrap_or(0);
        let _ = writeln!(
            output,
            "sidereal_release_open_alerts{{severity=\"{severity}\"}} {count}"
        );
    }

    output.push_str("# HELP sidereal_release_active_monitors Deployments being monitored\n");
    output.push_str("# TYPE sidereal_release_active_monitors gauge\n");
    let _ = writeln!(
        output,
        "sidereal_release_active_monitors {}",
        state.orchestrator.monitors().len()
    );

    output
}

/// Health response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    monitoring: usize,
}
