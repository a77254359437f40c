//! Release actions.
//!
//! Every action is reachable through the single action endpoint, which takes
//! `{"action": "...", ...}`, and through a REST alias.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::deployment::{
    DeployOutcome, DeployRequest, MonitorOutcome, ReleaseOrchestrator, RollbackOutcome,
};
use crate::error::{ReleaseError, ReleaseResult};
use crate::store::DeploymentFilter;
use crate::types::{DeploymentId, DeploymentRecord, DeploymentStatus, Environment, HealthSnapshot};

use super::{error_response, AppState};

/// Body of the `rollback` action.
#[derive(Debug, Clone, Deserialize)]
pub struct RollbackRequest {
    /// Environment to roll back.
    pub environment: Environment,
    /// Deployment being rolled back.
    pub deployment_id: DeploymentId,
}

/// Body of the `status` and `cancel` actions.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentRef {
    /// Deployment to act on.
    pub deployment_id: DeploymentId,
}

/// Query parameters for listing deployments.
#[derive(Debug, Default, Deserialize)]
pub struct ListDeploymentsQuery {
    /// Filter by environment.
    pub environment: Option<Environment>,
    /// Filter by status.
    pub status: Option<DeploymentStatus>,
    /// Filter by rollback flag.
    pub is_rollback: Option<bool>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
struct DeployResponse<'a> {
    status: &'static str,
    deployment_id: &'a DeploymentId,
    environment: Environment,
    version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a MonitorOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<&'a HealthSnapshot>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    status: &'static str,
    valid: bool,
    validations: BTreeMap<String, bool>,
    missing_vars: Vec<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct RollbackResponse {
    status: &'static str,
    rollback_id: DeploymentId,
    rollback_from: DeploymentId,
    environment: Environment,
    version: String,
    result: RollbackOutcome,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    deployment: DeploymentRecord,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    status: &'static str,
    deployment_id: DeploymentId,
    message: &'static str,
    timestamp: DateTime<Utc>,
}

/// `POST /` with `{"action": ...}`.
pub async fn dispatch(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return rejected(&rejection),
    };
    let serde_json::Value::Object(mut fields) = body else {
        return error_response(&ReleaseError::InvalidRequest(
            "request body must be a JSON object".to_owned(),
        ));
    };

    let action = match fields.remove("action") {
        Some(serde_json::Value::String(action)) => action,
        Some(_) | None => {
            return error_response(&ReleaseError::InvalidRequest(
                "missing action".to_owned(),
            ))
        }
    };
    let body = serde_json::Value::Object(fields);

    info!(action = %action, "release action requested");

    match action.as_str() {
        "deploy" => match parse(body) {
            Ok(request) => run_deploy(&state, request).await,
            Err(e) => error_response(&e),
        },
        "validate" => run_validate(&state).await,
        "rollback" => match parse::<RollbackRequest>(body) {
            Ok(request) => run_rollback(&state, request).await,
            Err(e) => error_response(&e),
        },
        "status" => match parse::<DeploymentRef>(body) {
            Ok(request) => run_status(&state, &request.deployment_id).await,
            Err(e) => error_response(&e),
        },
        "cancel" => match parse::<DeploymentRef>(body) {
            Ok(request) => run_cancel(&state, request.deployment_id),
            Err(e) => error_response(&e),
        },
        other => error_response(&ReleaseError::UnknownAction(other.to_owned())),
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T, ReleaseError> {
    serde_json::from_value(body).map_err(|e| ReleaseError::InvalidRequest(e.to_string()))
}

fn rejected(rejection: &JsonRejection) -> Response {
    error_response(&ReleaseError::InvalidRequest(rejection.body_text()))
}

/// Run an orchestrator call on its own task.
///
/// The task outlives the handler future if the client disconnects.
async fn detached<T, F, Fut>(state: &AppState, call: F) -> ReleaseResult<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<ReleaseOrchestrator>) -> Fut,
    Fut: Future<Output = ReleaseResult<T>> + Send + 'static,
{
    let task = tokio::spawn(call(Arc::clone(&state.orchestrator)));
    task.await.unwrap_or_else(|e| {
        error!(error = %e, "release task aborted");
        Err(ReleaseError::internal(format!("release task aborted: {e}")))
    })
}

/// `POST /deployments`.
pub async fn deploy(
    State(state): State<AppState>,
    request: Result<Json<DeployRequest>, JsonRejection>,
) -> Response {
    match request {
        Ok(Json(request)) => run_deploy(&state, request).await,
        Err(rejection) => rejected(&rejection),
    }
}

/// `GET /validate`.
pub async fn validate(State(state): State<AppState>) -> Response {
    run_validate(&state).await
}

/// `POST /rollback`.
pub async fn rollback(
    State(state): State<AppState>,
    request: Result<Json<RollbackRequest>, JsonRejection>,
) -> Response {
    match request {
        Ok(Json(request)) => run_rollback(&state, request).await,
        Err(rejection) => rejected(&rejection),
    }
}

/// `GET /deployments/{id}`.
pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run_status(&state, &DeploymentId::new(id)).await
}

/// `DELETE /deployments/{id}/monitor`.
pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run_cancel(&state, DeploymentId::new(id))
}

/// `GET /deployments`.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Response {
    let mut filter = DeploymentFilter::new();

    if let Some(environment) = query.environment {
        filter = filter.with_environment(environment);
    }
    if let Some(status) = query.status {
        filter = filter.with_status(status);
    }
    if let Some(is_rollback) = query.is_rollback {
        filter = filter.with_rollback(is_rollback);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }
    if let Some(offset) = query.offset {
        filter = filter.with_offset(offset);
    }

    match state.orchestrator.history(&filter).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn run_deploy(state: &AppState, request: DeployRequest) -> Response {
    let result = detached(state, |orchestrator| async move {
        orchestrator.deploy(request).await
    })
    .await;

    match result {
        Ok(DeployOutcome::Succeeded {
            deployment,
            monitor,
        }) => Json(DeployResponse {
            status: "success",
            deployment_id: &deployment.data.id,
            environment: deployment.data.environment,
            version: &deployment.data.version,
            message: None,
            result: Some(&monitor),
            snapshot: Some(&monitor.snapshot),
            timestamp: Utc::now(),
        })
        .into_response(),
        Ok(DeployOutcome::Cancelled {
            deployment,
            snapshot,
        }) => (
            StatusCode::BAD_REQUEST,
            Json(DeployResponse {
                status: "cancelled",
                deployment_id: &deployment.data.id,
                environment: deployment.data.environment,
                version: &deployment.data.version,
                message: deployment.data.error.as_deref(),
                result: None,
                snapshot: Some(&snapshot),
                timestamp: Utc::now(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn run_validate(state: &AppState) -> Response {
    let report = state.orchestrator.validate().await;
    Json(ValidateResponse {
        status: if report.valid { "success" } else { "failed" },
        valid: report.valid,
        validations: report.checks,
        missing_vars: report.missing_config,
        timestamp: Utc::now(),
    })
    .into_response()
}

async fn run_rollback(state: &AppState, request: RollbackRequest) -> Response {
    let environment = request.environment;
    let result = detached(state, |orchestrator| async move {
        orchestrator
            .rollback(environment, &request.deployment_id)
            .await
    })
    .await;

    match result {
        Ok(outcome) => Json(RollbackResponse {
            status: "success",
            rollback_id: outcome.rollback_id.clone(),
            rollback_from: outcome.rollback_from.clone(),
            environment,
            version: outcome.target_version.clone(),
            result: outcome,
            timestamp: Utc::now(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn run_status(state: &AppState, deployment_id: &DeploymentId) -> Response {
    match state.orchestrator.status(deployment_id).await {
        Ok(deployment) => {
            // as-of time of the record, so repeated reads are identical
            let timestamp = deployment
                .data
                .completed_at
                .unwrap_or(deployment.data.started_at);
            Json(StatusResponse {
                status: "success",
                deployment,
                timestamp,
            })
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

fn run_cancel(state: &AppState, deployment_id: DeploymentId) -> Response {
    match state.orchestrator.cancel(&deployment_id) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(CancelResponse {
                status: "success",
                deployment_id,
                message: "monitoring cancellation requested",
                timestamp: Utc::now(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}
