//! Error types for sidereal-release.

use crate::types::DeploymentId;

/// Result type alias using [`ReleaseError`].
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// Errors that can occur while orchestrating a release.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Required external configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Deployment not found.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    /// Alert not found.
    #[error("alert not found: {0}")]
    AlertNotFound(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: &'static str,
        /// Attempted target state.
        to: &'static str,
    },

    /// The CI/CD executor rejected the dispatch.
    #[error("executor dispatch failed with status {status}: {body}")]
    Executor {
        /// HTTP status returned by the executor.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },

    /// Health never cleared within the monitoring window.
    #[error("deployment monitoring timeout after {timeout_ms}ms ({critical_alerts} critical alerts outstanding)")]
    MonitorTimeout {
        /// Configured timeout.
        timeout_ms: u64,
        /// Critical alerts observed on the last poll.
        critical_alerts: usize,
    },

    /// Monitoring was aborted by an operator.
    #[error("deployment monitoring cancelled")]
    MonitorCancelled,

    /// No monitor is running for the deployment.
    #[error("no active monitor for deployment {0}")]
    MonitorNotFound(String),

    /// No earlier successful deployment exists to roll back to.
    #[error("no previous successful deployment found for {0}")]
    NoPreviousSuccess(String),

    /// A deploy attempt failed; wraps the original error.
    #[error("deployment {id} failed: {source}")]
    DeploymentFailed {
        /// The failed deployment.
        id: DeploymentId,
        /// The error that failed it.
        #[source]
        source: Box<ReleaseError>,
    },

    /// Outbound notification error.
    #[error("notification error: {0}")]
    Notification(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Malformed request body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown action name.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReleaseError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap an error as the failure of a specific deployment.
    #[must_use]
    pub fn deployment_failed(id: DeploymentId, source: Self) -> Self {
        match source {
            already @ Self::DeploymentFailed { .. } => already,
            other => Self::DeploymentFailed {
                id,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, unwrapping any deployment failure context.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::DeploymentFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
