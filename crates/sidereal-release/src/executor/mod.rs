//! Dispatch to the external CI/CD executor.
//!
//! The executor performs the actual build and rollout. The orchestrator only
//! hands it a payload and treats a non-success response as fatal.

mod github;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReleaseResult;
use crate::types::{DeploymentData, DeploymentId, Environment};

pub use github::GitHubDispatchExecutor;

/// Payload forwarded to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPayload {
    /// Deployment the dispatch belongs to.
    pub deployment_id: DeploymentId,
    /// Target environment.
    pub environment: Environment,
    /// Version to release.
    pub version: String,
    /// Commit to release.
    pub commit_hash: String,
    /// Whether this dispatch restores an earlier version.
    pub is_rollback: bool,
    /// Caller-supplied configuration, passed through untouched.
    pub config: serde_json::Value,
}

impl DispatchPayload {
    /// Build the payload for a deployment.
    #[must_use]
    pub fn for_deployment(data: &DeploymentData) -> Self {
        Self {
            deployment_id: data.id.clone(),
            environment: data.environment,
            version: data.version.clone(),
            commit_hash: data.commit_hash.clone(),
            is_rollback: data.is_rollback,
            config: data.config.clone(),
        }
    }
}

/// Acknowledgement of an accepted dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAck {
    /// HTTP status returned by the executor.
    pub status: u16,
    /// When the dispatch was accepted.
    pub dispatched_at: DateTime<Utc>,
}

/// Triggers the external executor.
#[async_trait]
pub trait ExecutorTrigger: Send + Sync {
    /// Dispatch a deployment.
    ///
    /// Missing credentials fail with a configuration error before any network
    /// call; a non-success response fails with the response body.
    async fn trigger(&self, payload: &DispatchPayload) -> ReleaseResult<DispatchAck>;
}
