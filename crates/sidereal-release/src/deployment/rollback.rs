//! Rollback to the last known good deployment.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::alerts::AlertService;
use crate::error::{ReleaseError, ReleaseResult};
use crate::executor::{DispatchAck, DispatchPayload, ExecutorTrigger};
use crate::state::{Deployment, Pending};
use crate::store::DeploymentStore;
use crate::types::{
    alert_types, AlertSeverity, DeploymentData, DeploymentId, DeploymentStatus, Environment,
    NewAlert,
};

/// Result of a dispatched rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    /// The new rollback deployment.
    pub rollback_id: DeploymentId,
    /// The deployment being rolled back.
    pub rollback_from: DeploymentId,
    /// The last known good deployment that was restored.
    pub target_deployment_id: DeploymentId,
    /// Version restored.
    pub target_version: String,
    /// Commit restored.
    pub target_commit: String,
    /// Final status of the rollback deployment.
    pub status: DeploymentStatus,
    /// Executor acknowledgement.
    pub ack: DispatchAck,
}

/// Re-dispatches the most recent successful deployment of an environment.
///
/// Rollbacks are verified by the executor dispatch alone; health is not
/// monitored again.
pub struct RollbackManager {
    store: Arc<dyn DeploymentStore>,
    executor: Arc<dyn ExecutorTrigger>,
    alerts: AlertService,
}

impl RollbackManager {
    /// Create a new rollback manager.
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        executor: Arc<dyn ExecutorTrigger>,
        alerts: AlertService,
    ) -> Self {
        Self {
            store,
            executor,
            alerts,
        }
    }

    /// Roll `environment` back from `from` to its last known good version.
    ///
    /// A critical alert is raised before anything else so that no rollback
    /// attempt goes unnoticed. Fails with `NoPreviousSuccess`, creating no
    /// deployment, if nothing succeeded before.
    pub async fn rollback(
        &self,
        environment: Environment,
        from: &DeploymentId,
    ) -> ReleaseResult<RollbackOutcome> {
        warn!(environment = %environment, rollback_from = %from, "initiating rollback");

        self.alerts
            .raise(
                NewAlert::new(
                    alert_types::EMERGENCY_ROLLBACK,
                    AlertSeverity::Critical,
                    format!("Emergency rollback in {environment}"),
                    format!("Rolling {environment} back from deployment {from}"),
                )
                .with_metadata(json!({
                    "environment": environment,
                    "rollback_from": from,
                })),
            )
            .await;

        let target = self
            .store
            .latest_successful(environment, Some(from))
            .await?
            .ok_or_else(|| ReleaseError::NoPreviousSuccess(environment.to_string()))?;

        let data = DeploymentData::new(
            environment,
            target.data.version.clone(),
            target.data.commit_hash.clone(),
            target.data.config.clone(),
        )
        .rolling_back_from(from.clone());

        let mut running = Deployment::<Pending>::create(data).start();
        running.log(format!(
            "rolling back to {} ({}) from deployment {}",
            target.data.version, target.data.id, from
        ));
        let rollback_id = running.id().clone();
        self.store.insert(&running.to_record()).await?;

        let payload = DispatchPayload::for_deployment(running.data());
        match self.executor.trigger(&payload).await {
            Ok(ack) => {
                let done = running.succeed();
                self.store.update(&done.to_record()).await?;

                info!(
                    rollback_id = %rollback_id,
                    target_version = %target.data.version,
                    "rollback dispatched"
                );

                Ok(RollbackOutcome {
                    rollback_id,
                    rollback_from: from.clone(),
                    target_deployment_id: target.data.id,
                    target_version: target.data.version,
                    target_commit: target.data.commit_hash,
                    status: done.status(),
                    ack,
                })
            }
            Err(e) => {
                error!(rollback_id = %rollback_id, error = %e, "rollback dispatch failed");

                let failed = running.fail(e.to_string());
                if let Err(update_err) = self.store.update(&failed.to_record()).await {
                    error!(rollback_id = %rollback_id, error = %update_err, "failed to record rollback failure");
                }

                self.alerts
                    .raise(
                        NewAlert::new(
                            alert_types::ROLLBACK_FAILED,
                            AlertSeverity::Critical,
                            format!("Rollback failed in {environment}"),
                            format!(
                                "Rollback {rollback_id} to {} failed: {e}",
                                target.data.version
                            ),
                        )
                        .with_metadata(json!({
                            "environment": environment,
                            "rollback_id": rollback_id,
                            "rollback_from": from,
                            "target_version": target.data.version,
                        })),
                    )
                    .await;

                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for RollbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackManager").finish_non_exhaustive()
    }
}
