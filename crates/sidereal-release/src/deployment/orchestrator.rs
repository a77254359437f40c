//! Release orchestration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::alerts::AlertService;
use crate::config::MonitorConfig;
use crate::error::{ReleaseError, ReleaseResult};
use crate::executor::{DispatchPayload, ExecutorTrigger};
use crate::health::HealthProbe;
use crate::state::{Deployment, Failed, InProgress, Pending, Succeeded};
use crate::store::{DeploymentFilter, DeploymentStore};
use crate::types::{
    BackupRecord, DeploymentData, DeploymentId, DeploymentRecord, Environment, HealthSnapshot,
};
use crate::validation::{DeploymentValidator, ValidationReport};

use super::monitor::{DeploymentMonitor, MonitorHandles, MonitorOutcome};
use super::rollback::{RollbackManager, RollbackOutcome};

/// Request to deploy a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Target environment.
    pub environment: Environment,
    /// Version label.
    pub version: String,
    /// Commit reference.
    pub commit_hash: String,
    /// Roll back automatically if a production deploy fails.
    #[serde(default)]
    pub auto_rollback: bool,
    /// Monitoring timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_timeout: Option<u64>,
    /// Any further settings, forwarded to the executor untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DeployRequest {
    /// Create a request with no extra settings.
    #[must_use]
    pub fn new(
        environment: Environment,
        version: impl Into<String>,
        commit_hash: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            version: version.into(),
            commit_hash: commit_hash.into(),
            auto_rollback: false,
            health_check_timeout: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Enable or disable auto-rollback.
    #[must_use]
    pub fn with_auto_rollback(mut self, auto_rollback: bool) -> Self {
        self.auto_rollback = auto_rollback;
        self
    }

    /// Set the monitoring timeout.
    #[must_use]
    pub fn with_health_check_timeout(mut self, timeout_ms: u64) -> Self {
        self.health_check_timeout = Some(timeout_ms);
        self
    }

    fn into_data(self) -> ReleaseResult<DeploymentData> {
        let config = serde_json::to_value(&self)
            .map_err(|e| ReleaseError::Serialisation(format!("failed to serialise config: {e}")))?;
        Ok(DeploymentData::new(
            self.environment,
            self.version,
            self.commit_hash,
            config,
        ))
    }
}

/// Terminal result of a deploy that did not fail.
#[derive(Debug, Clone)]
pub enum DeployOutcome {
    /// Dispatched and health cleared.
    Succeeded {
        /// The final deployment record.
        deployment: DeploymentRecord,
        /// The monitoring result.
        monitor: MonitorOutcome,
    },
    /// Refused by the production health gate; the executor was not called.
    Cancelled {
        /// The final deployment record.
        deployment: DeploymentRecord,
        /// The snapshot that refused the deploy.
        snapshot: HealthSnapshot,
    },
}

impl DeployOutcome {
    /// The final deployment record.
    #[must_use]
    pub const fn deployment(&self) -> &DeploymentRecord {
        match self {
            Self::Succeeded { deployment, .. } | Self::Cancelled { deployment, .. } => deployment,
        }
    }

    /// Whether the deploy was refused by the health gate.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

enum Executed {
    Succeeded(Deployment<Succeeded>, MonitorOutcome),
    Gated(Deployment<Failed>, HealthSnapshot),
}

/// Drives deploys, rollbacks, validation and status lookups.
///
/// Holds no per-deployment state besides the cancellation handles of
/// in-flight monitors; everything else lives in the injected stores.
pub struct ReleaseOrchestrator {
    store: Arc<dyn DeploymentStore>,
    probe: Arc<dyn HealthProbe>,
    executor: Arc<dyn ExecutorTrigger>,
    alerts: AlertService,
    validator: DeploymentValidator,
    monitor: DeploymentMonitor,
    rollback: RollbackManager,
    handles: MonitorHandles,
    default_timeout: Duration,
}

impl ReleaseOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        probe: Arc<dyn HealthProbe>,
        executor: Arc<dyn ExecutorTrigger>,
        alerts: AlertService,
        validator: DeploymentValidator,
        monitor_config: &MonitorConfig,
    ) -> Self {
        Self {
            monitor: DeploymentMonitor::new(probe.clone(), monitor_config.poll_interval()),
            rollback: RollbackManager::new(store.clone(), executor.clone(), alerts.clone()),
            store,
            probe,
            executor,
            alerts,
            validator,
            handles: MonitorHandles::new(),
            default_timeout: Duration::from_millis(monitor_config.default_timeout_ms),
        }
    }

    /// Alert service used for escalation.
    #[must_use]
    pub const fn alerts(&self) -> &AlertService {
        &self.alerts
    }

    /// Handles of the deployments currently being monitored.
    #[must_use]
    pub const fn monitors(&self) -> &MonitorHandles {
        &self.handles
    }

    /// Deploy a version.
    ///
    /// Production deploys are refused while critical alerts are open, and a
    /// backup is recorded before dispatch. Any failure marks the deployment
    /// failed and, for production deploys with `auto_rollback`, triggers
    /// exactly one rollback before the original error is returned.
    pub async fn deploy(&self, request: DeployRequest) -> ReleaseResult<DeployOutcome> {
        let environment = request.environment;
        let auto_rollback = request.auto_rollback;
        let timeout = request
            .health_check_timeout
            .map_or(self.default_timeout, Duration::from_millis);

        let running = Deployment::<Pending>::create(request.into_data()?).start();
        let deployment_id = running.id().clone();

        info!(
            deployment_id = %deployment_id,
            environment = %environment,
            version = %running.data().version,
            "starting deployment"
        );

        self.store.insert(&running.to_record()).await?;

        match self.execute(running, timeout).await {
            Ok(Executed::Succeeded(done, monitor)) => {
                let deployment = done.to_record();
                if let Err(e) = self.store.update(&deployment).await {
                    error!(
                        deployment_id = %deployment_id,
                        error = %e,
                        "failed to record deployment success"
                    );
                }
                info!(deployment_id = %deployment_id, "deployment completed successfully");
                Ok(DeployOutcome::Succeeded {
                    deployment,
                    monitor,
                })
            }
            Ok(Executed::Gated(failed, snapshot)) => {
                let deployment = failed.to_record();
                if let Err(e) = self.store.update(&deployment).await {
                    error!(
                        deployment_id = %deployment_id,
                        error = %e,
                        "failed to record gate cancellation"
                    );
                }
                warn!(
                    deployment_id = %deployment_id,
                    critical_alerts = snapshot.critical_alerts,
                    "deployment cancelled by health gate"
                );
                Ok(DeployOutcome::Cancelled {
                    deployment,
                    snapshot,
                })
            }
            Err((running, err)) => {
                error!(deployment_id = %deployment_id, error = %err, "deployment failed");

                let failed = running.fail(err.to_string());
                if let Err(update_err) = self.store.update(&failed.to_record()).await {
                    error!(
                        deployment_id = %deployment_id,
                        error = %update_err,
                        "failed to record deployment failure"
                    );
                }

                if auto_rollback && environment.is_production() {
                    match self.rollback.rollback(environment, &deployment_id).await {
                        Ok(outcome) => info!(
                            deployment_id = %deployment_id,
                            rollback_id = %outcome.rollback_id,
                            target_version = %outcome.target_version,
                            "automatic rollback dispatched"
                        ),
                        Err(rollback_err) => error!(
                            deployment_id = %deployment_id,
                            error = %rollback_err,
                            "automatic rollback failed"
                        ),
                    }
                }

                Err(ReleaseError::deployment_failed(deployment_id, err))
            }
        }
    }

    async fn execute(
        &self,
        mut running: Deployment<InProgress>,
        timeout: Duration,
    ) -> Result<Executed, (Deployment<InProgress>, ReleaseError)> {
        let deployment_id = running.id().clone();
        let environment = running.data().environment;

        let snapshot = self.probe.collect().await;
        if environment.is_production() && !snapshot.is_clear() {
            let message = format!(
                "deployment cancelled: {} critical alert(s) open",
                snapshot.critical_alerts
            );
            return Ok(Executed::Gated(running.fail(message), snapshot));
        }
        running.log(format!(
            "pre-flight health: {} critical, {} high, {} total alert(s)",
            snapshot.critical_alerts, snapshot.high_alerts, snapshot.total_alerts
        ));

        if environment.is_production() {
            let backup = BackupRecord::pre_deployment(deployment_id.clone());
            if let Err(e) = self.store.insert_backup(&backup).await {
                return Err((running, e));
            }
            running.log("pre-deployment backup recorded");
        }

        let payload = DispatchPayload::for_deployment(running.data());
        let ack = match self.executor.trigger(&payload).await {
            Ok(ack) => ack,
            Err(e) => return Err((running, e)),
        };
        running.log(format!("executor accepted dispatch ({})", ack.status));

        if let Err(e) = self.store.update(&running.to_record()).await {
            return Err((running, e));
        }

        let result = {
            let guard = self.handles.register(&deployment_id);
            self.monitor
                .monitor(&deployment_id, timeout, guard.token())
                .await
        };

        match result {
            Ok(outcome) => {
                running.log(format!("health cleared after {} poll(s)", outcome.polls));
                Ok(Executed::Succeeded(running.succeed(), outcome))
            }
            Err(e) => Err((running, e)),
        }
    }

    /// Run the pre-flight checks.
    pub async fn validate(&self) -> ValidationReport {
        self.validator.validate().await
    }

    /// Roll an environment back from a deployment.
    pub async fn rollback(
        &self,
        environment: Environment,
        from: &DeploymentId,
    ) -> ReleaseResult<RollbackOutcome> {
        self.rollback.rollback(environment, from).await
    }

    /// Look up a deployment.
    pub async fn status(&self, deployment_id: &DeploymentId) -> ReleaseResult<DeploymentRecord> {
        self.store
            .get(deployment_id)
            .await?
            .ok_or_else(|| ReleaseError::DeploymentNotFound(deployment_id.to_string()))
    }

    /// List deployments, newest first.
    pub async fn history(&self, filter: &DeploymentFilter) -> ReleaseResult<Vec<DeploymentRecord>> {
        self.store.list(filter).await
    }

    /// Abort health monitoring of an in-flight deployment.
    ///
    /// The deploy then fails as it would on a monitor timeout.
    pub fn cancel(&self, deployment_id: &DeploymentId) -> ReleaseResult<()> {
        if self.handles.cancel(deployment_id) {
            info!(deployment_id = %deployment_id, "monitoring cancelled");
            Ok(())
        } else {
            Err(ReleaseError::MonitorNotFound(deployment_id.to_string()))
        }
    }

    /// Verify the deployment store is reachable.
    pub async fn check_store(&self) -> ReleaseResult<()> {
        self.store.check_schema().await
    }
}

impl std::fmt::Debug for ReleaseOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseOrchestrator")
            .field("default_timeout", &self.default_timeout)
            .field("monitoring", &self.handles.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::alerts::LogNotifier;
    use crate::config::ReleaseConfig;
    use crate::executor::DispatchAck;
    use crate::store::{AlertFilter, AlertStore, MemoryStore};
    use crate::types::{alert_types, AlertSeverity, DeploymentStatus, NewAlert};
    use crate::validation::ValidationContext;

    struct ScriptedProbe(Mutex<VecDeque<HealthSnapshot>>);

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn collect(&self) -> HealthSnapshot {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(HealthSnapshot::healthy)
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        calls: Mutex<Vec<DispatchPayload>>,
    }

    #[async_trait]
    impl ExecutorTrigger for CountingExecutor {
        async fn trigger(&self, payload: &DispatchPayload) -> ReleaseResult<DispatchAck> {
            self.calls.lock().unwrap().push(payload.clone());
            Ok(DispatchAck {
                status: 204,
                dispatched_at: Utc::now(),
            })
        }
    }

    fn critical(n: usize) -> HealthSnapshot {
        HealthSnapshot::from_alerts(
            (0..n)
                .map(|_| NewAlert::new("service_health", AlertSeverity::Critical, "down", "down"))
                .collect(),
            Vec::new(),
        )
    }

    /// Delegates to a memory store but refuses to write terminal records.
    struct TerminalWriteFailure(Arc<MemoryStore>);

    #[async_trait]
    impl DeploymentStore for TerminalWriteFailure {
        async fn insert(&self, record: &DeploymentRecord) -> ReleaseResult<()> {
            self.0.insert(record).await
        }

        async fn get(&self, id: &DeploymentId) -> ReleaseResult<Option<DeploymentRecord>> {
            self.0.get(id).await
        }

        async fn update(&self, record: &DeploymentRecord) -> ReleaseResult<()> {
            if record.status.is_terminal() {
                return Err(ReleaseError::internal("connection reset"));
            }
            self.0.update(record).await
        }

        async fn list(&self, filter: &DeploymentFilter) -> ReleaseResult<Vec<DeploymentRecord>> {
            self.0.list(filter).await
        }

        async fn latest_successful(
            &self,
            environment: Environment,
            exclude: Option<&DeploymentId>,
        ) -> ReleaseResult<Option<DeploymentRecord>> {
            self.0.latest_successful(environment, exclude).await
        }

        async fn insert_backup(&self, backup: &BackupRecord) -> ReleaseResult<()> {
            self.0.insert_backup(backup).await
        }

        async fn backups_for(&self, id: &DeploymentId) -> ReleaseResult<Vec<BackupRecord>> {
            self.0.backups_for(id).await
        }

        async fn check_schema(&self) -> ReleaseResult<()> {
            self.0.check_schema().await
        }
    }

    fn orchestrator(
        store: &Arc<MemoryStore>,
        executor: &Arc<CountingExecutor>,
        script: Vec<HealthSnapshot>,
    ) -> ReleaseOrchestrator {
        orchestrator_over(store.clone(), store, executor, script)
    }

    fn orchestrator_over(
        deployments: Arc<dyn DeploymentStore>,
        store: &Arc<MemoryStore>,
        executor: &Arc<CountingExecutor>,
        script: Vec<HealthSnapshot>,
    ) -> ReleaseOrchestrator {
        let alerts = AlertService::new(store.clone(), Arc::new(LogNotifier));
        let validator = DeploymentValidator::new(ValidationContext::new(
            store.clone(),
            store.clone(),
            store.clone(),
            &ReleaseConfig::default(),
        ));
        ReleaseOrchestrator::new(
            deployments,
            Arc::new(ScriptedProbe(Mutex::new(script.into()))),
            executor.clone(),
            alerts,
            validator,
            &MonitorConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn staging_deploy_succeeds() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let orchestrator = orchestrator(&store, &executor, Vec::new());

        let outcome = orchestrator
            .deploy(DeployRequest::new(Environment::Staging, "1.2.3", "abc123"))
            .await
            .unwrap();

        let record = outcome.deployment();
        assert_eq!(record.status, DeploymentStatus::Success);
        assert!(record.data.completed_at.is_some());
        assert_eq!(record.data.config["version"], "1.2.3");
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
        assert!(store.backups_for(&record.data.id).await.unwrap().is_empty());
        assert!(orchestrator.monitors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn staging_ignores_open_critical_alerts() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let orchestrator = orchestrator(&store, &executor, vec![critical(3)]);

        let outcome = orchestrator
            .deploy(DeployRequest::new(Environment::Staging, "1.2.3", "abc123"))
            .await
            .unwrap();
        assert!(!outcome.is_cancelled());
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn production_records_backup_before_dispatch() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let orchestrator = orchestrator(&store, &executor, Vec::new());

        let outcome = orchestrator
            .deploy(DeployRequest::new(Environment::Production, "2.0.0", "def456"))
            .await
            .unwrap();

        let backups = store
            .backups_for(&outcome.deployment().data.id)
            .await
            .unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].backup_type, "pre_deployment");
    }

    #[tokio::test(start_paused = true)]
    async fn production_gate_cancels_without_dispatch() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let orchestrator = orchestrator(&store, &executor, vec![critical(2)]);

        let outcome = orchestrator
            .deploy(DeployRequest::new(Environment::Production, "2.0.0", "def456"))
            .await
            .unwrap();

        assert!(outcome.is_cancelled());
        let record = orchestrator
            .status(&outcome.deployment().data.id)
            .await
            .unwrap();
        assert_eq!(record.status, DeploymentStatus::Failed);
        assert!(record.data.error.unwrap().contains("2 critical"));
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_production_deploy_rolls_back_once() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let orchestrator = orchestrator(&store, &executor, Vec::new());

        let good = orchestrator
            .deploy(DeployRequest::new(Environment::Production, "1.1.0", "good"))
            .await
            .unwrap();
        let good_id = good.deployment().data.id.clone();

        let orchestrator = orchestrator_with_failing_health(&store, &executor);
        let err = orchestrator
            .deploy(
                DeployRequest::new(Environment::Production, "1.2.0", "bad")
                    .with_auto_rollback(true)
                    .with_health_check_timeout(20_000),
            )
            .await
            .unwrap_err();

        let ReleaseError::DeploymentFailed { id: bad_id, source } = err else {
            panic!("expected a deployment failure");
        };
        assert!(matches!(*source, ReleaseError::MonitorTimeout { .. }));

        let rollbacks = store
            .list(&DeploymentFilter::new().with_rollback(true))
            .await
            .unwrap();
        assert_eq!(rollbacks.len(), 1);
        assert_eq!(rollbacks[0].data.rollback_from.as_ref(), Some(&bad_id));
        assert_eq!(rollbacks[0].data.version, "1.1.0");
        assert_ne!(rollbacks[0].data.id, good_id);

        let alerts = store
            .list_alerts(&AlertFilter::new().with_type(alert_types::EMERGENCY_ROLLBACK))
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    fn orchestrator_with_failing_health(
        store: &Arc<MemoryStore>,
        executor: &Arc<CountingExecutor>,
    ) -> ReleaseOrchestrator {
        // pre-flight clear, then unhealthy for longer than the timeout
        let mut script = vec![HealthSnapshot::healthy()];
        script.extend((0..10).map(|_| critical(1)));
        orchestrator(store, executor, script)
    }

    #[tokio::test(start_paused = true)]
    async fn staging_failure_never_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let mut script = vec![HealthSnapshot::healthy()];
        script.extend((0..10).map(|_| critical(1)));
        let orchestrator = orchestrator(&store, &executor, script);

        let err = orchestrator
            .deploy(
                DeployRequest::new(Environment::Staging, "1.2.0", "bad")
                    .with_auto_rollback(true)
                    .with_health_check_timeout(20_000),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.root(), ReleaseError::MonitorTimeout { .. }));

        let rollbacks = store
            .list(&DeploymentFilter::new().with_rollback(true))
            .await
            .unwrap();
        assert!(rollbacks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unrecorded_success_still_reports_outcome() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let deployments = Arc::new(TerminalWriteFailure(store.clone()));
        let orchestrator = orchestrator_over(deployments, &store, &executor, Vec::new());

        let outcome = orchestrator
            .deploy(DeployRequest::new(Environment::Staging, "1.2.3", "abc123"))
            .await
            .unwrap();

        assert!(!outcome.is_cancelled());
        assert_eq!(outcome.deployment().status, DeploymentStatus::Success);
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
        assert!(orchestrator.monitors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unrecorded_gate_cancellation_still_reports_outcome() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let deployments = Arc::new(TerminalWriteFailure(store.clone()));
        let orchestrator = orchestrator_over(deployments, &store, &executor, vec![critical(1)]);

        let outcome = orchestrator
            .deploy(DeployRequest::new(Environment::Production, "2.0.0", "def456"))
            .await
            .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.deployment().status, DeploymentStatus::Failed);
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_of_unknown_deployment_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let orchestrator = orchestrator(&store, &executor, Vec::new());

        let err = orchestrator
            .status(&DeploymentId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::DeploymentNotFound(_)));
        assert!(matches!(
            orchestrator.cancel(&DeploymentId::new("missing")),
            Err(ReleaseError::MonitorNotFound(_))
        ));
    }
}
