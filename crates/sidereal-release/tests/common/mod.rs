#![allow(clippy::unwrap_used, dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::json;

use sidereal_release::alerts::{AlertService, LogNotifier};
use sidereal_release::config::{HealthConfig, MonitorConfig, ReleaseConfig};
use sidereal_release::executor::{DispatchAck, DispatchPayload, ExecutorTrigger};
use sidereal_release::store::ServiceHealthSample;
use sidereal_release::validation::ValidationContext;
use sidereal_release::{
    DeploymentData, DeploymentId, DeploymentRecord, DeploymentStatus, DeploymentStore,
    DeploymentValidator, Environment, HealthCollector, MemoryStore, ReleaseError,
    ReleaseOrchestrator, ReleaseResult,
};

/// Executor that records every dispatch.
#[derive(Default)]
pub struct RecordingExecutor {
    pub fail: bool,
    pub dispatched: Mutex<Vec<DispatchPayload>>,
}

impl RecordingExecutor {
    pub fn calls(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecutorTrigger for RecordingExecutor {
    async fn trigger(&self, payload: &DispatchPayload) -> ReleaseResult<DispatchAck> {
        self.dispatched.lock().unwrap().push(payload.clone());
        if self.fail {
            return Err(ReleaseError::Executor {
                status: 502,
                body: "bad gateway".to_owned(),
            });
        }
        Ok(DispatchAck {
            status: 204,
            dispatched_at: Utc::now(),
        })
    }
}

/// An orchestrator over a memory store with the real health collector.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub executor: Arc<RecordingExecutor>,
    pub orchestrator: Arc<ReleaseOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_executor(RecordingExecutor::default())
    }

    pub fn with_executor(executor: RecordingExecutor) -> Self {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(executor);
        let alerts = AlertService::new(store.clone(), Arc::new(LogNotifier));
        let probe = HealthCollector::new(store.clone(), HealthConfig::default())
            .with_alerts(alerts.clone());
        let validator = DeploymentValidator::new(ValidationContext::new(
            store.clone(),
            store.clone(),
            store.clone(),
            &ReleaseConfig::default(),
        ));
        let orchestrator = ReleaseOrchestrator::new(
            store.clone(),
            Arc::new(probe),
            executor.clone(),
            alerts,
            validator,
            &MonitorConfig::default(),
        );

        Self {
            store,
            executor,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Report `count` services in error, each raising a critical alert.
    pub fn break_services(&self, count: usize) {
        for i in 0..count {
            self.store
                .record_service_health(ServiceHealthSample {
                    service_name: format!("service-{i}"),
                    status: "error".to_owned(),
                    response_time_ms: Some(120),
                    checked_at: Utc::now(),
                })
                .unwrap();
        }
    }

    /// Seed a completed successful deployment.
    pub async fn seed_success(
        &self,
        environment: Environment,
        version: &str,
        minutes_ago: i64,
    ) -> DeploymentId {
        let mut data = DeploymentData::new(
            environment,
            version,
            format!("commit-{version}"),
            json!({"replicas": 3}),
        );
        data.completed_at = Some(Utc::now() - TimeDelta::minutes(minutes_ago));
        let id = data.id.clone();
        self.store
            .insert(&DeploymentRecord::new(data, DeploymentStatus::Success))
            .await
            .unwrap();
        id
    }
}
