//! In-memory store for testing and database-less operation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ReleaseError, ReleaseResult};
use crate::types::{
    Alert, AlertId, AlertStatus, BackupRecord, DeploymentId, DeploymentRecord, DeploymentStatus,
    Environment,
};

use super::{
    ensure_forward, AlertFilter, AlertStore, DeploymentFilter, DeploymentStore,
    ServiceHealthSample, SignalSource,
};

/// Raw signal tables held by the in-memory store.
#[derive(Debug, Default)]
struct Signals {
    service_health: Vec<ServiceHealthSample>,
    failed_payments: Vec<DateTime<Utc>>,
    device_last_seen: HashMap<String, DateTime<Utc>>,
    frontend_errors: Vec<DateTime<Utc>>,
    queries: Vec<(u64, DateTime<Utc>)>,
    health_scores: Vec<(f64, DateTime<Utc>)>,
}

/// In-memory implementation of every store trait.
///
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<String, DeploymentRecord>>,
    backups: RwLock<Vec<BackupRecord>>,
    alerts: RwLock<Vec<Alert>>,
    signals: RwLock<Signals>,
}

fn poisoned<T>(_: T) -> ReleaseError {
    ReleaseError::internal("lock poisoned")
}

#[allow(clippy::as_conversions)]
fn count(n: usize) -> u64 {
    n as u64
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a service health check.
    pub fn record_service_health(&self, sample: ServiceHealthSample) -> ReleaseResult<()> {
        self.signals
            .write()
            .map_err(poisoned)?
            .service_health
            .push(sample);
        Ok(())
    }

    /// Record a failed payment.
    pub fn record_failed_payment(&self, at: DateTime<Utc>) -> ReleaseResult<()> {
        self.signals
            .write()
            .map_err(poisoned)?
            .failed_payments
            .push(at);
        Ok(())
    }

    /// Record that a device was last seen at `at`.
    pub fn record_device_seen(&self, device_id: impl Into<String>, at: DateTime<Utc>) -> ReleaseResult<()> {
        self.signals
            .write()
            .map_err(poisoned)?
            .device_last_seen
            .insert(device_id.into(), at);
        Ok(())
    }

    /// Record a frontend error.
    pub fn record_frontend_error(&self, at: DateTime<Utc>) -> ReleaseResult<()> {
        self.signals
            .write()
            .map_err(poisoned)?
            .frontend_errors
            .push(at);
        Ok(())
    }

    /// Record an executed query and its duration.
    pub fn record_query(&self, duration_ms: u64, at: DateTime<Utc>) -> ReleaseResult<()> {
        self.signals
            .write()
            .map_err(poisoned)?
            .queries
            .push((duration_ms, at));
        Ok(())
    }

    /// Record an overall health score.
    pub fn record_health_score(&self, score: f64, at: DateTime<Utc>) -> ReleaseResult<()> {
        self.signals
            .write()
            .map_err(poisoned)?
            .health_scores
            .push((score, at));
        Ok(())
    }

    /// Remove all recorded signals.
    pub fn clear_signals(&self) -> ReleaseResult<()> {
        *self.signals.write().map_err(poisoned)? = Signals::default();
        Ok(())
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, record: &DeploymentRecord) -> ReleaseResult<()> {
        let mut deployments = self.deployments.write().map_err(poisoned)?;

        let key = record.data.id.as_str().to_owned();
        if deployments.contains_key(&key) {
            return Err(ReleaseError::internal(format!(
                "deployment {key} already exists"
            )));
        }

        deployments.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, id: &DeploymentId) -> ReleaseResult<Option<DeploymentRecord>> {
        let deployments = self.deployments.read().map_err(poisoned)?;
        Ok(deployments.get(id.as_str()).cloned())
    }

    async fn update(&self, record: &DeploymentRecord) -> ReleaseResult<()> {
        let mut deployments = self.deployments.write().map_err(poisoned)?;

        let stored = deployments
            .get_mut(record.data.id.as_str())
            .ok_or_else(|| ReleaseError::DeploymentNotFound(record.data.id.to_string()))?;

        ensure_forward(stored.status, record.status)?;
        *stored = record.clone();

        Ok(())
    }

    async fn list(&self, filter: &DeploymentFilter) -> ReleaseResult<Vec<DeploymentRecord>> {
        let deployments = self.deployments.read().map_err(poisoned)?;

        let mut results: Vec<_> = deployments
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.data.started_at.cmp(&a.data.started_at));

        #[allow(clippy::as_conversions)]
        let offset = filter.offset.unwrap_or(0) as usize;
        let results = results.into_iter().skip(offset);

        match filter.limit {
            #[allow(clippy::as_conversions)]
            Some(limit) => Ok(results.take(limit as usize).collect()),
            None => Ok(results.collect()),
        }
    }

    async fn latest_successful(
        &self,
        environment: Environment,
        exclude: Option<&DeploymentId>,
    ) -> ReleaseResult<Option<DeploymentRecord>> {
        let deployments = self.deployments.read().map_err(poisoned)?;

        Ok(deployments
            .values()
            .filter(|r| r.status == DeploymentStatus::Success)
            .filter(|r| r.data.environment == environment)
            .filter(|r| exclude.map_or(true, |id| &r.data.id != id))
            .max_by(|a, b| {
                (a.data.completed_at, a.data.started_at, a.data.id.as_str()).cmp(&(
                    b.data.completed_at,
                    b.data.started_at,
                    b.data.id.as_str(),
                ))
            })
            .cloned())
    }

    async fn insert_backup(&self, backup: &BackupRecord) -> ReleaseResult<()> {
        self.backups.write().map_err(poisoned)?.push(backup.clone());
        Ok(())
    }

    async fn backups_for(&self, id: &DeploymentId) -> ReleaseResult<Vec<BackupRecord>> {
        let backups = self.backups.read().map_err(poisoned)?;
        Ok(backups
            .iter()
            .filter(|b| &b.deployment_id == id)
            .cloned()
            .collect())
    }

    async fn check_schema(&self) -> ReleaseResult<()> {
        drop(self.deployments.read().map_err(poisoned)?);
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> ReleaseResult<()> {
        self.alerts.write().map_err(poisoned)?.push(alert.clone());
        Ok(())
    }

    async fn get_alert(&self, id: &AlertId) -> ReleaseResult<Option<Alert>> {
        let alerts = self.alerts.read().map_err(poisoned)?;
        Ok(alerts.iter().find(|a| &a.id == id).cloned())
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> ReleaseResult<Vec<Alert>> {
        let alerts = self.alerts.read().map_err(poisoned)?;

        let mut results: Vec<_> = alerts.iter().filter(|a| filter.matches(a)).cloned().collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            #[allow(clippy::as_conversions)]
            results.truncate(limit as usize);
        }

        Ok(results)
    }

    async fn resolve_alert(&self, id: &AlertId) -> ReleaseResult<Alert> {
        let mut alerts = self.alerts.write().map_err(poisoned)?;

        let alert = alerts
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| ReleaseError::AlertNotFound(id.to_string()))?;

        if alert.status == AlertStatus::Open {
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(Utc::now());
        }

        Ok(alert.clone())
    }
}

#[async_trait]
impl SignalSource for MemoryStore {
    async fn service_health_since(
        &self,
        since: DateTime<Utc>,
    ) -> ReleaseResult<Vec<ServiceHealthSample>> {
        let signals = self.signals.read().map_err(poisoned)?;
        Ok(signals
            .service_health
            .iter()
            .filter(|s| s.checked_at >= since)
            .cloned()
            .collect())
    }

    async fn failed_payments_since(&self, since: DateTime<Utc>) -> ReleaseResult<u64> {
        let signals = self.signals.read().map_err(poisoned)?;
        Ok(count(
            signals.failed_payments.iter().filter(|at| **at >= since).count(),
        ))
    }

    async fn devices_offline_since(&self, cutoff: DateTime<Utc>) -> ReleaseResult<u64> {
        let signals = self.signals.read().map_err(poisoned)?;
        Ok(count(
            signals
                .device_last_seen
                .values()
                .filter(|seen| **seen < cutoff)
                .count(),
        ))
    }

    async fn frontend_errors_since(&self, since: DateTime<Utc>) -> ReleaseResult<u64> {
        let signals = self.signals.read().map_err(poisoned)?;
        Ok(count(
            signals.frontend_errors.iter().filter(|at| **at >= since).count(),
        ))
    }

    async fn slow_queries_since(
        &self,
        since: DateTime<Utc>,
        min_duration_ms: u64,
    ) -> ReleaseResult<u64> {
        let signals = self.signals.read().map_err(poisoned)?;
        Ok(count(
            signals
                .queries
                .iter()
                .filter(|(duration, at)| *at >= since && *duration > min_duration_ms)
                .count(),
        ))
    }

    async fn latest_health_score(&self) -> ReleaseResult<Option<f64>> {
        let signals = self.signals.read().map_err(poisoned)?;
        Ok(signals
            .health_scores
            .iter()
            .max_by_key(|(_, at)| *at)
            .map(|(score, _)| *score))
    }
}
