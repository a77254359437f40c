//! Record store backends.
//!
//! The orchestrator treats the record store as an external collaborator with
//! query/insert/update capability. Three traits describe what it needs:
//!
//! - [`DeploymentStore`]: append-only deployment history and backup records
//! - [`AlertStore`]: persisted, severity-classified alerts
//! - [`SignalSource`]: the raw system and business signals the health rules read
//!
//! The primary implementation uses PostgreSQL; an in-memory implementation is
//! provided for tests and for running without a database.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReleaseResult;
use crate::types::{
    Alert, AlertId, AlertSeverity, AlertStatus, BackupRecord, DeploymentId, DeploymentRecord,
    DeploymentStatus, Environment,
};

/// Filter criteria for listing deployments.
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
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

impl DeploymentFilter {
    /// Create a new empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            environment: None,
            status: None,
            is_rollback: None,
            limit: None,
            offset: None,
        }
    }

    /// Filter by environment.
    #[must_use]
    pub const fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Filter by status.
    #[must_use]
    pub const fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by rollback flag.
    #[must_use]
    pub const fn with_rollback(mut self, is_rollback: bool) -> Self {
        self.is_rollback = Some(is_rollback);
        self
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set pagination offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether a record satisfies the non-paging criteria.
    #[must_use]
    pub fn matches(&self, record: &DeploymentRecord) -> bool {
        self.environment.map_or(true, |e| record.data.environment == e)
            && self.status.map_or(true, |s| record.status == s)
            && self.is_rollback.map_or(true, |r| record.data.is_rollback == r)
    }
}

/// Filter criteria for listing alerts.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    /// Filter by alert type.
    pub alert_type: Option<String>,
    /// Filter by severity.
    pub severity: Option<AlertSeverity>,
    /// Filter by status.
    pub status: Option<AlertStatus>,
    /// Maximum number of results.
    pub limit: Option<u32>,
}

impl AlertFilter {
    /// Create a new empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            alert_type: None,
            severity: None,
            status: None,
            limit: None,
        }
    }

    /// Filter by alert type.
    #[must_use]
    pub fn with_type(mut self, alert_type: impl Into<String>) -> Self {
        self.alert_type = Some(alert_type.into());
        self
    }

    /// Filter by severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Filter by status.
    #[must_use]
    pub const fn with_status(mut self, status: AlertStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an alert satisfies the non-paging criteria.
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        self.alert_type
            .as_deref()
            .map_or(true, |t| alert.alert_type == t)
            && self.severity.map_or(true, |s| alert.severity == s)
            && self.status.map_or(true, |s| alert.status == s)
    }
}

/// One service health check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealthSample {
    /// Service that was checked.
    pub service_name: String,
    /// Reported status (`healthy`, `degraded`, `error`, ...).
    pub status: String,
    /// Measured response time.
    pub response_time_ms: Option<u64>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl ServiceHealthSample {
    /// Whether the service reported an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.eq_ignore_ascii_case("error")
    }
}

/// Backend for storing deployment history.
///
/// Records are never deleted. Implementations must provide read-your-writes
/// consistency: a record written by one call is visible to the next query.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment record.
    ///
    /// Returns an error if a deployment with the same ID already exists.
    async fn insert(&self, record: &DeploymentRecord) -> ReleaseResult<()>;

    /// Get a deployment by ID.
    async fn get(&self, id: &DeploymentId) -> ReleaseResult<Option<DeploymentRecord>>;

    /// Replace a deployment's mutable fields and status.
    ///
    /// Fails with `InvalidStateTransition` if the stored record is terminal or
    /// the new status would move backwards.
    async fn update(&self, record: &DeploymentRecord) -> ReleaseResult<()>;

    /// List deployments matching the filter, newest first.
    async fn list(&self, filter: &DeploymentFilter) -> ReleaseResult<Vec<DeploymentRecord>>;

    /// The most recently completed successful deployment in an environment.
    ///
    /// `exclude` skips one deployment, typically the one being rolled back.
    async fn latest_successful(
        &self,
        environment: Environment,
        exclude: Option<&DeploymentId>,
    ) -> ReleaseResult<Option<DeploymentRecord>>;

    /// Record a pre-deployment backup.
    async fn insert_backup(&self, backup: &BackupRecord) -> ReleaseResult<()>;

    /// Backups recorded for a deployment.
    async fn backups_for(&self, id: &DeploymentId) -> ReleaseResult<Vec<BackupRecord>>;

    /// Verify the persisted schema is present and readable.
    async fn check_schema(&self) -> ReleaseResult<()>;
}

/// Backend for storing alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist a new alert.
    async fn insert_alert(&self, alert: &Alert) -> ReleaseResult<()>;

    /// Get an alert by ID.
    async fn get_alert(&self, id: &AlertId) -> ReleaseResult<Option<Alert>>;

    /// List alerts matching the filter, newest first.
    async fn list_alerts(&self, filter: &AlertFilter) -> ReleaseResult<Vec<Alert>>;

    /// Mark an alert resolved. Resolving a resolved alert is a no-op.
    async fn resolve_alert(&self, id: &AlertId) -> ReleaseResult<Alert>;
}

/// Read access to the health signals.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Service health checks recorded since `since`.
    async fn service_health_since(
        &self,
        since: DateTime<Utc>,
    ) -> ReleaseResult<Vec<ServiceHealthSample>>;

    /// Number of failed payments since `since`.
    async fn failed_payments_since(&self, since: DateTime<Utc>) -> ReleaseResult<u64>;

    /// Number of devices last seen before `cutoff`.
    async fn devices_offline_since(&self, cutoff: DateTime<Utc>) -> ReleaseResult<u64>;

    /// Number of frontend errors since `since`.
    async fn frontend_errors_since(&self, since: DateTime<Utc>) -> ReleaseResult<u64>;

    /// Number of queries since `since` slower than `min_duration_ms`.
    async fn slow_queries_since(
        &self,
        since: DateTime<Utc>,
        min_duration_ms: u64,
    ) -> ReleaseResult<u64>;

    /// The most recently recorded overall health score (0-100).
    async fn latest_health_score(&self) -> ReleaseResult<Option<f64>>;
}

/// Check that an update moves a record forward.
pub(crate) fn ensure_forward(
    current: DeploymentStatus,
    next: DeploymentStatus,
) -> ReleaseResult<()> {
    let allowed = if current == next {
        !current.is_terminal()
    } else {
        current.can_transition_to(next)
    };

    if allowed {
        Ok(())
    } else {
        Err(crate::error::ReleaseError::InvalidStateTransition {
            from: current.as_str(),
            to: next.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_updates_are_allowed() {
        assert!(ensure_forward(DeploymentStatus::InProgress, DeploymentStatus::InProgress).is_ok());
        assert!(ensure_forward(DeploymentStatus::InProgress, DeploymentStatus::Success).is_ok());
        assert!(ensure_forward(DeploymentStatus::Pending, DeploymentStatus::Failed).is_ok());
    }

    #[test]
    fn terminal_records_are_frozen() {
        assert!(ensure_forward(DeploymentStatus::Success, DeploymentStatus::Success).is_err());
        assert!(ensure_forward(DeploymentStatus::Failed, DeploymentStatus::Success).is_err());
        assert!(ensure_forward(DeploymentStatus::Success, DeploymentStatus::InProgress).is_err());
    }
}
