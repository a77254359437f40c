//! Core types for sidereal-release.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Create a new deployment ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique deployment ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DeploymentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for an alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    /// Create a new alert ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique alert ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target environment of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Pre-production environment.
    Staging,
    /// Customer-facing environment; health-gated and eligible for auto-rollback.
    Production,
}

impl Environment {
    /// Get the environment name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Whether this is the production environment.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            _ => Err(format!("unknown environment: {s}")),
        }
    }
}

/// Persisted deployment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Deployment created, not yet started.
    Pending,
    /// Validation, dispatch or monitoring in progress.
    InProgress,
    /// Deployment finished and health cleared.
    Success,
    /// Deployment failed or was cancelled by the health gate.
    Failed,
}

impl DeploymentStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether moving to `next` goes forward through the lifecycle.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress | Self::Failed)
                | (Self::InProgress, Self::Success | Self::Failed)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown deployment status: {s}")),
        }
    }
}

/// Data shared across all deployment states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentData {
    /// Unique deployment identifier.
    pub id: DeploymentId,
    /// Target environment.
    pub environment: Environment,
    /// Version label being released.
    pub version: String,
    /// Commit reference being released.
    pub commit_hash: String,
    /// Whether this deployment restores an earlier version.
    pub is_rollback: bool,
    /// The deployment this one rolls back from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_from: Option<DeploymentId>,
    /// Opaque configuration forwarded to the executor.
    pub config: serde_json::Value,
    /// Timestamped lifecycle log lines.
    pub logs: Vec<String>,
    /// Failure message, if the deployment failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the deployment started.
    pub started_at: DateTime<Utc>,
    /// When the deployment reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentData {
    /// Create new deployment data.
    #[must_use]
    pub fn new(
        environment: Environment,
        version: impl Into<String>,
        commit_hash: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: DeploymentId::generate(),
            environment,
            version: version.into(),
            commit_hash: commit_hash.into(),
            is_rollback: false,
            rollback_from: None,
            config,
            logs: Vec::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Mark this deployment as a rollback away from `from`.
    #[must_use]
    pub fn rolling_back_from(mut self, from: DeploymentId) -> Self {
        self.is_rollback = true;
        self.rollback_from = Some(from);
        self
    }

    /// Append a timestamped log line.
    pub fn log(&mut self, line: impl AsRef<str>) {
        self.logs
            .push(format!("{} {}", Utc::now().to_rfc3339(), line.as_ref()));
    }
}

/// A deployment record as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// The deployment data.
    #[serde(flatten)]
    pub data: DeploymentData,
    /// Current status.
    pub status: DeploymentStatus,
}

impl DeploymentRecord {
    /// Create a record with an explicit status.
    #[must_use]
    pub const fn new(data: DeploymentData, status: DeploymentStatus) -> Self {
        Self { data, status }
    }
}

/// Record written before a production executor dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// The deployment the backup precedes.
    pub deployment_id: DeploymentId,
    /// Kind of backup requested.
    pub backup_type: String,
    /// When the backup was recorded.
    pub created_at: DateTime<Utc>,
    /// Backup status.
    pub status: String,
}

impl BackupRecord {
    /// A pre-deployment backup request for `deployment_id`.
    #[must_use]
    pub fn pre_deployment(deployment_id: DeploymentId) -> Self {
        Self {
            deployment_id,
            backup_type: "pre_deployment".to_owned(),
            created_at: Utc::now(),
            status: "initiated".to_owned(),
        }
    }
}

/// Well-known alert types.
pub mod alert_types {
    /// A service reported an error status.
    pub const SERVICE_HEALTH: &str = "service_health";
    /// A service responded slower than the latency threshold.
    pub const HIGH_LATENCY: &str = "high_latency";
    /// Too many failed payments.
    pub const PAYMENT_FAILURES: &str = "payment_failures";
    /// Too many devices offline.
    pub const DEVICES_OFFLINE: &str = "devices_offline";
    /// Too many frontend errors.
    pub const FRONTEND_ERRORS: &str = "frontend_errors";
    /// Too many slow database queries.
    pub const SLOW_QUERIES: &str = "slow_queries";
    /// Security finding raised by an external scanner.
    pub const SECURITY: &str = "security";
    /// A rollback was initiated.
    pub const EMERGENCY_ROLLBACK: &str = "emergency_rollback";
    /// A rollback dispatch failed.
    pub const ROLLBACK_FAILED: &str = "rollback_failed";
}

/// Alert severity. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Immediate action required; gates deployments.
    Critical,
    /// Needs attention; notified but does not gate.
    High,
    /// Worth investigating.
    Medium,
    /// Informational.
    Low,
}

impl AlertSeverity {
    /// Get the severity name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Critical and high alerts are persisted and notified.
    #[must_use]
    pub const fn is_escalated(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("unknown alert severity: {s}")),
        }
    }
}

/// Alert lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Not yet handled.
    Open,
    /// Acknowledged and closed.
    Resolved,
}

impl AlertStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// An alert that has been detected but not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    /// Alert type, see [`alert_types`].
    #[serde(rename = "type")]
    pub alert_type: String,
    /// Severity.
    pub severity: AlertSeverity,
    /// Short title.
    pub title: String,
    /// Human-readable detail.
    pub message: String,
    /// Structured context.
    pub metadata: serde_json::Value,
}

impl NewAlert {
    /// Create a new alert draft with empty metadata.
    #[must_use]
    pub fn new(
        alert_type: impl Into<String>,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type: alert_type.into(),
            severity,
            title: title.into(),
            message: message.into(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier.
    pub id: AlertId,
    /// Alert type, see [`alert_types`].
    #[serde(rename = "type")]
    pub alert_type: String,
    /// Severity.
    pub severity: AlertSeverity,
    /// Short title.
    pub title: String,
    /// Human-readable detail.
    pub message: String,
    /// Structured context.
    pub metadata: serde_json::Value,
    /// Lifecycle status.
    pub status: AlertStatus,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
    /// When the alert was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Open a new alert from a draft.
    #[must_use]
    pub fn open(draft: NewAlert) -> Self {
        Self {
            id: AlertId::generate(),
            alert_type: draft.alert_type,
            severity: draft.severity,
            title: draft.title,
            message: draft.message,
            metadata: draft.metadata,
            status: AlertStatus::Open,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Point-in-time result of one health collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Number of critical alerts detected.
    pub critical_alerts: usize,
    /// Number of high alerts detected.
    pub high_alerts: usize,
    /// Total number of alerts detected.
    pub total_alerts: usize,
    /// Every alert detected, in rule order.
    pub alerts: Vec<NewAlert>,
    /// Rules whose signal query failed on this collection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_rules: Vec<String>,
    /// When the snapshot was taken.
    pub collected_at: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Aggregate a set of detected alerts.
    #[must_use]
    pub fn from_alerts(alerts: Vec<NewAlert>, failed_rules: Vec<String>) -> Self {
        let count = |severity| alerts.iter().filter(|a| a.severity == severity).count();
        Self {
            critical_alerts: count(AlertSeverity::Critical),
            high_alerts: count(AlertSeverity::High),
            total_alerts: alerts.len(),
            alerts,
            failed_rules,
            collected_at: Utc::now(),
        }
    }

    /// A snapshot with no alerts.
    #[must_use]
    pub fn healthy() -> Self {
        Self::from_alerts(Vec::new(), Vec::new())
    }

    /// Whether no critical alert was detected.
    #[must_use]
    pub const fn is_clear(&self) -> bool {
        self.critical_alerts == 0
    }

    /// The critical and high alerts.
    pub fn escalated(&self) -> impl Iterator<Item = &NewAlert> {
        self.alerts.iter().filter(|a| a.severity.is_escalated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_only_move_forward() {
        use DeploymentStatus::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Success));
        assert!(InProgress.can_transition_to(Failed));
        assert!(!Success.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Pending));
    }

    #[test]
    fn status_parses_wire_names() {
        let status: DeploymentStatus = "in_progress".parse().unwrap();
        assert_eq!(status, DeploymentStatus::InProgress);
        assert!("done".parse::<DeploymentStatus>().is_err());

        let json = serde_json::to_string(&DeploymentStatus::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);
    }

    #[test]
    fn snapshot_counts_by_severity() {
        let snapshot = HealthSnapshot::from_alerts(
            vec![
                NewAlert::new("a", AlertSeverity::Critical, "t", "m"),
                NewAlert::new("b", AlertSeverity::High, "t", "m"),
                NewAlert::new("c", AlertSeverity::Medium, "t", "m"),
                NewAlert::new("d", AlertSeverity::Critical, "t", "m"),
            ],
            Vec::new(),
        );

        assert_eq!(snapshot.critical_alerts, 2);
        assert_eq!(snapshot.high_alerts, 1);
        assert_eq!(snapshot.total_alerts, 4);
        assert_eq!(snapshot.escalated().count(), 3);
        assert!(!snapshot.is_clear());
    }

    #[test]
    fn alert_serialises_type_field() {
        let alert = Alert::open(NewAlert::new(
            alert_types::EMERGENCY_ROLLBACK,
            AlertSeverity::Critical,
            "Rollback",
            "rolling back",
        ));
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "emergency_rollback");
        assert_eq!(json["status"], "open");
    }
}
