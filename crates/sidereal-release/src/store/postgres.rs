//! PostgreSQL store implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::error::{ReleaseError, ReleaseResult};
use crate::types::{
    Alert, AlertId, AlertSeverity, AlertStatus, BackupRecord, DeploymentData, DeploymentId,
    DeploymentRecord, DeploymentStatus, Environment,
};

use super::{
    ensure_forward, AlertFilter, AlertStore, DeploymentFilter, DeploymentStore,
    ServiceHealthSample, SignalSource,
};

const DEPLOYMENT_COLUMNS: &str = "id, environment, version, commit_hash, status, is_rollback, \
     rollback_from, config, logs, error, started_at, completed_at";

const ALERT_COLUMNS: &str =
    "id, type, severity, title, message, metadata, status, created_at, resolved_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(url: &str) -> ReleaseResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Connect using the database section of the configuration.
    pub async fn connect(config: &DatabaseConfig) -> ReleaseResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| ReleaseError::config("database.url is not set"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ReleaseResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> ReleaseResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id TEXT PRIMARY KEY,
                environment TEXT NOT NULL,
                version TEXT NOT NULL,
                commit_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                is_rollback BOOLEAN NOT NULL DEFAULT FALSE,
                rollback_from TEXT,
                config JSONB NOT NULL DEFAULT '{}'::jsonb,
                logs JSONB NOT NULL DEFAULT '[]'::jsonb,
                error TEXT,
                started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                completed_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_deployments_env_status_completed
            ON deployments (environment, status, completed_at DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS deployment_backups (
                id BIGSERIAL PRIMARY KEY,
                deployment_id TEXT NOT NULL REFERENCES deployments(id),
                backup_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                severity TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                resolved_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_alerts_status_severity
            ON alerts (status, severity)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS service_health (
                service_name TEXT NOT NULL,
                status TEXT NOT NULL,
                response_time_ms BIGINT,
                checked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                last_seen TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS frontend_errors (
                message TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS query_logs (
                query TEXT NOT NULL,
                duration_ms BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS system_health_metrics (
                health_score DOUBLE PRECISION NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Parse a row into a DeploymentRecord.
    fn row_to_record(row: &PgRow) -> ReleaseResult<DeploymentRecord> {
        let environment: String = row.get("environment");
        let status: String = row.get("status");
        let rollback_from: Option<String> = row.get("rollback_from");
        let logs: serde_json::Value = row.get("logs");

        let environment: Environment = environment.parse().map_err(ReleaseError::Serialisation)?;
        let status: DeploymentStatus = status.parse().map_err(ReleaseError::Serialisation)?;
        let logs: Vec<String> = serde_json::from_value(logs).map_err(|e| {
            ReleaseError::Serialisation(format!("failed to deserialise logs: {e}"))
        })?;

        Ok(DeploymentRecord {
            data: DeploymentData {
                id: DeploymentId::new(row.get::<String, _>("id")),
                environment,
                version: row.get("version"),
                commit_hash: row.get("commit_hash"),
                is_rollback: row.get("is_rollback"),
                rollback_from: rollback_from.map(DeploymentId::new),
                config: row.get("config"),
                logs,
                error: row.get("error"),
                started_at: row.get("started_at"),
                completed_at: row.get("completed_at"),
            },
            status,
        })
    }

    fn row_to_alert(row: &PgRow) -> ReleaseResult<Alert> {
        let severity: String = row.get("severity");
        let status: String = row.get("status");

        Ok(Alert {
            id: AlertId::new(row.get::<String, _>("id")),
            alert_type: row.get("type"),
            severity: severity
                .parse::<AlertSeverity>()
                .map_err(ReleaseError::Serialisation)?,
            title: row.get("title"),
            message: row.get("message"),
            metadata: row.get("metadata"),
            status: status
                .parse::<AlertStatus>()
                .map_err(ReleaseError::Serialisation)?,
            created_at: row.get("created_at"),
            resolved_at: row.get("resolved_at"),
        })
    }

    fn logs_json(record: &DeploymentRecord) -> ReleaseResult<serde_json::Value> {
        serde_json::to_value(&record.data.logs)
            .map_err(|e| ReleaseError::Serialisation(format!("failed to serialise logs: {e}")))
    }

    async fn count(&self, query: &str, since: DateTime<Utc>) -> ReleaseResult<u64> {
        let count: i64 = sqlx::query_scalar(query)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl DeploymentStore for PostgresStore {
    async fn insert(&self, record: &DeploymentRecord) -> ReleaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deployments (
                id, environment, version, commit_hash, status, is_rollback,
                rollback_from, config, logs, error, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.data.id.as_str())
        .bind(record.data.environment.as_str())
        .bind(&record.data.version)
        .bind(&record.data.commit_hash)
        .bind(record.status.as_str())
        .bind(record.data.is_rollback)
        .bind(record.data.rollback_from.as_ref().map(DeploymentId::as_str))
        .bind(&record.data.config)
        .bind(Self::logs_json(record)?)
        .bind(&record.data.error)
        .bind(record.data.started_at)
        .bind(record.data.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &DeploymentId) -> ReleaseResult<Option<DeploymentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn update(&self, record: &DeploymentRecord) -> ReleaseResult<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM deployments WHERE id = $1 FOR UPDATE")
                .bind(record.data.id.as_str())
                .fetch_optional(&mut *tx)
                .await?;

        let current: DeploymentStatus = current
            .ok_or_else(|| ReleaseError::DeploymentNotFound(record.data.id.to_string()))?
            .parse()
            .map_err(ReleaseError::Serialisation)?;

        ensure_forward(current, record.status)?;

        sqlx::query(
            r#"
            UPDATE deployments
            SET status = $1, logs = $2, error = $3, completed_at = $4
            WHERE id = $5
            "#,
        )
        .bind(record.status.as_str())
        .bind(Self::logs_json(record)?)
        .bind(&record.data.error)
        .bind(record.data.completed_at)
        .bind(record.data.id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, filter: &DeploymentFilter) -> ReleaseResult<Vec<DeploymentRecord>> {
        let mut query = format!("SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE 1=1");
        let mut params: Vec<&str> = Vec::new();

        if let Some(environment) = filter.environment {
            params.push(environment.as_str());
            query.push_str(&format!(" AND environment = ${}", params.len()));
        }

        if let Some(status) = filter.status {
            params.push(status.as_str());
            query.push_str(&format!(" AND status = ${}", params.len()));
        }

        if let Some(is_rollback) = filter.is_rollback {
            query.push_str(if is_rollback {
                " AND is_rollback"
            } else {
                " AND NOT is_rollback"
            });
        }

        query.push_str(" ORDER BY started_at DESC");

        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = filter.offset {
            query.push_str(&format!(" OFFSET {offset}"));
        }

        let mut sqlx_query = sqlx::query(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn latest_successful(
        &self,
        environment: Environment,
        exclude: Option<&DeploymentId>,
    ) -> ReleaseResult<Option<DeploymentRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {DEPLOYMENT_COLUMNS}
            FROM deployments
            WHERE environment = $1 AND status = 'success'
              AND ($2::TEXT IS NULL OR id <> $2)
            ORDER BY completed_at DESC, started_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(environment.as_str())
        .bind(exclude.map(DeploymentId::as_str))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn insert_backup(&self, backup: &BackupRecord) -> ReleaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deployment_backups (deployment_id, backup_type, status, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(backup.deployment_id.as_str())
        .bind(&backup.backup_type)
        .bind(&backup.status)
        .bind(backup.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn backups_for(&self, id: &DeploymentId) -> ReleaseResult<Vec<BackupRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT deployment_id, backup_type, status, created_at
            FROM deployment_backups
            WHERE deployment_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| BackupRecord {
                deployment_id: DeploymentId::new(row.get::<String, _>("deployment_id")),
                backup_type: row.get("backup_type"),
                status: row.get("status"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn check_schema(&self) -> ReleaseResult<()> {
        sqlx::query("SELECT id FROM deployments LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AlertStore for PostgresStore {
    async fn insert_alert(&self, alert: &Alert) -> ReleaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, type, severity, title, message, metadata, status, created_at, resolved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(alert.id.as_str())
        .bind(&alert.alert_type)
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(&alert.metadata)
        .bind(alert.status.as_str())
        .bind(alert.created_at)
        .bind(alert.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_alert(&self, id: &AlertId) -> ReleaseResult<Option<Alert>> {
        let row = sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_alert).transpose()
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> ReleaseResult<Vec<Alert>> {
        let mut query = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE 1=1");
        let mut params: Vec<&str> = Vec::new();

        if let Some(alert_type) = filter.alert_type.as_deref() {
            params.push(alert_type);
            query.push_str(&format!(" AND type = ${}", params.len()));
        }

        if let Some(severity) = filter.severity {
            params.push(severity.as_str());
            query.push_str(&format!(" AND severity = ${}", params.len()));
        }

        if let Some(status) = filter.status {
            params.push(status.as_str());
            query.push_str(&format!(" AND status = ${}", params.len()));
        }

        query.push_str(" ORDER BY created_at DESC");

        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut sqlx_query = sqlx::query(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_alert).collect()
    }

    async fn resolve_alert(&self, id: &AlertId) -> ReleaseResult<Alert> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE alerts
            SET status = 'resolved', resolved_at = COALESCE(resolved_at, NOW())
            WHERE id = $1
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(Self::row_to_alert)
            .transpose()?
            .ok_or_else(|| ReleaseError::AlertNotFound(id.to_string()))
    }
}

#[async_trait]
impl SignalSource for PostgresStore {
    async fn service_health_since(
        &self,
        since: DateTime<Utc>,
    ) -> ReleaseResult<Vec<ServiceHealthSample>> {
        let rows = sqlx::query(
            r#"
            SELECT service_name, status, response_time_ms, checked_at
            FROM service_health
            WHERE checked_at >= $1
            ORDER BY checked_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ServiceHealthSample {
                service_name: row.get("service_name"),
                status: row.get("status"),
                response_time_ms: row
                    .get::<Option<i64>, _>("response_time_ms")
                    .and_then(|ms| u64::try_from(ms).ok()),
                checked_at: row.get("checked_at"),
            })
            .collect())
    }

    async fn failed_payments_since(&self, since: DateTime<Utc>) -> ReleaseResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM payments WHERE status = 'failed' AND created_at >= $1",
            since,
        )
        .await
    }

    async fn devices_offline_since(&self, cutoff: DateTime<Utc>) -> ReleaseResult<u64> {
        self.count("SELECT COUNT(*) FROM devices WHERE last_seen < $1", cutoff)
            .await
    }

    async fn frontend_errors_since(&self, since: DateTime<Utc>) -> ReleaseResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM frontend_errors WHERE created_at >= $1",
            since,
        )
        .await
    }

    async fn slow_queries_since(
        &self,
        since: DateTime<Utc>,
        min_duration_ms: u64,
    ) -> ReleaseResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM query_logs WHERE created_at >= $1 AND duration_ms > $2",
        )
        .bind(since)
        .bind(i64::try_from(min_duration_ms).unwrap_or(i64::MAX))
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn latest_health_score(&self) -> ReleaseResult<Option<f64>> {
        let score: Option<f64> = sqlx::query_scalar(
            "SELECT health_score FROM system_health_metrics ORDER BY recorded_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(score)
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewAlert;

    fn get_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    fn test_deployment() -> DeploymentRecord {
        let data = DeploymentData::new(
            Environment::Production,
            "1.0.0",
            "abc123def456",
            serde_json::json!({"auto_rollback": true}),
        );
        DeploymentRecord::new(data, DeploymentStatus::InProgress)
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn insert_update_and_get() {
        let url = get_database_url().expect("DATABASE_URL not set");
        let store = PostgresStore::new(&url).await.expect("failed to connect");

        let mut record = test_deployment();
        let id = record.data.id.clone();
        store.insert(&record).await.expect("insert failed");

        record.status = DeploymentStatus::Success;
        record.data.completed_at = Some(Utc::now());
        record.data.log("deployment succeeded");
        store.update(&record).await.expect("update failed");

        let retrieved = store
            .get(&id)
            .await
            .expect("get failed")
            .expect("deployment not found");
        assert_eq!(retrieved.status, DeploymentStatus::Success);
        assert_eq!(retrieved.data.logs.len(), 1);
        assert_eq!(retrieved.data.config["auto_rollback"], true);

        record.status = DeploymentStatus::Failed;
        assert!(store.update(&record).await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn latest_successful_excludes() {
        let url = get_database_url().expect("DATABASE_URL not set");
        let store = PostgresStore::new(&url).await.expect("failed to connect");

        let mut record = test_deployment();
        record.status = DeploymentStatus::Success;
        record.data.completed_at = Some(Utc::now());
        store.insert(&record).await.expect("insert failed");

        let latest = store
            .latest_successful(Environment::Production, None)
            .await
            .expect("query failed")
            .expect("no success found");
        assert_eq!(latest.data.id, record.data.id);

        let excluded = store
            .latest_successful(Environment::Production, Some(&record.data.id))
            .await
            .expect("query failed");
        assert!(excluded.map_or(true, |r| r.data.id != record.data.id));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn alert_lifecycle() {
        let url = get_database_url().expect("DATABASE_URL not set");
        let store = PostgresStore::new(&url).await.expect("failed to connect");

        let alert = Alert::open(NewAlert::new(
            "security",
            AlertSeverity::Critical,
            "Open CVE",
            "upgrade openssl",
        ));
        store.insert_alert(&alert).await.expect("insert failed");

        let resolved = store.resolve_alert(&alert.id).await.expect("resolve failed");
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.severity, AlertSeverity::Critical);
    }
}
