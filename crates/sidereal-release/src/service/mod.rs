//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::alerts::{notifier, AlertService};
use crate::api;
use crate::config::ReleaseConfig;
use crate::deployment::ReleaseOrchestrator;
use crate::error::{ReleaseError, ReleaseResult};
use crate::executor::GitHubDispatchExecutor;
use crate::health::HealthCollector;
use crate::store::{AlertStore, DeploymentStore, MemoryStore, PostgresStore, SignalSource};
use crate::validation::{DeploymentValidator, ValidationContext};

/// The release service.
///
/// Manages the lifecycle of the release orchestrator, including:
/// - Record store selection
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct ReleaseService {
    config: ReleaseConfig,
    cancel: CancellationToken,
}

impl ReleaseService {
    /// Create a new release service with the given configuration.
    #[must_use]
    pub fn new(config: ReleaseConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the release service.
    ///
    /// This will:
    /// 1. Connect to the database (or use the in-memory store when no URL is set)
    /// 2. Wire alerts, health collection, validation and the executor
    /// 3. Start the HTTP API server
    /// 4. Wait for shutdown signal
    pub async fn run(&self) -> ReleaseResult<()> {
        let orchestrator = Arc::new(self.create_orchestrator().await?);
        info!("release orchestrator initialised");

        let app = api::router(api::AppState { orchestrator });

        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .map_err(|e| ReleaseError::config(format!("failed to bind TCP: {e}")))?;

        info!(
            listen_addr = %self.config.server.listen_addr,
            "release service listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ReleaseError::internal(format!("server error: {e}")))?;

        info!("release service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn create_orchestrator(&self) -> ReleaseResult<ReleaseOrchestrator> {
        match &self.config.database.url {
            Some(_) => {
                let store = Arc::new(PostgresStore::connect(&self.config.database).await?);
                info!("connected to PostgreSQL");
                build_orchestrator(&self.config, store)
            }
            None => {
                info!("no database configured, using in-memory store");
                build_orchestrator(&self.config, Arc::new(MemoryStore::new()))
            }
        }
    }
}

impl std::fmt::Debug for ReleaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseService")
            .field("listen_addr", &self.config.server.listen_addr)
            .finish_non_exhaustive()
    }
}

/// Wire an orchestrator around a store that backs deployments, alerts and
/// health signals alike.
pub fn build_orchestrator<S>(config: &ReleaseConfig, store: Arc<S>) -> ReleaseResult<ReleaseOrchestrator>
where
    S: DeploymentStore + AlertStore + SignalSource + 'static,
{
    let deployments: Arc<dyn DeploymentStore> = store.clone();
    let alert_store: Arc<dyn AlertStore> = store.clone();
    let signals: Arc<dyn SignalSource> = store;

    let alerts = AlertService::new(
        Arc::clone(&alert_store),
        Arc::from(notifier::from_config(&config.notifier)?),
    );

    let probe = HealthCollector::new(Arc::clone(&signals), config.health.clone())
        .with_alerts(alerts.clone());
    let rules: Vec<_> = probe.rule_names().collect();
    info!(rules = ?rules, "health collector configured");

    let executor = GitHubDispatchExecutor::new(&config.executor)?;
    info!(api_url = %config.executor.api_url, "executor configured");

    let validator = DeploymentValidator::new(ValidationContext::new(
        Arc::clone(&deployments),
        alert_store,
        signals,
        config,
    ));

    Ok(ReleaseOrchestrator::new(
        deployments,
        Arc::new(probe),
        Arc::new(executor),
        alerts,
        validator,
        &config.monitor,
    ))
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}
