//! Post-dispatch health monitoring.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ReleaseError, ReleaseResult};
use crate::health::HealthProbe;
use crate::types::{DeploymentId, HealthSnapshot};

/// Successful end of a monitoring run.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorOutcome {
    /// Number of health polls taken.
    pub polls: u32,
    /// The clean snapshot that ended monitoring.
    pub snapshot: HealthSnapshot,
}

/// Polls health until it clears, the timeout passes, or monitoring is
/// cancelled.
pub struct DeploymentMonitor {
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
}

impl DeploymentMonitor {
    /// Create a monitor polling `probe` every `interval`.
    pub fn new(probe: Arc<dyn HealthProbe>, interval: Duration) -> Self {
        Self {
            probe,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Poll interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Monitor a deployment.
    ///
    /// Sleeps one interval before each poll and succeeds on the first
    /// snapshot with no critical alerts. A poll is only taken if it falls
    /// within `timeout`, so a timeout shorter than one interval fails without
    /// polling at all.
    pub async fn monitor(
        &self,
        deployment_id: &DeploymentId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ReleaseResult<MonitorOutcome> {
        let deadline = Instant::now() + timeout;
        let mut polls: u32 = 0;
        let mut critical_alerts = 0;

        info!(
            deployment_id = %deployment_id,
            timeout = ?timeout,
            interval = ?self.interval,
            "monitoring deployment health"
        );

        loop {
            let next = Instant::now() + self.interval;
            if next > deadline {
                Self::wait(cancel, deadline).await?;
                warn!(
                    deployment_id = %deployment_id,
                    polls,
                    critical_alerts,
                    "deployment monitoring timed out"
                );
                return Err(ReleaseError::MonitorTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    critical_alerts,
                });
            }

            Self::wait(cancel, next).await?;

            let snapshot = self.probe.collect().await;
            polls += 1;

            if snapshot.is_clear() {
                info!(deployment_id = %deployment_id, polls, "deployment health cleared");
                return Ok(MonitorOutcome { polls, snapshot });
            }

            critical_alerts = snapshot.critical_alerts;
            debug!(
                deployment_id = %deployment_id,
                polls,
                critical_alerts,
                "deployment still unhealthy"
            );
        }
    }

    async fn wait(cancel: &CancellationToken, until: Instant) -> ReleaseResult<()> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ReleaseError::MonitorCancelled),
            () = tokio::time::sleep_until(until) => Ok(()),
        }
    }
}

impl std::fmt::Debug for DeploymentMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentMonitor")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Cancellation tokens of the deployments currently being monitored.
#[derive(Debug, Clone, Default)]
pub struct MonitorHandles {
    tokens: Arc<DashMap<DeploymentId, CancellationToken>>,
}

impl MonitorHandles {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployment for cancellation.
    ///
    /// The registration lasts as long as the returned guard.
    #[must_use]
    pub fn register(&self, deployment_id: &DeploymentId) -> MonitorGuard {
        let token = CancellationToken::new();
        self.tokens.insert(deployment_id.clone(), token.clone());
        MonitorGuard {
            tokens: self.tokens.clone(),
            deployment_id: deployment_id.clone(),
            token,
        }
    }

    /// Cancel monitoring of a deployment.
    ///
    /// Returns `false` if the deployment is not being monitored.
    pub fn cancel(&self, deployment_id: &DeploymentId) -> bool {
        match self.tokens.get(deployment_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a deployment is being monitored.
    #[must_use]
    pub fn is_monitoring(&self, deployment_id: &DeploymentId) -> bool {
        self.tokens.contains_key(deployment_id)
    }

    /// Number of deployments being monitored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether nothing is being monitored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Keeps a deployment registered in [`MonitorHandles`] until dropped.
#[derive(Debug)]
pub struct MonitorGuard {
    tokens: Arc<DashMap<DeploymentId, CancellationToken>>,
    deployment_id: DeploymentId,
    token: CancellationToken,
}

impl MonitorGuard {
    /// The token cancelled by [`MonitorHandles::cancel`].
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.tokens.remove(&self.deployment_id);
    }
}
