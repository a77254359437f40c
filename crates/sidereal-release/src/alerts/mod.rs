//! Alert persistence and notification.
//!
//! Alerting never sits on the critical path of a deployment: persistence and
//! notification failures are logged and swallowed.

pub mod notifier;

use std::sync::Arc;

pub use notifier::{EmailNotifier, LogNotifier, Notifier};

use crate::error::ReleaseResult;
use crate::store::{AlertFilter, AlertStore};
use crate::types::{Alert, AlertId, HealthSnapshot, NewAlert};

/// Persists alerts and forwards the escalated ones to a [`Notifier`].
#[derive(Clone)]
pub struct AlertService {
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
}

impl AlertService {
    /// Create a new alert service.
    pub fn new(store: Arc<dyn AlertStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Raise a single alert.
    ///
    /// The alert is persisted and notified on a best-effort basis and
    /// returned regardless of whether either step succeeded.
    pub async fn raise(&self, draft: NewAlert) -> Alert {
        let alert = Alert::open(draft);
        self.persist(&alert).await;
        self.send(std::slice::from_ref(&alert)).await;
        alert
    }

    /// Persist and notify the critical and high alerts of a snapshot.
    ///
    /// The escalated alerts are sent as one batch even when persisting them
    /// failed. Returns the number of alerts persisted.
    pub async fn record_snapshot(&self, snapshot: &HealthSnapshot) -> usize {
        let escalated: Vec<Alert> = snapshot.escalated().cloned().map(Alert::open).collect();

        let mut persisted = 0;
        for alert in &escalated {
            if self.persist(alert).await {
                persisted += 1;
            }
        }

        self.send(&escalated).await;
        persisted
    }

    /// List alerts matching a filter.
    pub async fn list(&self, filter: &AlertFilter) -> ReleaseResult<Vec<Alert>> {
        self.store.list_alerts(filter).await
    }

    /// Resolve an alert. Severity is left untouched.
    pub async fn resolve(&self, id: &AlertId) -> ReleaseResult<Alert> {
        let alert = self.store.resolve_alert(id).await?;
        tracing::info!(alert_id = %id, "alert resolved");
        Ok(alert)
    }

    async fn persist(&self, alert: &Alert) -> bool {
        match self.store.insert_alert(alert).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    error = %e,
                    "failed to persist alert"
                );
                false
            }
        }
    }

    async fn send(&self, alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }

        if let Err(e) = self.notifier.notify(alerts).await {
            tracing::warn!(count = alerts.len(), error = %e, "failed to send alert notification");
        }
    }
}

impl std::fmt::Debug for AlertService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertService").finish_non_exhaustive()
    }
}
