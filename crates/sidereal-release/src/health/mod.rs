//! Health signal collection.
//!
//! A [`HealthCollector`] runs a list of independent [`HealthRule`]s against a
//! [`SignalSource`] and aggregates their alerts into a [`HealthSnapshot`].
//! Rules never suppress each other, and a rule whose signal query fails is
//! skipped for that collection rather than failing the whole snapshot.

pub mod rules;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alerts::AlertService;
use crate::config::HealthConfig;
use crate::error::ReleaseResult;
use crate::store::SignalSource;
use crate::types::{HealthSnapshot, NewAlert};

pub use rules::{
    FrontendErrorRule, LatencyRule, OfflineDevicesRule, PaymentFailureRule, ServiceErrorRule,
    SlowQueryRule,
};

/// A stateless health rule.
#[async_trait]
pub trait HealthRule: Send + Sync {
    /// Stable rule name, used in logs and snapshots.
    fn name(&self) -> &'static str;

    /// Evaluate the rule at `now`, returning any alerts it detects.
    async fn evaluate(
        &self,
        source: &dyn SignalSource,
        config: &HealthConfig,
        now: DateTime<Utc>,
    ) -> ReleaseResult<Vec<NewAlert>>;
}

/// The built-in rule set.
#[must_use]
pub fn default_rules() -> Vec<Box<dyn HealthRule>> {
    vec![
        Box::new(ServiceErrorRule),
        Box::new(LatencyRule),
        Box::new(PaymentFailureRule),
        Box::new(OfflineDevicesRule),
        Box::new(FrontendErrorRule),
        Box::new(SlowQueryRule),
    ]
}

/// Produces health snapshots.
///
/// Implemented by [`HealthCollector`]; the monitor and orchestrator depend on
/// this trait so tests can script snapshot sequences.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Collect one snapshot.
    async fn collect(&self) -> HealthSnapshot;
}

/// Runs the health rules and records escalated alerts.
pub struct HealthCollector {
    source: Arc<dyn SignalSource>,
    alerts: Option<AlertService>,
    config: HealthConfig,
    rules: Vec<Box<dyn HealthRule>>,
}

impl HealthCollector {
    /// Create a collector with the built-in rules.
    pub fn new(source: Arc<dyn SignalSource>, config: HealthConfig) -> Self {
        Self {
            source,
            alerts: None,
            config,
            rules: default_rules(),
        }
    }

    /// Persist and notify critical and high alerts through `alerts`.
    #[must_use]
    pub fn with_alerts(mut self, alerts: AlertService) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Replace the rule set.
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<Box<dyn HealthRule>>) -> Self {
        self.rules = rules;
        self
    }

    /// Names of the configured rules, in evaluation order.
    pub fn rule_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|r| r.name())
    }

    /// Evaluate every rule without recording alerts.
    pub async fn evaluate(&self) -> HealthSnapshot {
        let now = Utc::now();
        let mut alerts = Vec::new();
        let mut failed_rules = Vec::new();

        for rule in &self.rules {
            match rule.evaluate(self.source.as_ref(), &self.config, now).await {
                Ok(found) => alerts.extend(found),
                Err(e) => {
                    tracing::warn!(rule = rule.name(), error = %e, "health rule query failed");
                    failed_rules.push(rule.name().to_owned());
                }
            }
        }

        HealthSnapshot::from_alerts(alerts, failed_rules)
    }
}

#[async_trait]
impl HealthProbe for HealthCollector {
    async fn collect(&self) -> HealthSnapshot {
        let snapshot = self.evaluate().await;

        tracing::debug!(
            critical = snapshot.critical_alerts,
            high = snapshot.high_alerts,
            total = snapshot.total_alerts,
            "health collected"
        );

        if let Some(alerts) = &self.alerts {
            alerts.record_snapshot(&snapshot).await;
        }

        snapshot
    }
}

impl std::fmt::Debug for HealthCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCollector")
            .field("config", &self.config)
            .field("rules", &self.rule_names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::alerts::LogNotifier;
    use crate::error::ReleaseError;
    use crate::store::{AlertFilter, AlertStore, MemoryStore, ServiceHealthSample};
    use crate::types::AlertSeverity;

    struct BrokenRule;

    #[async_trait]
    impl HealthRule for BrokenRule {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn evaluate(
            &self,
            _: &dyn SignalSource,
            _: &HealthConfig,
            _: DateTime<Utc>,
        ) -> ReleaseResult<Vec<NewAlert>> {
            Err(ReleaseError::internal("relation does not exist"))
        }
    }

    fn seed_outage(store: &MemoryStore) {
        let now = Utc::now();
        store
            .record_service_health(ServiceHealthSample {
                service_name: "api".to_owned(),
                status: "error".to_owned(),
                response_time_ms: Some(5_000),
                checked_at: now,
            })
            .unwrap();
        for _ in 0..60 {
            store.record_frontend_error(now).unwrap();
        }
    }

    #[tokio::test]
    async fn quiet_signals_give_clear_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let collector = HealthCollector::new(store, HealthConfig::default());

        let snapshot = collector.collect().await;
        assert!(snapshot.is_clear());
        assert_eq!(snapshot.total_alerts, 0);
        assert!(snapshot.failed_rules.is_empty());
    }

    #[tokio::test]
    async fn rules_do_not_suppress_each_other() {
        let store = Arc::new(MemoryStore::new());
        seed_outage(&store);
        let collector = HealthCollector::new(store, HealthConfig::default());

        let snapshot = collector.collect().await;
        assert_eq!(snapshot.critical_alerts, 1);
        // latency and frontend errors
        assert_eq!(snapshot.high_alerts, 2);
        assert_eq!(snapshot.total_alerts, 3);
    }

    #[tokio::test]
    async fn failing_rule_is_reported_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        seed_outage(&store);
        let mut rules = default_rules();
        rules.push(Box::new(BrokenRule));
        let collector = HealthCollector::new(store, HealthConfig::default()).with_rules(rules);

        let snapshot = collector.collect().await;
        assert_eq!(snapshot.failed_rules, vec!["broken".to_owned()]);
        assert_eq!(snapshot.critical_alerts, 1);
    }

    #[tokio::test]
    async fn escalated_alerts_are_persisted() {
        let store = Arc::new(MemoryStore::new());
        seed_outage(&store);
        let alerts = AlertService::new(store.clone(), Arc::new(LogNotifier));
        let collector =
            HealthCollector::new(store.clone(), HealthConfig::default()).with_alerts(alerts);

        collector.collect().await;

        let stored = store
            .list_alerts(&AlertFilter::new().with_severity(AlertSeverity::Critical))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].alert_type, "service_health");
    }

    #[test]
    fn default_rule_order() {
        let collector =
            HealthCollector::new(Arc::new(MemoryStore::new()), HealthConfig::default());
        assert_eq!(
            collector.rule_names().collect::<Vec<_>>(),
            vec![
                "service_errors",
                "latency",
                "payment_failures",
                "devices_offline",
                "frontend_errors",
                "slow_queries"
            ]
        );
    }
}
