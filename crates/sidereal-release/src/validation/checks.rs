//! Built-in validation checks.

use async_trait::async_trait;

use crate::store::AlertFilter;
use crate::types::{alert_types, AlertSeverity, AlertStatus};

use super::{CheckOutcome, ValidationCheck, ValidationContext};

/// Probes the deployment store for a readable schema.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaCheck;

#[async_trait]
impl ValidationCheck for SchemaCheck {
    fn name(&self) -> &'static str {
        "database_schema"
    }

    async fn run(&self, context: &ValidationContext) -> CheckOutcome {
        match context.deployments.check_schema().await {
            Ok(()) => CheckOutcome::pass(),
            Err(e) => {
                tracing::warn!(error = %e, "schema probe failed");
                CheckOutcome::fail()
            }
        }
    }
}

/// Every required setting holds a value.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequiredConfigCheck;

#[async_trait]
impl ValidationCheck for RequiredConfigCheck {
    fn name(&self) -> &'static str {
        "environment_variables"
    }

    async fn run(&self, context: &ValidationContext) -> CheckOutcome {
        let missing: Vec<String> = context
            .required_keys
            .iter()
            .filter(|key| !context.configured_keys.contains(key.as_str()))
            .cloned()
            .collect();

        CheckOutcome {
            passed: missing.is_empty(),
            missing_config: missing,
        }
    }
}

/// External dependency availability. Always passes until dependency probes
/// are configurable.
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyCheck;

#[async_trait]
impl ValidationCheck for DependencyCheck {
    fn name(&self) -> &'static str {
        "dependencies"
    }

    async fn run(&self, _context: &ValidationContext) -> CheckOutcome {
        CheckOutcome::pass()
    }
}

/// No open critical security alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecurityCheck;

#[async_trait]
impl ValidationCheck for SecurityCheck {
    fn name(&self) -> &'static str {
        "security_scan"
    }

    async fn run(&self, context: &ValidationContext) -> CheckOutcome {
        let filter = AlertFilter::new()
            .with_type(alert_types::SECURITY)
            .with_severity(AlertSeverity::Critical)
            .with_status(AlertStatus::Open)
            .with_limit(1);

        match context.alerts.list_alerts(&filter).await {
            Ok(open) => CheckOutcome::from_bool(open.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "security alert lookup failed");
                CheckOutcome::fail()
            }
        }
    }
}

/// The latest recorded health score meets the baseline.
///
/// With no score recorded there is nothing to compare and the check passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PerformanceBaselineCheck;

#[async_trait]
impl ValidationCheck for PerformanceBaselineCheck {
    fn name(&self) -> &'static str {
        "performance_baseline"
    }

    async fn run(&self, context: &ValidationContext) -> CheckOutcome {
        match context.signals.latest_health_score().await {
            Ok(Some(score)) => CheckOutcome::from_bool(score >= context.min_health_score),
            Ok(None) => CheckOutcome::pass(),
            Err(e) => {
                tracing::warn!(error = %e, "health score lookup failed");
                CheckOutcome::fail()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeDelta, Utc};
    use rstest::rstest;

    use super::*;
    use crate::store::{AlertStore, MemoryStore};
    use crate::types::{Alert, NewAlert};

    fn context(store: &Arc<MemoryStore>) -> ValidationContext {
        ValidationContext {
            deployments: store.clone(),
            alerts: store.clone(),
            signals: store.clone(),
            configured_keys: ["database.url".to_owned()].into_iter().collect(),
            required_keys: vec!["database.url".to_owned()],
            min_health_score: 80.0,
        }
    }

    #[rstest]
    #[case(80.0, true)]
    #[case(79.9, false)]
    #[case(100.0, true)]
    #[tokio::test]
    async fn baseline_uses_latest_score(#[case] latest: f64, #[case] passed: bool) {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.record_health_score(10.0, now - TimeDelta::hours(1)).unwrap();
        store.record_health_score(latest, now).unwrap();

        let outcome = PerformanceBaselineCheck.run(&context(&store)).await;
        assert_eq!(outcome.passed, passed);
    }

    #[tokio::test]
    async fn resolved_or_non_critical_security_alerts_pass() {
        let store = Arc::new(MemoryStore::new());
        let high = Alert::open(NewAlert::new(
            alert_types::SECURITY,
            AlertSeverity::High,
            "Weak cipher",
            "disable TLS 1.0",
        ));
        let critical = Alert::open(NewAlert::new(
            alert_types::SECURITY,
            AlertSeverity::Critical,
            "Open CVE",
            "patch",
        ));
        store.insert_alert(&high).await.unwrap();
        store.insert_alert(&critical).await.unwrap();

        assert!(!SecurityCheck.run(&context(&store)).await.passed);

        store.resolve_alert(&critical.id).await.unwrap();
        assert!(SecurityCheck.run(&context(&store)).await.passed);
    }

    #[tokio::test]
    async fn missing_keys_are_named() {
        let store = Arc::new(MemoryStore::new());
        let mut ctx = context(&store);
        ctx.required_keys.push("notifier.api_key".to_owned());

        let outcome = RequiredConfigCheck.run(&ctx).await;
        assert!(!outcome.passed);
        assert_eq!(outcome.missing_config, vec!["notifier.api_key".to_owned()]);
    }
}
