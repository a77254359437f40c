//! Built-in health rules.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;

use crate::config::HealthConfig;
use crate::error::ReleaseResult;
use crate::store::SignalSource;
use crate::types::{alert_types, AlertSeverity, NewAlert};

use super::HealthRule;

/// Start of a lookback window of `secs` ending at `now`.
fn window_start(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    TimeDelta::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Services that reported an error status. One critical alert per service.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceErrorRule;

#[async_trait]
impl HealthRule for ServiceErrorRule {
    fn name(&self) -> &'static str {
        "service_errors"
    }

    async fn evaluate(
        &self,
        source: &dyn SignalSource,
        config: &HealthConfig,
        now: DateTime<Utc>,
    ) -> ReleaseResult<Vec<NewAlert>> {
        let samples = source
            .service_health_since(window_start(now, config.service_window_secs))
            .await?;

        let mut failing: BTreeMap<String, usize> = BTreeMap::new();
        for sample in samples.iter().filter(|s| s.is_error()) {
            *failing.entry(sample.service_name.clone()).or_default() += 1;
        }

        Ok(failing
            .into_iter()
            .map(|(service, errors)| {
                NewAlert::new(
                    alert_types::SERVICE_HEALTH,
                    AlertSeverity::Critical,
                    format!("Service {service} is failing"),
                    format!("{service} reported {errors} error health check(s)"),
                )
                .with_metadata(json!({ "service": service, "error_checks": errors }))
            })
            .collect())
    }
}

/// Services responding slower than the latency threshold. One high alert
/// per service, carrying the worst observed response time.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatencyRule;

#[async_trait]
impl HealthRule for LatencyRule {
    fn name(&self) -> &'static str {
        "latency"
    }

    async fn evaluate(
        &self,
        source: &dyn SignalSource,
        config: &HealthConfig,
        now: DateTime<Utc>,
    ) -> ReleaseResult<Vec<NewAlert>> {
        let samples = source
            .service_health_since(window_start(now, config.service_window_secs))
            .await?;

        let mut slowest: BTreeMap<String, u64> = BTreeMap::new();
        for sample in &samples {
            let Some(ms) = sample.response_time_ms else {
                continue;
            };
            if ms > config.latency_threshold_ms {
                let worst = slowest.entry(sample.service_name.clone()).or_default();
                *worst = (*worst).max(ms);
            }
        }

        Ok(slowest
            .into_iter()
            .map(|(service, ms)| {
                NewAlert::new(
                    alert_types::HIGH_LATENCY,
                    AlertSeverity::High,
                    format!("High latency on {service}"),
                    format!(
                        "{service} responded in {ms}ms (threshold {}ms)",
                        config.latency_threshold_ms
                    ),
                )
                .with_metadata(json!({
                    "service": service,
                    "response_time_ms": ms,
                    "threshold_ms": config.latency_threshold_ms,
                }))
            })
            .collect())
    }
}

/// Build a single alert when `count` exceeds `threshold`.
fn threshold_alert(
    count: u64,
    threshold: u64,
    alert_type: &str,
    severity: AlertSeverity,
    title: &str,
    describe: impl FnOnce(u64) -> String,
) -> Vec<NewAlert> {
    if count <= threshold {
        return Vec::new();
    }

    vec![NewAlert::new(alert_type, severity, title, describe(count))
        .with_metadata(json!({ "count": count, "threshold": threshold }))]
}

/// Failed payments within the payment window.
#[derive(Debug, Default, Clone, Copy)]
pub struct PaymentFailureRule;

#[async_trait]
impl HealthRule for PaymentFailureRule {
    fn name(&self) -> &'static str {
        "payment_failures"
    }

    async fn evaluate(
        &self,
        source: &dyn SignalSource,
        config: &HealthConfig,
        now: DateTime<Utc>,
    ) -> ReleaseResult<Vec<NewAlert>> {
        let count = source
            .failed_payments_since(window_start(now, config.payment_window_secs))
            .await?;

        Ok(threshold_alert(
            count,
            config.failed_payment_threshold,
            alert_types::PAYMENT_FAILURES,
            AlertSeverity::High,
            "Elevated payment failures",
            |n| format!("{n} failed payments in the last {}s", config.payment_window_secs),
        ))
    }
}

/// Devices not seen for longer than the offline cutoff.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineDevicesRule;

#[async_trait]
impl HealthRule for OfflineDevicesRule {
    fn name(&self) -> &'static str {
        "devices_offline"
    }

    async fn evaluate(
        &self,
        source: &dyn SignalSource,
        config: &HealthConfig,
        now: DateTime<Utc>,
    ) -> ReleaseResult<Vec<NewAlert>> {
        let count = source
            .devices_offline_since(window_start(now, config.device_offline_after_secs))
            .await?;

        Ok(threshold_alert(
            count,
            config.offline_device_threshold,
            alert_types::DEVICES_OFFLINE,
            AlertSeverity::Critical,
            "Devices offline",
            |n| {
                format!(
                    "{n} devices have not been seen for over {}s",
                    config.device_offline_after_secs
                )
            },
        ))
    }
}

/// Frontend errors within the frontend window.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrontendErrorRule;

#[async_trait]
impl HealthRule for FrontendErrorRule {
    fn name(&self) -> &'static str {
        "frontend_errors"
    }

    async fn evaluate(
        &self,
        source: &dyn SignalSource,
        config: &HealthConfig,
        now: DateTime<Utc>,
    ) -> ReleaseResult<Vec<NewAlert>> {
        let count = source
            .frontend_errors_since(window_start(now, config.frontend_window_secs))
            .await?;

        Ok(threshold_alert(
            count,
            config.frontend_error_threshold,
            alert_types::FRONTEND_ERRORS,
            AlertSeverity::High,
            "Elevated frontend errors",
            |n| format!("{n} frontend errors in the last {}s", config.frontend_window_secs),
        ))
    }
}

/// Slow database queries within the slow query window.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlowQueryRule;

#[async_trait]
impl HealthRule for SlowQueryRule {
    fn name(&self) -> &'static str {
        "slow_queries"
    }

    async fn evaluate(
        &self,
        source: &dyn SignalSource,
        config: &HealthConfig,
        now: DateTime<Utc>,
    ) -> ReleaseResult<Vec<NewAlert>> {
        let count = source
            .slow_queries_since(
                window_start(now, config.slow_query_window_secs),
                config.slow_query_duration_ms,
            )
            .await?;

        Ok(threshold_alert(
            count,
            config.slow_query_threshold,
            alert_types::SLOW_QUERIES,
            AlertSeverity::Medium,
            "Slow database queries",
            |n| {
                format!(
                    "{n} queries slower than {}ms in the last {}s",
                    config.slow_query_duration_ms, config.slow_query_window_secs
                )
            },
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ServiceHealthSample};
    use rstest::rstest;

    fn sample(service: &str, status: &str, ms: Option<u64>, at: DateTime<Utc>) -> ServiceHealthSample {
        ServiceHealthSample {
            service_name: service.to_owned(),
            status: status.to_owned(),
            response_time_ms: ms,
            checked_at: at,
        }
    }

    #[tokio::test]
    async fn service_errors_are_critical_per_service() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.record_service_health(sample("api", "error", None, now)).unwrap();
        store.record_service_health(sample("api", "error", None, now)).unwrap();
        store.record_service_health(sample("billing", "error", None, now)).unwrap();
        store.record_service_health(sample("web", "healthy", Some(20), now)).unwrap();

        let alerts = ServiceErrorRule
            .evaluate(&store, &HealthConfig::default(), now)
            .await
            .unwrap();

        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::Critical));
        assert_eq!(alerts[0].metadata["service"], "api");
        assert_eq!(alerts[0].metadata["error_checks"], 2);
    }

    #[tokio::test]
    async fn stale_service_errors_are_ignored() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .record_service_health(sample("api", "error", None, now - TimeDelta::minutes(10)))
            .unwrap();

        let alerts = ServiceErrorRule
            .evaluate(&store, &HealthConfig::default(), now)
            .await
            .unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn latency_reports_worst_response_time() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.record_service_health(sample("api", "healthy", Some(2_500), now)).unwrap();
        store.record_service_health(sample("api", "healthy", Some(4_000), now)).unwrap();
        store.record_service_health(sample("web", "healthy", Some(2_000), now)).unwrap();

        let alerts = LatencyRule
            .evaluate(&store, &HealthConfig::default(), now)
            .await
            .unwrap();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert_eq!(alerts[0].metadata["response_time_ms"], 4_000);
    }

    #[rstest]
    #[case(10, 0)]
    #[case(11, 1)]
    #[tokio::test]
    async fn payment_failures_above_threshold(#[case] failures: usize, #[case] expected: usize) {
        let store = MemoryStore::new();
        let now = Utc::now();
        for _ in 0..failures {
            store.record_failed_payment(now - TimeDelta::minutes(5)).unwrap();
        }
        store.record_failed_payment(now - TimeDelta::hours(2)).unwrap();

        let alerts = PaymentFailureRule
            .evaluate(&store, &HealthConfig::default(), now)
            .await
            .unwrap();
        assert_eq!(alerts.len(), expected);
    }

    #[rstest]
    #[case(10, 0)]
    #[case(11, 1)]
    #[tokio::test]
    async fn offline_devices_above_threshold(#[case] offline: usize, #[case] expected: usize) {
        let store = MemoryStore::new();
        let now = Utc::now();
        for i in 0..offline {
            store
                .record_device_seen(format!("device-{i}"), now - TimeDelta::hours(1))
                .unwrap();
        }
        store.record_device_seen("fresh", now).unwrap();

        let alerts = OfflineDevicesRule
            .evaluate(&store, &HealthConfig::default(), now)
            .await
            .unwrap();
        assert_eq!(alerts.len(), expected);
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::Critical));
    }

    #[rstest]
    #[case(50, 0)]
    #[case(51, 1)]
    #[tokio::test]
    async fn frontend_errors_above_threshold(#[case] errors: usize, #[case] expected: usize) {
        let store = MemoryStore::new();
        let now = Utc::now();
        for _ in 0..errors {
            store.record_frontend_error(now - TimeDelta::minutes(1)).unwrap();
        }

        let alerts = FrontendErrorRule
            .evaluate(&store, &HealthConfig::default(), now)
            .await
            .unwrap();
        assert_eq!(alerts.len(), expected);
    }

    #[tokio::test]
    async fn slow_queries_are_medium() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for _ in 0..11 {
            store.record_query(1_500, now).unwrap();
        }
        for _ in 0..20 {
            store.record_query(1_000, now).unwrap();
        }

        let alerts = SlowQueryRule
            .evaluate(&store, &HealthConfig::default(), now)
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
        assert_eq!(alerts[0].metadata["count"], 11);
    }

    #[test]
    fn oversized_window_saturates() {
        let now = Utc::now();
        assert_eq!(window_start(now, u64::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window_start(now, 60), now - TimeDelta::seconds(60));
    }
}
