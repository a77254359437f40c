//! Pre-flight deployment validation.
//!
//! Validation runs a fixed list of independent [`ValidationCheck`]s. Every
//! check runs even when an earlier one fails, and the release is valid only
//! if all of them pass. Validation never mutates deployment or alert state.

mod checks;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ReleaseConfig;
use crate::store::{AlertStore, DeploymentStore, SignalSource};

pub use checks::{
    DependencyCheck, PerformanceBaselineCheck, RequiredConfigCheck, SchemaCheck, SecurityCheck,
};

/// Everything a check may read.
#[derive(Clone)]
pub struct ValidationContext {
    /// Deployment history, probed for schema integrity.
    pub deployments: Arc<dyn DeploymentStore>,
    /// Alert store, searched for open security alerts.
    pub alerts: Arc<dyn AlertStore>,
    /// Signal source, read for the latest health score.
    pub signals: Arc<dyn SignalSource>,
    /// Settings that currently hold a value.
    pub configured_keys: BTreeSet<String>,
    /// Settings that must hold a value.
    pub required_keys: Vec<String>,
    /// Lowest acceptable health score.
    pub min_health_score: f64,
}

impl ValidationContext {
    /// Build a context from stores and the ambient configuration.
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        alerts: Arc<dyn AlertStore>,
        signals: Arc<dyn SignalSource>,
        config: &ReleaseConfig,
    ) -> Self {
        Self {
            deployments,
            alerts,
            signals,
            configured_keys: config.configured_keys(),
            required_keys: config.validation.required_keys.clone(),
            min_health_score: config.validation.min_health_score,
        }
    }
}

impl std::fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationContext")
            .field("configured_keys", &self.configured_keys)
            .field("required_keys", &self.required_keys)
            .field("min_health_score", &self.min_health_score)
            .finish_non_exhaustive()
    }
}

/// Result of one check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Whether the check passed.
    pub passed: bool,
    /// Settings found missing by this check.
    pub missing_config: Vec<String>,
}

impl CheckOutcome {
    /// A passing outcome.
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            passed: true,
            missing_config: Vec::new(),
        }
    }

    /// A failing outcome.
    #[must_use]
    pub const fn fail() -> Self {
        Self {
            passed: false,
            missing_config: Vec::new(),
        }
    }

    /// Passing or failing depending on `passed`.
    #[must_use]
    pub const fn from_bool(passed: bool) -> Self {
        if passed {
            Self::pass()
        } else {
            Self::fail()
        }
    }
}

/// One pre-flight check.
#[async_trait]
pub trait ValidationCheck: Send + Sync {
    /// Stable check name, used as the key in the report.
    fn name(&self) -> &'static str;

    /// Run the check. Checks report failures in the outcome, never as errors.
    async fn run(&self, context: &ValidationContext) -> CheckOutcome;
}

/// The built-in checks.
#[must_use]
pub fn default_checks() -> Vec<Box<dyn ValidationCheck>> {
    vec![
        Box::new(SchemaCheck),
        Box::new(RequiredConfigCheck),
        Box::new(DependencyCheck),
        Box::new(SecurityCheck),
        Box::new(PerformanceBaselineCheck),
    ]
}

/// Aggregated validation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Whether every check passed.
    pub valid: bool,
    /// Outcome per check name.
    pub checks: BTreeMap<String, bool>,
    /// Missing settings, by name.
    pub missing_config: Vec<String>,
}

/// Runs the pre-flight checks.
pub struct DeploymentValidator {
    context: ValidationContext,
    checks: Vec<Box<dyn ValidationCheck>>,
}

impl DeploymentValidator {
    /// Create a validator with the built-in checks.
    pub fn new(context: ValidationContext) -> Self {
        Self {
            context,
            checks: default_checks(),
        }
    }

    /// Replace the check list.
    #[must_use]
    pub fn with_checks(mut self, checks: Vec<Box<dyn ValidationCheck>>) -> Self {
        self.checks = checks;
        self
    }

    /// Run every check.
    pub async fn validate(&self) -> ValidationReport {
        let mut checks = BTreeMap::new();
        let mut missing_config = Vec::new();

        for check in &self.checks {
            let outcome = check.run(&self.context).await;
            if !outcome.passed {
                tracing::info!(check = check.name(), "validation check failed");
            }
            missing_config.extend(outcome.missing_config);
            checks.insert(check.name().to_owned(), outcome.passed);
        }

        let valid = checks.values().all(|passed| *passed);
        ValidationReport {
            valid,
            checks,
            missing_config,
        }
    }
}

impl std::fmt::Debug for DeploymentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentValidator")
            .field("checks", &self.checks.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
