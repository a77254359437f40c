//! Sidereal Release Orchestrator
//!
//! This crate drives releases of a multi-service application into staging
//! and production. It gates production deploys on live health signals,
//! hands the actual rollout to an external CI/CD executor, watches health
//! after dispatch and rolls production back to the last known good version
//! when a deploy fails.
//!
//! # Architecture
//!
//! - **Health collection**: independent rules turn raw signals (service
//!   checks, payments, devices, frontend errors, query timings) into alerts
//! - **Alerting**: critical and high alerts are persisted and sent to
//!   operators in one batch per snapshot
//! - **Validation**: named pre-flight checks report readiness without side
//!   effects
//! - **Orchestration**: deploy, monitor, rollback and status, exposed over an
//!   HTTP action endpoint
//!
//! # State Machine
//!
//! Deployments follow a strict state machine enforced at compile time using
//! the typestate pattern:
//!
//! ```text
//! Pending ──▶ InProgress ──▶ Succeeded
//!    │            │
//!    └────────────┴──────▶ Failed
//! ```
//!
//! Terminal states have no transitions.
//!
//! # Example
//!
//! ```
//! use sidereal_release::{
//!     Deployment, Pending,
//!     types::{DeploymentData, DeploymentStatus, Environment},
//! };
//!
//! let data = DeploymentData::new(
//!     Environment::Staging,
//!     "1.4.0",
//!     "9f2c1ab",
//!     serde_json::json!({}),
//! );
//!
//! let pending = Deployment::<Pending>::create(data);
//! let mut running = pending.start();
//! running.log("executor dispatched");
//! let done = running.succeed();
//!
//! assert_eq!(done.status(), DeploymentStatus::Success);
//! // done.start() would not compile
//! ```

#![forbid(unsafe_code)]

pub mod alerts;
pub mod api;
pub mod config;
pub mod deployment;
pub mod error;
pub mod executor;
pub mod health;
pub mod service;
pub mod state;
pub mod store;
pub mod types;
pub mod validation;

// Re-export commonly used types at the crate root
pub use alerts::{AlertService, EmailNotifier, LogNotifier, Notifier};
pub use config::ReleaseConfig;
pub use deployment::{
    DeployOutcome, DeployRequest, DeploymentMonitor, MonitorHandles, ReleaseOrchestrator,
    RollbackManager,
};
pub use error::{ReleaseError, ReleaseResult};
pub use executor::{ExecutorTrigger, GitHubDispatchExecutor};
pub use health::{HealthCollector, HealthProbe, HealthRule};
pub use service::ReleaseService;
pub use state::{Deployment, DeploymentState, Failed, InProgress, Pending, Succeeded};
pub use store::{AlertStore, DeploymentFilter, DeploymentStore, MemoryStore, PostgresStore, SignalSource};
pub use types::{
    Alert, AlertSeverity, DeploymentData, DeploymentId, DeploymentRecord, DeploymentStatus,
    Environment, HealthSnapshot,
};
pub use validation::{DeploymentValidator, ValidationReport};
