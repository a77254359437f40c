//! Typestate pattern for the deployment state machine.
//!
//! Deployments only move forward:
//!
//! ```text
//! Pending ──▶ InProgress ──▶ Succeeded
//!    │            │
//!    └────────────┴────▶ Failed
//! ```
//!
//! Terminal transitions stamp `completed_at`, so a record carries a
//! completion time exactly when its status is terminal.

use std::marker::PhantomData;

use chrono::Utc;

use crate::types::{DeploymentData, DeploymentId, DeploymentRecord, DeploymentStatus};

/// Marker trait for deployment states.
pub trait DeploymentState: private::Sealed + Send + Sync {
    /// Get the persisted status representation.
    fn persisted() -> DeploymentStatus;
}

mod private {
    pub trait Sealed {}
}

/// Deployment created, not yet started.
#[derive(Debug, Clone, Copy)]
pub struct Pending;

/// Deployment is being validated, dispatched or monitored.
#[derive(Debug, Clone, Copy)]
pub struct InProgress;

/// Deployment completed and health cleared.
#[derive(Debug, Clone, Copy)]
pub struct Succeeded;

/// Deployment failed.
#[derive(Debug, Clone, Copy)]
pub struct Failed;

impl private::Sealed for Pending {}
impl private::Sealed for InProgress {}
impl private::Sealed for Succeeded {}
impl private::Sealed for Failed {}

impl DeploymentState for Pending {
    fn persisted() -> DeploymentStatus {
        DeploymentStatus::Pending
    }
}

impl DeploymentState for InProgress {
    fn persisted() -> DeploymentStatus {
        DeploymentStatus::InProgress
    }
}

impl DeploymentState for Succeeded {
    fn persisted() -> DeploymentStatus {
        DeploymentStatus::Success
    }
}

impl DeploymentState for Failed {
    fn persisted() -> DeploymentStatus {
        DeploymentStatus::Failed
    }
}

/// A deployment in a specific state.
#[derive(Debug)]
pub struct Deployment<S: DeploymentState> {
    data: DeploymentData,
    _state: PhantomData<S>,
}

impl<S: DeploymentState> Deployment<S> {
    /// Get a reference to the deployment data.
    #[must_use]
    pub const fn data(&self) -> &DeploymentData {
        &self.data
    }

    /// Get the deployment ID.
    #[must_use]
    pub const fn id(&self) -> &DeploymentId {
        &self.data.id
    }

    /// Get the current status.
    #[must_use]
    pub fn status(&self) -> DeploymentStatus {
        S::persisted()
    }

    /// Snapshot as a storable record.
    #[must_use]
    pub fn to_record(&self) -> DeploymentRecord {
        DeploymentRecord::new(self.data.clone(), S::persisted())
    }

    fn transition_with<T: DeploymentState>(
        mut self,
        f: impl FnOnce(&mut DeploymentData),
    ) -> Deployment<T> {
        f(&mut self.data);
        Deployment {
            data: self.data,
            _state: PhantomData,
        }
    }
}

impl Deployment<Pending> {
    /// Create a new deployment in the pending state.
    #[must_use]
    pub const fn create(data: DeploymentData) -> Self {
        Self {
            data,
            _state: PhantomData,
        }
    }

    /// Start the deployment.
    #[must_use]
    pub fn start(self) -> Deployment<InProgress> {
        self.transition_with(|data| {
            data.started_at = Utc::now();
            data.log("deployment started");
        })
    }

    /// Fail before starting.
    #[must_use]
    pub fn fail(self, error: impl Into<String>) -> Deployment<Failed> {
        fail_data(self, error.into())
    }
}

impl Deployment<InProgress> {
    /// Append a log line without changing state.
    pub fn log(&mut self, line: impl AsRef<str>) {
        self.data.log(line);
    }

    /// Complete successfully.
    #[must_use]
    pub fn succeed(self) -> Deployment<Succeeded> {
        self.transition_with(|data| {
            data.completed_at = Some(Utc::now());
            data.log("deployment succeeded");
        })
    }

    /// Complete with a failure.
    #[must_use]
    pub fn fail(self, error: impl Into<String>) -> Deployment<Failed> {
        fail_data(self, error.into())
    }
}

fn fail_data<S: DeploymentState>(deployment: Deployment<S>, error: String) -> Deployment<Failed> {
    deployment.transition_with(|data| {
        data.completed_at = Some(Utc::now());
        data.log(format!("deployment failed: {error}"));
        data.error = Some(error);
    })
}
