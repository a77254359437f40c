//! Deployment orchestration.
//!
//! The [`ReleaseOrchestrator`] composes the health gate, the executor, the
//! [`DeploymentMonitor`] and the [`RollbackManager`] into the deploy flow:
//!
//! ```text
//! deploy ─▶ health gate ─▶ backup (production) ─▶ dispatch ─▶ monitor
//!                │                                              │
//!                └─▶ cancelled                 failed ◀─────────┤
//!                                                │              └─▶ success
//!                                                └─▶ rollback (production, auto_rollback)
//! ```

mod monitor;
mod orchestrator;
mod rollback;

pub use monitor::{DeploymentMonitor, MonitorGuard, MonitorHandles, MonitorOutcome};
pub use orchestrator::{DeployOutcome, DeployRequest, ReleaseOrchestrator};
pub use rollback::{RollbackManager, RollbackOutcome};
