//! Reconciliation of compose-style service definitions onto a machine platform.
//!
//! Each service is converged independently:
//!
//! - **Desired State**: a [`ServiceSpec`] declaring image, resources, volumes and ports
//! - **Observed State**: what the platform reports for the service's app
//! - **Plan**: an ordered list of [`Action`]s closing the gap
//! - **Execute**: actions applied in order, failures recorded per action
//!
//! # Key Concepts
//!
//! ## Reconciliation
//!
//! A [`ServiceReconciler`] walks one service through
//! `Unchecked -> Checked -> Planned -> Executed -> Reported` and returns a
//! [`ReconciliationResult`]. The [`Orchestrator`] runs one reconciler per
//! service over a bounded worker pool; services never block each other.
//!
//! ## Actions
//!
//! - `CreateApp` - Create the service's app (fatal on failure)
//! - `CreateVolume` - Create a missing volume, one per replica
//! - `DestroyMachine` - Retire an existing machine
//! - `LaunchMachine` - Launch one replica from an image
//! - `DeployBuild` - Build and deploy from a source directory
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fly_compose_reconciler::{Orchestrator, ServiceSpec, testing::ScriptedPlatform};
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = Orchestrator::builder()
//!         .with_client(Arc::new(ScriptedPlatform::new()))
//!         .worker_limit(Some(4))
//!         .build()?;
//!
//!     let web = ServiceSpec::builder("acme-web").image("nginx").replicas(2).build()?;
//!     let results = orchestrator.reconcile_all(vec![web]).await?;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod reconciler;
pub mod shutdown;
pub mod spec;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod types;

// Re-export main types
pub use client::{AppRecord, Machine, PlatformClient, VolumeRecord, bounded};
pub use error::{Error, ErrorKind, PlatformError, PlatformErrorKind, PlatformResult, Result};
pub use executor::{ActionExecutor, ExecutionOutcome, PlatformActionExecutor, apply_actions};
pub use orchestrator::{
    DEFAULT_CALL_TIMEOUT, Orchestrator, OrchestratorBuilder, OrchestratorConfig, ServicePlan,
};
pub use planner::plan;
pub use reconciler::{PlanPreview, ReconcilePhase, ServiceReconciler};
pub use shutdown::{CancellationHandle, ShutdownSignal};
pub use spec::{
    CpuKind, MachineConfig, Placement, PortMapping, Resources, ServiceSpec, ServiceSpecBuilder,
    VolumeMount,
};
pub use types::{
    Action, FailedAction, ObservedState, ObservedVolume, ReconciliationResult, ServiceFailure,
};
