//! Per-service reconciliation: query, plan, execute, confirm, report.

use std::sync::Arc;
use std::time::Duration;

use fly_compose_core::{GenericResultExt, LoggedResultExt};
use itertools::Itertools;
use tracing::{debug, error, info};

use crate::client::{PlatformClient, bounded};
use crate::error::{ErrorKind, PlatformResult};
use crate::executor::{PlatformActionExecutor, apply_actions};
use crate::planner;
use crate::shutdown::CancellationHandle;
use crate::spec::ServiceSpec;
use crate::types::{Action, ObservedState, ObservedVolume, ReconciliationResult, ServiceFailure};

/// Where a reconciliation attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    /// Nothing queried yet.
    Unchecked,
    /// Observed state is known.
    Checked { app_exists: bool },
    /// A plan has been computed.
    Planned,
    /// The plan has been applied.
    Executed,
    /// The result has been assembled. Terminal.
    Reported,
}

/// A plan computed without being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanPreview {
    pub service_name: String,
    pub observed: ObservedState,
    pub actions: Vec<Action>,
}

/// Owns one service's lifecycle for the duration of a run.
///
/// Every call to [`ServiceReconciler::run`] starts again from
/// [`ReconcilePhase::Unchecked`]; nothing but the platform itself carries
/// state between runs.
pub struct ServiceReconciler {
    spec: ServiceSpec,
    client: Arc<dyn PlatformClient>,
    call_timeout: Duration,
    cancellation: CancellationHandle,
    phase: ReconcilePhase,
}

impl ServiceReconciler {
    /// Create a reconciler for one service.
    pub fn new(
        spec: ServiceSpec,
        client: Arc<dyn PlatformClient>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            spec,
            client,
            call_timeout,
            cancellation: CancellationHandle::new(),
            phase: ReconcilePhase::Unchecked,
        }
    }

    /// Stop issuing actions once `cancellation` is raised.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Get the spec being reconciled.
    #[must_use]
    pub const fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    /// Get the current phase.
    #[must_use]
    pub const fn phase(&self) -> ReconcilePhase {
        self.phase
    }

    fn advance(&mut self, next: ReconcilePhase) {
        debug!(service = %self.spec.name(), from = ?self.phase, to = ?next, "Phase transition");
        self.phase = next;
    }

    /// Query the platform for this service's current footprint.
    ///
    /// Machines and volumes are only listed when the app exists.
    ///
    /// # Errors
    ///
    /// Returns the first platform error (including timeouts) hit by any query.
    pub async fn observe(&self) -> PlatformResult<ObservedState> {
        let name = self.spec.name();
        let limit = self.call_timeout;

        let apps = bounded(limit, "list apps", self.client.list_apps()).await?;
        if !apps.iter().any(|app| app.name == name) {
            return Ok(ObservedState::absent());
        }

        let machines = bounded(limit, "list machines", self.client.list_machines(name)).await?;
        let listed = bounded(limit, "list volumes", self.client.list_volumes(name))
            .await?
            .into_iter()
            .map(|volume| volume.name)
            .unique()
            .collect_vec();

        let missing = self
            .spec
            .volumes()
            .iter()
            .filter(|wanted| !listed.contains(&wanted.name))
            .map(|wanted| ObservedVolume::missing(wanted.name.clone()))
            .collect_vec();

        let volumes = listed
            .into_iter()
            .map(ObservedVolume::present)
            .chain(missing)
            .collect_vec();

        Ok(ObservedState::existing(machines, volumes))
    }

    /// Query and plan without executing anything.
    ///
    /// # Errors
    ///
    /// Returns a `PlatformUnavailable` failure if the state queries fail.
    pub async fn preview(&mut self) -> Result<PlanPreview, ServiceFailure> {
        self.phase = ReconcilePhase::Unchecked;

        let observed = self.observe().await.map_err(|e| {
            ServiceFailure::new(
                ErrorKind::PlatformUnavailable,
                format!("querying state: {e}"),
            )
        })?;
        self.advance(ReconcilePhase::Checked {
            app_exists: observed.app_exists,
        });

        let actions = planner::plan(&self.spec, &observed);
        self.advance(ReconcilePhase::Planned);

        Ok(PlanPreview {
            service_name: self.spec.name().to_string(),
            observed,
            actions,
        })
    }

    /// Run one full reconciliation attempt and report its result.
    pub async fn run(&mut self) -> ReconciliationResult {
        let name = self.spec.name().to_string();
        info!(service = %name, "Starting reconciliation");

        let preview = match self.preview().await {
            Ok(preview) => preview,
            Err(failure) => {
                error!(service = %name, error = %failure, "Could not query service state");
                self.advance(ReconcilePhase::Reported);
                return ReconciliationResult {
                    aborted: Some(failure),
                    ..ReconciliationResult::new(name)
                };
            }
        };
        debug!(service = %name, actions = preview.actions.len(), "Generated actions");

        let executor =
            PlatformActionExecutor::new(Arc::clone(&self.client), &self.spec, self.call_timeout);
        let outcome = apply_actions(&executor, preview.actions, &self.cancellation).await;
        self.advance(ReconcilePhase::Executed);

        let final_state = if outcome.aborted.is_none() {
            self.observe()
                .await
                .tap_ok(|state| {
                    debug!(service = %name, machines = state.machines.len(), "Confirmed final state");
                })
                .into_option_logged("confirming final state")
        } else {
            None
        };

        let result = ReconciliationResult {
            service_name: name,
            succeeded: outcome.succeeded,
            failed: outcome.failed,
            skipped: outcome.skipped,
            aborted: outcome.aborted,
            final_state,
        };
        self.advance(ReconcilePhase::Reported);

        if result.is_success() {
            info!(
                service = %result.service_name,
                actions_taken = result.succeeded_count(),
                "Service reconciled"
            );
        } else {
            info!(
                service = %result.service_name,
                actions_taken = result.succeeded_count(),
                actions_failed = result.failed_count(),
                "Service reconciled with failures"
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::error::PlatformError;
    use crate::spec::VolumeMount;
    use crate::testing::{Operation, ScriptedPlatform};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn data_spec() -> ServiceSpec {
        ServiceSpec::builder("acme-db")
            .image("postgres:16")
            .volume(VolumeMount::new("data", "/var/lib/postgresql"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_observe_skips_listing_for_missing_app() {
        let platform = Arc::new(ScriptedPlatform::new());
        let reconciler = ServiceReconciler::new(data_spec(), platform.clone(), TIMEOUT);

        let observed = reconciler.observe().await.unwrap();

        assert_eq!(observed, ObservedState::absent());
        assert_eq!(platform.calls_of(Operation::ListMachines), 0);
        assert_eq!(platform.calls_of(Operation::ListVolumes), 0);
    }

    #[tokio::test]
    async fn test_observe_marks_desired_volumes() {
        let platform = Arc::new(
            ScriptedPlatform::new()
                .with_app("acme-db")
                .with_volume("acme-db", "logs")
                .with_volume("acme-db", "logs"),
        );
        let reconciler = ServiceReconciler::new(data_spec(), platform, TIMEOUT);

        let observed = reconciler.observe().await.unwrap();

        assert_eq!(
            observed.volumes,
            vec![ObservedVolume::present("logs"), ObservedVolume::missing("data")]
        );
    }

    #[tokio::test]
    async fn test_run_reaches_reported_and_confirms_state() {
        let platform = Arc::new(ScriptedPlatform::new());
        let mut reconciler = ServiceReconciler::new(data_spec(), platform, TIMEOUT);

        let result = reconciler.run().await;

        assert!(result.is_success());
        assert_eq!(reconciler.phase(), ReconcilePhase::Reported);
        let final_state = result.final_state.unwrap();
        assert!(final_state.app_exists);
        assert!(final_state.has_volume("data"));
        assert_eq!(final_state.machines.len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_replaces_machines_only() {
        let platform = Arc::new(ScriptedPlatform::new());
        let mut reconciler = ServiceReconciler::new(data_spec(), platform, TIMEOUT);

        let _ = reconciler.run().await;
        let second = reconciler.run().await;

        assert!(second.is_success());
        assert!(!second.succeeded.contains(&Action::CreateApp));
        assert!(
            second
                .succeeded
                .iter()
                .all(|a| matches!(a, Action::DestroyMachine { .. }) || a.is_launch())
        );
    }

    #[tokio::test]
    async fn test_query_failure_aborts_service() {
        let platform = Arc::new(
            ScriptedPlatform::new()
                .fail_always(Operation::ListApps, PlatformError::unavailable("fly not found")),
        );
        let mut reconciler = ServiceReconciler::new(data_spec(), platform, TIMEOUT);

        let result = reconciler.run().await;

        assert_eq!(result.error_kinds(), vec![ErrorKind::PlatformUnavailable]);
        assert!(result.succeeded.is_empty());
        assert!(result.final_state.is_none());
    }

    #[tokio::test]
    async fn test_app_creation_failure_leaves_final_state_unknown() {
        let platform = Arc::new(
            ScriptedPlatform::new()
                .fail_always(Operation::CreateApp, PlatformError::command_failed("name taken")),
        );
        let mut reconciler = ServiceReconciler::new(data_spec(), platform.clone(), TIMEOUT);

        let result = reconciler.run().await;

        assert_eq!(
            result.aborted.as_ref().map(|a| a.kind),
            Some(ErrorKind::AppCreationFailed)
        );
        assert_eq!(result.skipped.len(), 2);
        assert!(result.final_state.is_none());
        assert_eq!(platform.calls_of(Operation::CreateVolume), 0);
    }
}
