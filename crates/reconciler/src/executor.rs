//! Action execution against the platform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::client::{PlatformClient, bounded};
use crate::error::{ErrorKind, PlatformResult};
use crate::shutdown::CancellationHandle;
use crate::spec::ServiceSpec;
use crate::types::{Action, FailedAction, ServiceFailure};

/// Trait for executing reconcile actions.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute an action.
    async fn execute(&self, action: &Action) -> PlatformResult<()>;
}

/// Executor bound to one service's app, issuing each action as a platform call.
pub struct PlatformActionExecutor {
    client: Arc<dyn PlatformClient>,
    app: String,
    organization: String,
    region: String,
    call_timeout: Duration,
}

impl PlatformActionExecutor {
    /// Create an executor for the app described by `spec`.
    pub fn new(
        client: Arc<dyn PlatformClient>,
        spec: &ServiceSpec,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            app: spec.name().to_string(),
            organization: spec.placement().organization.clone(),
            region: spec.placement().region.clone(),
            call_timeout,
        }
    }
}

#[async_trait]
impl ActionExecutor for PlatformActionExecutor {
    async fn execute(&self, action: &Action) -> PlatformResult<()> {
        let app = self.app.as_str();
        let call = async {
            match action {
                Action::CreateApp => self.client.create_app(app, &self.organization).await,
                Action::CreateVolume { name, count } => {
                    self.client
                        .create_volume(app, name, *count, &self.region)
                        .await
                }
                Action::DestroyMachine { machine_id } => {
                    self.client.destroy_machine(app, machine_id, true).await
                }
                Action::LaunchMachine { image, config, .. } => {
                    self.client.run_machine(app, image, config).await
                }
                Action::DeployBuild { source, config } => {
                    self.client.deploy_build(app, source, config).await
                }
            }
        };
        bounded(self.call_timeout, &action.description(), call).await
    }
}

/// What happened to a plan once executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub succeeded: Vec<Action>,
    pub failed: Vec<FailedAction>,
    /// Actions left unattempted after a fatal failure or cancellation.
    pub skipped: Vec<Action>,
    /// The fatal failure or cancellation that stopped the plan, if any.
    pub aborted: Option<ServiceFailure>,
}

/// Apply a plan strictly in order.
///
/// A failed `CreateApp` stops the plan and the rest is reported as skipped.
/// Every other failure is recorded and execution moves on to the next action,
/// so one replica failing to launch never prevents its siblings.
///
/// `cancellation` is checked before each action. Once raised, the action in
/// flight completes and the rest of the plan is skipped as `Cancelled`.
pub async fn apply_actions(
    executor: &dyn ActionExecutor,
    actions: Vec<Action>,
    cancellation: &CancellationHandle,
) -> ExecutionOutcome {
    let mut outcome = ExecutionOutcome::default();
    let mut remaining = actions.into_iter();

    while let Some(action) = remaining.next() {
        if let Some(signal) = cancellation.signal() {
            info!(action = %action, signal = %signal, "Cancelled, skipping rest of plan");
            outcome.aborted = Some(ServiceFailure::new(
                ErrorKind::Cancelled,
                format!("run cancelled ({signal}) before '{action}'"),
            ));
            outcome.skipped = std::iter::once(action).chain(remaining.by_ref()).collect();
            break;
        }

        debug!(action = %action, "Applying action");

        match executor.execute(&action).await {
            Ok(()) => outcome.succeeded.push(action),
            Err(e) => {
                let kind = action.failure_kind();
                let failed = FailedAction {
                    action,
                    kind,
                    message: e.to_string(),
                };

                if kind.is_fatal() {
                    error!(
                        action = %failed.action,
                        error = %e,
                        "Fatal action failed, skipping rest of plan"
                    );
                    outcome.aborted = Some(ServiceFailure::new(kind, e.to_string()));
                    outcome.failed.push(failed);
                    outcome.skipped = remaining.by_ref().collect();
                    break;
                }

                if kind == ErrorKind::MachineDestroyFailed {
                    warn!(
                        action = %failed.action,
                        error = %e,
                        "Could not destroy stale machine, it will be retried next run"
                    );
                } else {
                    warn!(action = %failed.action, error = %e, "Action failed");
                }
                outcome.failed.push(failed);
            }
        }
    }

    outcome
}
