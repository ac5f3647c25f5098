//! Core types for the reconciler.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::client::Machine;
use crate::error::ErrorKind;
use crate::spec::MachineConfig;

/// A volume as seen by one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedVolume {
    pub name: String,
    pub exists: bool,
}

impl ObservedVolume {
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exists: true,
        }
    }

    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exists: false,
        }
    }
}

/// Snapshot of one service's remote footprint.
///
/// Queried fresh at the start of every attempt and discarded afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Whether the app exists on the platform.
    pub app_exists: bool,
    /// Machines currently running for the app, in platform order.
    pub machines: Vec<Machine>,
    /// Volumes known for the app.
    pub volumes: Vec<ObservedVolume>,
}

impl ObservedState {
    /// State of a service whose app has never been created.
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    /// State of an existing app.
    #[must_use]
    pub fn existing(machines: Vec<Machine>, volumes: Vec<ObservedVolume>) -> Self {
        Self {
            app_exists: true,
            machines,
            volumes,
        }
    }

    /// Whether a volume of this name exists.
    #[must_use]
    pub fn has_volume(&self, name: &str) -> bool {
        self.volumes.iter().any(|v| v.exists && v.name == name)
    }

    /// Names of the volumes that exist.
    #[must_use]
    pub fn existing_volume_names(&self) -> Vec<&str> {
        self.volumes
            .iter()
            .filter(|v| v.exists)
            .map(|v| v.name.as_str())
            .collect_vec()
    }
}

/// Actions the reconciler can take for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Create the service's app.
    CreateApp,
    /// Create a volume, one copy per replica.
    CreateVolume { name: String, count: u32 },
    /// Destroy a stale machine.
    DestroyMachine { machine_id: String },
    /// Launch one replica from a prebuilt image.
    LaunchMachine {
        replica: u32,
        image: String,
        config: MachineConfig,
    },
    /// Build from source and deploy; replica fan-out is the platform's job.
    DeployBuild {
        source: String,
        config: MachineConfig,
    },
}

impl Action {
    /// The error kind a failure of this action is recorded as.
    #[must_use]
    pub const fn failure_kind(&self) -> ErrorKind {
        match self {
            Self::CreateApp => ErrorKind::AppCreationFailed,
            Self::CreateVolume { .. } => ErrorKind::VolumeCreationFailed,
            Self::DestroyMachine { .. } => ErrorKind::MachineDestroyFailed,
            Self::LaunchMachine { .. } | Self::DeployBuild { .. } => ErrorKind::LaunchFailed,
        }
    }

    /// Whether this action launches workload (a replica or a build deploy).
    #[must_use]
    pub const fn is_launch(&self) -> bool {
        matches!(self, Self::LaunchMachine { .. } | Self::DeployBuild { .. })
    }

    /// Get a description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateApp => "create app".to_string(),
            Self::CreateVolume { name, count } => {
                format!("create volume {name} (x{count})")
            }
            Self::DestroyMachine { machine_id } => format!("destroy machine {machine_id}"),
            Self::LaunchMachine { replica, image, .. } => {
                format!("launch replica {replica} from {image}")
            }
            Self::DeployBuild { source, .. } => format!("deploy build from {source}"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// An action that the platform rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    pub action: Action,
    pub kind: ErrorKind,
    pub message: String,
}

/// Why a service's run stopped short of (or outside) action execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of reconciling one service, with partial success support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Platform name of the service.
    pub service_name: String,
    /// Actions that were taken.
    pub succeeded: Vec<Action>,
    /// Actions that failed.
    pub failed: Vec<FailedAction>,
    /// Actions never attempted because an earlier fatal failure stopped the plan.
    pub skipped: Vec<Action>,
    /// Set when the service's run was cut short.
    pub aborted: Option<ServiceFailure>,
    /// State re-queried after execution; `None` when unknown.
    pub final_state: Option<ObservedState>,
}

impl ReconciliationResult {
    /// Create an empty result for a service.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            aborted: None,
            final_state: None,
        }
    }

    /// A service that never reached execution.
    pub fn aborted(
        service_name: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            aborted: Some(ServiceFailure::new(kind, message)),
            ..Self::new(service_name)
        }
    }

    /// Check if every action succeeded and nothing was aborted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_none()
    }

    /// Get the number of successful actions.
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    /// Get the number of failed actions.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Get the error kinds of all failures, the abort reason first.
    #[must_use]
    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.aborted
            .iter()
            .map(|a| a.kind)
            .chain(self.failed.iter().map(|f| f.kind))
            .unique()
            .collect_vec()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_observed_volume_lookup_ignores_missing() {
        let observed = ObservedState::existing(
            Vec::new(),
            vec![ObservedVolume::present("data"), ObservedVolume::missing("cache")],
        );

        assert!(observed.has_volume("data"));
        assert!(!observed.has_volume("cache"));
        assert_eq!(observed.existing_volume_names(), vec!["data"]);
    }

    #[test]
    fn test_action_failure_kinds() {
        assert_eq!(Action::CreateApp.failure_kind(), ErrorKind::AppCreationFailed);
        assert_eq!(
            Action::DestroyMachine {
                machine_id: "m1".to_string()
            }
            .failure_kind(),
            ErrorKind::MachineDestroyFailed
        );
    }

    #[test]
    fn test_action_description() {
        let action = Action::CreateVolume {
            name: "data".to_string(),
            count: 2,
        };
        assert_eq!(action.to_string(), "create volume data (x2)");
    }

    #[test]
    fn test_result_success_and_kinds() {
        let mut result = ReconciliationResult::new("acme-web");
        assert!(result.is_success());

        result.failed.push(FailedAction {
            action: Action::DestroyMachine {
                machine_id: "m1".to_string(),
            },
            kind: ErrorKind::MachineDestroyFailed,
            message: "busy".to_string(),
        });
        assert!(!result.is_success());
        assert_eq!(result.error_kinds(), vec![ErrorKind::MachineDestroyFailed]);
    }

    #[test]
    fn test_aborted_result() {
        let result =
            ReconciliationResult::aborted("acme-db", ErrorKind::ConfigurationError, "bad port");
        assert!(!result.is_success());
        assert_eq!(result.error_kinds(), vec![ErrorKind::ConfigurationError]);
    }
}
