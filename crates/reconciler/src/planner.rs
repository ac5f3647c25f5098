//! Action planning: desired spec + observed state -> ordered action list.
//!
//! The order encodes the dependency chain the executor relies on:
//! app, then volumes, then retiring old machines, then launching new ones.
//!
//! Machines are never diffed. Every machine observed for the service is
//! considered stale once a reconciliation is requested and is replaced; app
//! and volumes survive machine destruction, so a reset is always safe to
//! repeat.

use crate::spec::ServiceSpec;
use crate::types::{Action, ObservedState};

/// Compute the actions that move `observed` to `spec`.
///
/// Pure and deterministic: identical inputs always give identical plans.
#[must_use]
pub fn plan(spec: &ServiceSpec, observed: &ObservedState) -> Vec<Action> {
    let replicas = spec.resources().replica_count;

    let create_app = (!observed.app_exists).then_some(Action::CreateApp);

    let create_volumes = spec
        .volumes()
        .iter()
        .filter(|volume| !observed.has_volume(&volume.name))
        .map(|volume| Action::CreateVolume {
            name: volume.name.clone(),
            count: replicas,
        });

    let destroy_machines = observed
        .machines
        .iter()
        .map(|machine| Action::DestroyMachine {
            machine_id: machine.id.clone(),
        });

    create_app
        .into_iter()
        .chain(create_volumes)
        .chain(destroy_machines)
        .chain(launches(spec))
        .collect()
}

/// Launch actions for a spec: one build deploy, or one action per replica.
fn launches(spec: &ServiceSpec) -> Vec<Action> {
    let config = spec.machine_config();
    match spec.build_source() {
        Some(source) => vec![Action::DeployBuild {
            source: source.to_string(),
            config,
        }],
        None => (1..=spec.resources().replica_count)
            .map(|replica| Action::LaunchMachine {
                replica,
                image: spec.image().to_string(),
                config: config.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::client::Machine;
    use crate::spec::{CpuKind, PortMapping, Resources, VolumeMount};
    use crate::types::ObservedVolume;

    fn web_spec() -> ServiceSpec {
        ServiceSpec::builder("web")
            .image("nginx")
            .resources(Resources {
                kind: CpuKind::Shared,
                cpu_count: 1,
                memory_mb: 512,
                replica_count: 2,
            })
            .port(PortMapping::new(8080, 80))
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_app_creates_then_launches_each_replica() {
        let actions = plan(&web_spec(), &ObservedState::absent());

        assert_eq!(actions.len(), 3);
        assert_eq!(actions.first(), Some(&Action::CreateApp));
        assert!(matches!(
            actions.get(1),
            Some(Action::LaunchMachine { replica: 1, image, .. }) if image == "nginx"
        ));
        assert!(matches!(
            actions.get(2),
            Some(Action::LaunchMachine { replica: 2, .. })
        ));
    }

    #[test]
    fn test_missing_volume_and_stale_machine() {
        let spec = ServiceSpec::builder("web")
            .volume(VolumeMount::new("data", "/var/data"))
            .build()
            .unwrap();
        let observed = ObservedState::existing(vec![Machine::new("m1", "started")], Vec::new());

        let actions = plan(&spec, &observed);

        assert_eq!(
            actions.get(..2),
            Some(
                &[
                    Action::CreateVolume {
                        name: "data".to_string(),
                        count: 1
                    },
                    Action::DestroyMachine {
                        machine_id: "m1".to_string()
                    },
                ][..]
            )
        );
        assert!(matches!(actions.get(2), Some(Action::LaunchMachine { .. })));
        assert_eq!(actions.len(), 3);
    }

    #[test]
    fn test_existing_volume_not_recreated() {
        let spec = ServiceSpec::builder("web")
            .volume(VolumeMount::new("data", "/var/data"))
            .build()
            .unwrap();
        let observed =
            ObservedState::existing(Vec::new(), vec![ObservedVolume::present("data")]);

        let actions = plan(&spec, &observed);

        assert!(actions.iter().all(Action::is_launch));
    }

    #[test]
    fn test_build_source_deploys_once() {
        let spec = ServiceSpec::builder("api")
            .build_source("./api")
            .replicas(4)
            .build()
            .unwrap();

        let actions = plan(&spec, &ObservedState::existing(Vec::new(), Vec::new()));

        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions.first(),
            Some(Action::DeployBuild { source, .. }) if source == "./api"
        ));
    }

    #[test]
    fn test_machines_destroyed_in_observed_order() {
        let observed = ObservedState::existing(
            vec![Machine::new("b", "started"), Machine::new("a", "stopped")],
            Vec::new(),
        );

        let destroyed = plan(&web_spec(), &observed)
            .into_iter()
            .filter_map(|action| match action {
                Action::DestroyMachine { machine_id } => Some(machine_id),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(destroyed, vec!["b".to_string(), "a".to_string()]);
    }
}
