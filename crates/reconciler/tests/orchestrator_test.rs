//! Integration tests for the orchestrator against the scripted platform.
//!
//! Covers failure isolation between replicas and services, hung platform
//! calls, the worker limit, cancellation, and result ordering.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fly_compose_reconciler::testing::{Operation, ScriptedPlatform};
use fly_compose_reconciler::{
    Action, AppRecord, CancellationHandle, Error, ErrorKind, Machine, MachineConfig, Orchestrator,
    PlatformClient, PlatformError, PlatformResult, ServiceSpec, ShutdownSignal, VolumeMount,
    VolumeRecord,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn service(name: &str) -> ServiceSpec {
    ServiceSpec::builder(name).image("nginx").build().unwrap()
}

fn orchestrator(platform: Arc<dyn PlatformClient>) -> Orchestrator {
    Orchestrator::builder()
        .with_client(platform)
        .preflight(false)
        .build()
        .unwrap()
}

/// GIVEN an existing app whose second replica launch is rejected
/// WHEN three replicas are reconciled
/// THEN replicas 1 and 3 still launch and exactly one action fails
#[tokio::test]
async fn test_replica_failure_does_not_stop_siblings() {
    let platform = Arc::new(
        ScriptedPlatform::new()
            .with_app("acme-web")
            .fail_nth_for(
                Operation::RunMachine,
                "acme-web",
                2,
                PlatformError::command_failed("capacity exhausted"),
            ),
    );
    let spec = ServiceSpec::builder("acme-web")
        .image("nginx")
        .replicas(3)
        .build()
        .unwrap();

    let results = orchestrator(platform.clone())
        .reconcile_all(vec![spec])
        .await
        .unwrap();

    let result = &results[0];
    assert_eq!(result.succeeded_count(), 2);
    assert_eq!(result.failed_count(), 1);
    assert!(matches!(
        &result.failed[0].action,
        Action::LaunchMachine { replica: 2, .. }
    ));
    assert_eq!(result.failed[0].kind, ErrorKind::LaunchFailed);
    assert_eq!(platform.calls_of(Operation::RunMachine), 3);
    assert_eq!(platform.machines("acme-web").len(), 2);
}

/// GIVEN five services where one service's app creation never returns
/// WHEN all are reconciled
/// THEN the other four report immediately and the hung one is bounded by the call timeout
#[tokio::test(start_paused = true)]
async fn test_hung_service_does_not_delay_others() {
    let names = ["svc-1", "svc-2", "svc-3", "svc-4", "svc-5"];
    let platform = Arc::new(ScriptedPlatform::new().block_for(Operation::CreateApp, "svc-3"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::builder()
        .with_client(platform)
        .preflight(false)
        .call_timeout(Duration::from_secs(30))
        .with_progress(tx)
        .build()
        .unwrap();

    let start = Instant::now();
    let run = tokio::spawn(async move {
        orchestrator
            .reconcile_all(names.iter().map(|name| service(name)).collect())
            .await
    });

    let mut early = Vec::new();
    for _ in 0..4 {
        let result = rx.recv().await.unwrap();
        assert!(result.is_success(), "{} should succeed", result.service_name);
        early.push(result.service_name);
    }
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!early.contains(&"svc-3".to_string()));

    let hung = rx.recv().await.unwrap();
    assert_eq!(hung.service_name, "svc-3");
    assert!(start.elapsed() >= Duration::from_secs(30));
    let abort = hung.aborted.unwrap();
    assert_eq!(abort.kind, ErrorKind::AppCreationFailed);
    assert!(abort.message.contains("did not complete"), "{}", abort.message);

    let results = run.await.unwrap().unwrap();
    let order = results
        .iter()
        .map(|r| r.service_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(order, names);
}

/// GIVEN three services whose app creation takes one second each
/// WHEN reconciled with a single worker
/// THEN they run one after another
#[tokio::test(start_paused = true)]
async fn test_worker_limit_serialises_services() {
    let slow = |platform: ScriptedPlatform, app: &str| {
        platform.delay_for(Operation::CreateApp, app, Duration::from_secs(1))
    };
    let platform = ["a", "b", "c"]
        .into_iter()
        .fold(ScriptedPlatform::new(), slow);
    let platform = Arc::new(platform);

    let serial = Orchestrator::builder()
        .with_client(platform)
        .preflight(false)
        .worker_limit(Some(1))
        .build()
        .unwrap();

    let start = Instant::now();
    let results = serial
        .reconcile_all(vec![service("a"), service("b"), service("c")])
        .await
        .unwrap();

    assert!(results.iter().all(|r| r.is_success()));
    assert!(start.elapsed() >= Duration::from_secs(3));
}

/// GIVEN the same slow services
/// WHEN reconciled without a worker limit
/// THEN they overlap
#[tokio::test(start_paused = true)]
async fn test_unbounded_workers_overlap() {
    let platform = ["a", "b", "c"]
        .into_iter()
        .fold(ScriptedPlatform::new(), |platform, app| {
            platform.delay_for(Operation::CreateApp, app, Duration::from_secs(1))
        });

    let start = Instant::now();
    let results = orchestrator(Arc::new(platform))
        .reconcile_all(vec![service("a"), service("b"), service("c")])
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(start.elapsed() < Duration::from_secs(2));
}

/// GIVEN a run cancelled before it starts
/// WHEN services are reconciled
/// THEN every service reports Cancelled and the platform is untouched
#[tokio::test]
async fn test_cancelled_run_touches_nothing() {
    let platform = Arc::new(ScriptedPlatform::new());
    let cancellation = CancellationHandle::new();
    cancellation.cancel(ShutdownSignal::Programmatic);
    let orchestrator = Orchestrator::builder()
        .with_client(platform.clone())
        .preflight(false)
        .with_cancellation(cancellation)
        .build()
        .unwrap();

    let results = orchestrator
        .reconcile_all(vec![service("a"), service("b")])
        .await
        .unwrap();

    assert!(
        results
            .iter()
            .all(|r| r.error_kinds() == vec![ErrorKind::Cancelled])
    );
    assert!(platform.calls().is_empty());
}

/// GIVEN a single worker busy with a slow service
/// WHEN cancellation is raised mid-run
/// THEN the in-flight call completes, its remaining actions are skipped, and
/// the queued services never start
#[tokio::test(start_paused = true)]
async fn test_cancellation_lets_in_flight_call_finish() {
    let platform = Arc::new(ScriptedPlatform::new().delay_for(
        Operation::CreateApp,
        "a",
        Duration::from_secs(10),
    ));
    let orchestrator = Orchestrator::builder()
        .with_client(platform.clone())
        .preflight(false)
        .worker_limit(Some(1))
        .build()
        .unwrap();
    let cancellation = orchestrator.cancellation();

    let run = tokio::spawn(async move {
        orchestrator
            .reconcile_all(vec![service("a"), service("b"), service("c")])
            .await
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(cancellation.cancel(ShutdownSignal::Interrupt));

    let results = run.await.unwrap().unwrap();

    assert_eq!(results[0].succeeded, vec![Action::CreateApp]);
    assert_eq!(results[0].skipped.len(), 1);
    assert_eq!(results[0].error_kinds(), vec![ErrorKind::Cancelled]);
    assert_eq!(results[1].error_kinds(), vec![ErrorKind::Cancelled]);
    assert_eq!(results[2].error_kinds(), vec![ErrorKind::Cancelled]);
    assert_eq!(platform.calls_of(Operation::CreateApp), 1);
    assert_eq!(platform.calls_of(Operation::RunMachine), 0);
}

/// GIVEN an unbounded pool where every service is already running
/// WHEN cancellation is raised while their first calls are in flight
/// THEN no further action is issued for any service
#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_running_services_in_unbounded_pool() {
    let platform = Arc::new(
        ScriptedPlatform::new()
            .delay_for(Operation::CreateApp, "a", Duration::from_secs(10))
            .delay_for(Operation::CreateApp, "b", Duration::from_secs(10)),
    );
    let orchestrator = orchestrator(platform.clone());
    let cancellation = orchestrator.cancellation();
    let replicated = |name: &str| {
        ServiceSpec::builder(name)
            .image("nginx")
            .replicas(3)
            .build()
            .unwrap()
    };

    let run = tokio::spawn(async move {
        orchestrator
            .reconcile_all(vec![replicated("a"), replicated("b")])
            .await
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(cancellation.cancel(ShutdownSignal::Interrupt));

    let results = run.await.unwrap().unwrap();

    assert_eq!(platform.calls_of(Operation::CreateApp), 2);
    assert_eq!(platform.calls_of(Operation::RunMachine), 0);
    for result in &results {
        assert!(!result.is_success());
        assert_eq!(result.succeeded, vec![Action::CreateApp]);
        assert_eq!(result.skipped.len(), 3);
        assert_eq!(result.error_kinds(), vec![ErrorKind::Cancelled]);
        assert!(result.final_state.is_none());
    }
}

/// GIVEN two services resolving to the same app name
/// WHEN reconciled
/// THEN the later one is rejected without reaching the platform
#[tokio::test]
async fn test_duplicate_app_name_rejected() {
    let platform = Arc::new(ScriptedPlatform::new());

    let results = orchestrator(platform.clone())
        .reconcile_all(vec![service("acme-web"), service("acme-web")])
        .await
        .unwrap();

    assert!(results[0].is_success());
    assert_eq!(
        results[1].error_kinds(),
        vec![ErrorKind::ConfigurationError]
    );
    assert_eq!(platform.calls_of(Operation::CreateApp), 1);
}

/// GIVEN a platform that fails the pre-flight check
/// WHEN services are reconciled with pre-flight enabled
/// THEN the whole run fails before any service is queried
#[tokio::test]
async fn test_preflight_failure_aborts_run() {
    let platform = Arc::new(
        ScriptedPlatform::new()
            .fail_always(Operation::Preflight, PlatformError::unavailable("fly not found")),
    );
    let orchestrator = Orchestrator::builder()
        .with_client(platform.clone())
        .build()
        .unwrap();

    let result = orchestrator.reconcile_all(vec![service("a")]).await;

    assert!(matches!(result, Err(Error::PlatformUnavailable { .. })));
    assert_eq!(platform.calls_of(Operation::ListApps), 0);
}

/// GIVEN two existing apps where listing one app's machines fails
/// WHEN both are reconciled
/// THEN only that service reports PlatformUnavailable
#[tokio::test]
async fn test_query_failure_scoped_to_service() {
    let platform = Arc::new(
        ScriptedPlatform::new()
            .with_machine("acme-a", "m-old")
            .with_app("acme-b")
            .fail_for(
                Operation::ListMachines,
                "acme-b",
                PlatformError::command_failed("unauthorized"),
            ),
    );

    let results = orchestrator(platform.clone())
        .reconcile_all(vec![service("acme-a"), service("acme-b")])
        .await
        .unwrap();

    assert!(results[0].is_success());
    assert!(
        results[0]
            .succeeded
            .contains(&Action::DestroyMachine {
                machine_id: "m-old".to_string()
            })
    );
    assert_eq!(
        results[1].error_kinds(),
        vec![ErrorKind::PlatformUnavailable]
    );
    assert!(results[1].succeeded.is_empty());
}

/// GIVEN a volume-backed service on a fresh platform
/// WHEN it is only previewed
/// THEN its plan is reported and nothing is created
#[tokio::test]
async fn test_preview_does_not_execute() {
    let platform = Arc::new(ScriptedPlatform::new());
    let spec = ServiceSpec::builder("acme-db")
        .volume(VolumeMount::new("data", "/data"))
        .build()
        .unwrap();

    let plans = orchestrator(platform.clone())
        .preview_all(vec![spec])
        .await
        .unwrap();

    let preview = plans[0].outcome.as_ref().unwrap();
    assert!(!preview.observed.app_exists);
    assert_eq!(preview.actions.len(), 3);
    assert_eq!(platform.calls_of(Operation::CreateApp), 0);
    assert_eq!(platform.calls_of(Operation::CreateVolume), 0);
}

/// Delegates to a scripted platform but panics when creating one app.
struct FaultyPlatform {
    inner: ScriptedPlatform,
    faulty_app: &'static str,
}

#[async_trait]
impl PlatformClient for FaultyPlatform {
    async fn list_apps(&self) -> PlatformResult<Vec<AppRecord>> {
        self.inner.list_apps().await
    }

    async fn create_app(&self, name: &str, organization: &str) -> PlatformResult<()> {
        if name == self.faulty_app {
            panic!("simulated reconciler fault");
        }
        self.inner.create_app(name, organization).await
    }

    async fn list_machines(&self, app: &str) -> PlatformResult<Vec<Machine>> {
        self.inner.list_machines(app).await
    }

    async fn destroy_machine(
        &self,
        app: &str,
        machine_id: &str,
        force: bool,
    ) -> PlatformResult<()> {
        self.inner.destroy_machine(app, machine_id, force).await
    }

    async fn run_machine(
        &self,
        app: &str,
        image: &str,
        config: &MachineConfig,
    ) -> PlatformResult<()> {
        self.inner.run_machine(app, image, config).await
    }

    async fn deploy_build(
        &self,
        app: &str,
        source: &str,
        config: &MachineConfig,
    ) -> PlatformResult<()> {
        self.inner.deploy_build(app, source, config).await
    }

    async fn list_volumes(&self, app: &str) -> PlatformResult<Vec<VolumeRecord>> {
        self.inner.list_volumes(app).await
    }

    async fn create_volume(
        &self,
        app: &str,
        name: &str,
        count: u32,
        region: &str,
    ) -> PlatformResult<()> {
        self.inner.create_volume(app, name, count, region).await
    }
}

/// GIVEN a reconciler task that panics
/// WHEN services are reconciled
/// THEN that service reports Internal and the others are unaffected
#[tokio::test]
async fn test_panicking_service_is_isolated() {
    let platform = Arc::new(FaultyPlatform {
        inner: ScriptedPlatform::new(),
        faulty_app: "acme-bad",
    });

    let results = orchestrator(platform)
        .reconcile_all(vec![service("acme-good"), service("acme-bad"), service("acme-other")])
        .await
        .unwrap();

    assert!(results[0].is_success());
    assert_eq!(results[1].service_name, "acme-bad");
    assert_eq!(results[1].error_kinds(), vec![ErrorKind::Internal]);
    assert!(results[2].is_success());
}
