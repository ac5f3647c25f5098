//! In-memory platform for tests.
//!
//! [`ScriptedPlatform`] keeps apps, machines and volumes in memory, records
//! every call, and can be told to fail, stall, or block specific calls.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{AppRecord, Machine, PlatformClient, VolumeRecord};
use crate::error::{PlatformError, PlatformResult};
use crate::spec::MachineConfig;

/// Platform operations, as recorded and scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Preflight,
    ListApps,
    CreateApp,
    ListMachines,
    DestroyMachine,
    RunMachine,
    DeployBuild,
    ListVolumes,
    CreateVolume,
}

/// One call received by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: Operation,
    /// App the call targeted; empty for app-independent calls.
    pub app: String,
    /// Operation-specific argument (machine id, image, volume name...).
    pub detail: String,
}

#[derive(Debug, Clone)]
enum Effect {
    Fail(PlatformError),
    Delay(Duration),
    Block,
}

#[derive(Debug, Clone)]
struct Rule {
    operation: Operation,
    app: Option<String>,
    /// 1-based occurrence the rule applies to; `None` applies to every call.
    nth: Option<usize>,
    effect: Effect,
}

impl Rule {
    fn matches(&self, operation: Operation, app: &str, occurrence: usize) -> bool {
        self.operation == operation
            && self.app.as_deref().is_none_or(|wanted| wanted == app)
            && self.nth.is_none_or(|nth| nth == occurrence)
    }
}

#[derive(Debug, Default)]
struct State {
    apps: BTreeSet<String>,
    machines: BTreeMap<String, Vec<Machine>>,
    volumes: BTreeMap<String, Vec<String>>,
    next_machine: u64,
    calls: Vec<RecordedCall>,
    occurrences: HashMap<(Operation, Option<String>), usize>,
}

/// Scriptable in-memory [`PlatformClient`].
#[derive(Debug, Default)]
pub struct ScriptedPlatform {
    state: Mutex<State>,
    rules: Vec<Rule>,
}

impl ScriptedPlatform {
    /// Create an empty platform that accepts every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing app.
    #[must_use]
    pub fn with_app(self, app: &str) -> Self {
        self.lock().apps.insert(app.to_string());
        self
    }

    /// Seed a running machine (the app is seeded too).
    #[must_use]
    pub fn with_machine(self, app: &str, machine_id: &str) -> Self {
        {
            let mut state = self.lock();
            state.apps.insert(app.to_string());
            state
                .machines
                .entry(app.to_string())
                .or_default()
                .push(Machine::new(machine_id, "started"));
        }
        self
    }

    /// Seed a volume (the app is seeded too).
    #[must_use]
    pub fn with_volume(self, app: &str, volume: &str) -> Self {
        {
            let mut state = self.lock();
            state.apps.insert(app.to_string());
            state
                .volumes
                .entry(app.to_string())
                .or_default()
                .push(volume.to_string());
        }
        self
    }

    /// Fail every call of `operation`.
    #[must_use]
    pub fn fail_always(self, operation: Operation, error: PlatformError) -> Self {
        self.rule(operation, None, None, Effect::Fail(error))
    }

    /// Fail every call of `operation` against `app`.
    #[must_use]
    pub fn fail_for(self, operation: Operation, app: &str, error: PlatformError) -> Self {
        self.rule(operation, Some(app), None, Effect::Fail(error))
    }

    /// Fail only the `nth` (1-based) call of `operation` against `app`.
    #[must_use]
    pub fn fail_nth_for(
        self,
        operation: Operation,
        app: &str,
        nth: usize,
        error: PlatformError,
    ) -> Self {
        self.rule(operation, Some(app), Some(nth), Effect::Fail(error))
    }

    /// Make every call of `operation` against `app` take `delay`.
    #[must_use]
    pub fn delay_for(self, operation: Operation, app: &str, delay: Duration) -> Self {
        self.rule(operation, Some(app), None, Effect::Delay(delay))
    }

    /// Make every call of `operation` against `app` never return.
    #[must_use]
    pub fn block_for(self, operation: Operation, app: &str) -> Self {
        self.rule(operation, Some(app), None, Effect::Block)
    }

    fn rule(
        mut self,
        operation: Operation,
        app: Option<&str>,
        nth: Option<usize>,
        effect: Effect,
    ) -> Self {
        self.rules.push(Rule {
            operation,
            app: app.map(ToString::to_string),
            nth,
            effect,
        });
        self
    }

    /// Every call received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of one operation.
    #[must_use]
    pub fn calls_of(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Whether the app exists.
    #[must_use]
    pub fn has_app(&self, app: &str) -> bool {
        self.lock().apps.contains(app)
    }

    /// Machines currently running for an app.
    #[must_use]
    pub fn machines(&self, app: &str) -> Vec<Machine> {
        self.lock().machines.get(app).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and apply whatever the script says about it.
    async fn enter(&self, operation: Operation, app: &str, detail: &str) -> PlatformResult<()> {
        let effects = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                operation,
                app: app.to_string(),
                detail: detail.to_string(),
            });
            let per_app = bump(&mut state.occurrences, (operation, Some(app.to_string())));
            let global = bump(&mut state.occurrences, (operation, None));

            self.rules
                .iter()
                .filter(|rule| {
                    let occurrence = if rule.app.is_some() { per_app } else { global };
                    rule.matches(operation, app, occurrence)
                })
                .map(|rule| rule.effect.clone())
                .collect::<Vec<_>>()
        };

        for effect in &effects {
            if let Effect::Delay(delay) = effect {
                tokio::time::sleep(*delay).await;
            }
        }
        if effects.iter().any(|effect| matches!(effect, Effect::Block)) {
            std::future::pending::<()>().await;
        }
        effects
            .into_iter()
            .find_map(|effect| match effect {
                Effect::Fail(error) => Some(error),
                Effect::Delay(_) | Effect::Block => None,
            })
            .map_or(Ok(()), Err)
    }

    fn launch(&self, app: &str) {
        let mut state = self.lock();
        state.next_machine = state.next_machine.saturating_add(1);
        let id = format!("m{}", state.next_machine);
        state
            .machines
            .entry(app.to_string())
            .or_default()
            .push(Machine::new(id, "started"));
    }
}

fn bump(
    counters: &mut HashMap<(Operation, Option<String>), usize>,
    key: (Operation, Option<String>),
) -> usize {
    let counter = counters.entry(key).or_insert(0);
    *counter = counter.saturating_add(1);
    *counter
}

#[async_trait]
impl PlatformClient for ScriptedPlatform {
    async fn preflight(&self) -> PlatformResult<()> {
        self.enter(Operation::Preflight, "", "").await
    }

    async fn list_apps(&self) -> PlatformResult<Vec<AppRecord>> {
        self.enter(Operation::ListApps, "", "").await?;
        Ok(self
            .lock()
            .apps
            .iter()
            .map(|name| AppRecord { name: name.clone() })
            .collect())
    }

    async fn create_app(&self, name: &str, organization: &str) -> PlatformResult<()> {
        self.enter(Operation::CreateApp, name, organization).await?;
        self.lock().apps.insert(name.to_string());
        Ok(())
    }

    async fn list_machines(&self, app: &str) -> PlatformResult<Vec<Machine>> {
        self.enter(Operation::ListMachines, app, "").await?;
        Ok(self.machines(app))
    }

    async fn destroy_machine(
        &self,
        app: &str,
        machine_id: &str,
        _force: bool,
    ) -> PlatformResult<()> {
        self.enter(Operation::DestroyMachine, app, machine_id).await?;
        let mut state = self.lock();
        let machines = state.machines.entry(app.to_string()).or_default();
        let before = machines.len();
        machines.retain(|machine| machine.id != machine_id);
        if machines.len() == before {
            return Err(PlatformError::command_failed(format!(
                "machine {machine_id} not found in {app}"
            )));
        }
        Ok(())
    }

    async fn run_machine(
        &self,
        app: &str,
        image: &str,
        _config: &MachineConfig,
    ) -> PlatformResult<()> {
        self.enter(Operation::RunMachine, app, image).await?;
        self.launch(app);
        Ok(())
    }

    async fn deploy_build(
        &self,
        app: &str,
        source: &str,
        _config: &MachineConfig,
    ) -> PlatformResult<()> {
        self.enter(Operation::DeployBuild, app, source).await?;
        self.launch(app);
        Ok(())
    }

    async fn list_volumes(&self, app: &str) -> PlatformResult<Vec<VolumeRecord>> {
        self.enter(Operation::ListVolumes, app, "").await?;
        Ok(self
            .lock()
            .volumes
            .get(app)
            .map(|names| {
                names
                    .iter()
                    .map(|name| VolumeRecord { name: name.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_volume(
        &self,
        app: &str,
        name: &str,
        count: u32,
        _region: &str,
    ) -> PlatformResult<()> {
        self.enter(Operation::CreateVolume, app, name).await?;
        let mut state = self.lock();
        let volumes = state.volumes.entry(app.to_string()).or_default();
        volumes.extend((0..count).map(|_| name.to_string()));
        Ok(())
    }
}
