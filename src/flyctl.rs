//! [`PlatformClient`] backed by the `fly` command-line tool.

use std::process::Stdio;

use async_trait::async_trait;
use fly_compose_core::GenericResultExt;
use fly_compose_reconciler::{
    AppRecord, Machine, MachineConfig, PlatformClient, PlatformError, PlatformResult,
    VolumeRecord,
};
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs `fly` subcommands and decodes their JSON output.
#[derive(Debug, Clone)]
pub struct FlyCli {
    program: String,
}

impl FlyCli {
    /// Create a client invoking `program` (usually `fly`).
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run one subcommand and return its stdout.
    async fn run(&self, args: Vec<String>) -> PlatformResult<String> {
        let command_line = format!("{} {}", self.program, args.join(" "));
        info!(command = %command_line, "Executing command");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PlatformError::unavailable(format!("'{}' not found on PATH", self.program))
                } else {
                    PlatformError::unavailable(format!("failed to run '{command_line}': {e}"))
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            debug!(command = %command_line, stdout = %stdout.trim(), "Command executed");
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PlatformError::command_failed(format!(
                "'{command_line}' exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }

    /// Run a listing subcommand and decode its JSON array.
    async fn run_list<T: DeserializeOwned>(&self, args: Vec<String>) -> PlatformResult<Vec<T>> {
        let stdout = self.run(args).await?;
        decode_list(&stdout).tap_err(|e| {
            debug!(error = %e, body = %stdout.trim(), "Could not decode fly output");
        })
    }
}

/// Decode a JSON array; an empty body or `null` is an empty list.
fn decode_list<T: DeserializeOwned>(stdout: &str) -> PlatformResult<Vec<T>> {
    let body = stdout.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Option<Vec<T>>>(body)
        .map(Option::unwrap_or_default)
        .map_err(|e| PlatformError::invalid_response(format!("unexpected JSON from fly: {e}")))
}

fn args<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(ToString::to_string).collect()
}

/// Guest, environment, port and volume flags shared by `machine run` and `deploy`.
fn machine_args(app: &str, config: &MachineConfig, ports: bool, region: bool) -> Vec<String> {
    let mut out = args([
        "--app",
        app,
        "--vm-cpu-kind",
        config.cpu_kind.as_str(),
    ]);
    out.extend([
        "--vm-cpus".to_string(),
        config.cpus.to_string(),
        "--vm-memory".to_string(),
        config.memory_mb.to_string(),
    ]);
    if region {
        out.extend(["--region".to_string(), config.region.clone()]);
    }
    for (key, value) in &config.environment {
        out.extend(["--env".to_string(), format!("{key}={value}")]);
    }
    if ports {
        for port in &config.ports {
            out.extend(["--port".to_string(), format!("{}/tcp", port.container_port)]);
        }
    }
    for volume in &config.volumes {
        out.extend([
            "--volume".to_string(),
            format!("{}:{}", volume.name, volume.mount_path),
        ]);
    }
    out
}

/// Full `machine run` argument list. A command override goes after `--` as
/// positional args, one per whitespace-separated word.
fn run_machine_args(app: &str, image: &str, config: &MachineConfig) -> Vec<String> {
    let mut out = args(["machine", "run", image]);
    out.extend(machine_args(app, config, true, true));
    if let Some(cmd) = &config.command {
        out.push("--".to_string());
        out.extend(cmd.split_whitespace().map(ToString::to_string));
    }
    out
}

#[async_trait]
impl PlatformClient for FlyCli {
    async fn preflight(&self) -> PlatformResult<()> {
        self.run(args(["version"]))
            .await
            .tap_ok(|version| info!(version = %version.trim(), "fly CLI available"))
            .map(drop)
            .map_err(|e| PlatformError::unavailable(format!("fly CLI not usable: {e}")))
    }

    async fn list_apps(&self) -> PlatformResult<Vec<AppRecord>> {
        self.run_list(args(["apps", "list", "--json"])).await
    }

    async fn create_app(&self, name: &str, organization: &str) -> PlatformResult<()> {
        self.run(args(["apps", "create", name, "--org", organization]))
            .await
            .map(drop)
    }

    async fn list_machines(&self, app: &str) -> PlatformResult<Vec<Machine>> {
        self.run_list(args(["machine", "list", "--app", app, "--json"]))
            .await
    }

    async fn destroy_machine(
        &self,
        app: &str,
        machine_id: &str,
        force: bool,
    ) -> PlatformResult<()> {
        let mut command = args(["machine", "destroy", machine_id, "--app", app]);
        if force {
            command.push("--force".to_string());
        }
        self.run(command).await.map(drop)
    }

    async fn run_machine(
        &self,
        app: &str,
        image: &str,
        config: &MachineConfig,
    ) -> PlatformResult<()> {
        self.run(run_machine_args(app, image, config))
            .await
            .map(drop)
    }

    async fn deploy_build(
        &self,
        app: &str,
        source: &str,
        config: &MachineConfig,
    ) -> PlatformResult<()> {
        let mut command = args(["deploy", source]);
        command.extend(machine_args(app, config, false, false));
        self.run(command).await.map(drop)
    }

    async fn list_volumes(&self, app: &str) -> PlatformResult<Vec<VolumeRecord>> {
        self.run_list(args(["volumes", "list", "--app", app, "--json"]))
            .await
    }

    async fn create_volume(
        &self,
        app: &str,
        name: &str,
        count: u32,
        region: &str,
    ) -> PlatformResult<()> {
        let mut command = args(["volumes", "create", name, "--app", app]);
        command.extend([
            "--count".to_string(),
            count.to_string(),
            "--region".to_string(),
            region.to_string(),
            "--yes".to_string(),
            "--json".to_string(),
        ]);
        self.run(command).await.map(drop)
    }
}
