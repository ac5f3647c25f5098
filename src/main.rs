//! # fly-compose
//!
//! Entry point: reads the compose file and drives one reconciliation run.
//!
//! ## Sequence
//!
//! 1. **Settings** - defaults, settings file, environment, then flags
//! 2. **Logging** - stderr, plus an optional plain-text log file
//! 3. **Compose file** - discovered or given with `--file`
//! 4. **Run** - `up`, `plan` or `render`
//!
//! ## Shutdown
//!
//! The first Ctrl+C (or SIGTERM) raises cancellation: calls already in flight
//! finish, every action not yet issued is reported as cancelled. A second
//! signal exits immediately.
//!
//! ## Exit status
//!
//! `0` only if every service reconciled (or planned) without failure.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fly_compose::cli::{Cli, Commands};
use fly_compose::compose::{self, DesiredState};
use fly_compose::config::{Settings, load_settings};
use fly_compose::flyctl::FlyCli;
use fly_compose::report;
use fly_compose_reconciler::{
    CancellationHandle, ErrorKind, Orchestrator, OrchestratorBuilder, ReconciliationResult,
    ShutdownSignal,
};

/// Exit status after a forced shutdown (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let working_dir = std::env::current_dir().context("Failed to get current directory")?;
    let settings = load_settings(
        cli.config.as_deref(),
        &working_dir,
        |key| std::env::var(key).ok(),
        cli.settings_layer(),
    )
    .context("Failed to load settings")?;

    init_tracing(cli.verbose, settings.log_file.as_deref())?;

    let compose_path = match &cli.file {
        Some(path) => path.clone(),
        None => compose::discover(&working_dir)?,
    };
    let desired = compose::load(&compose_path)
        .with_context(|| format!("Failed to load {}", compose_path.display()))?;

    match cli.command {
        Commands::Render => {
            println!("{}", serde_json::to_string_pretty(&desired)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Plan => plan(&settings, desired).await,
        Commands::Up => up(&settings, desired).await,
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_layer = log_file
        .map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))
                .map(|file| fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        })
        .transpose()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn orchestrator(settings: &Settings) -> OrchestratorBuilder {
    Orchestrator::builder()
        .with_client(Arc::new(FlyCli::new(settings.fly_bin.clone())))
        .worker_limit(settings.workers)
        .call_timeout(settings.call_timeout())
        .preflight(!settings.skip_preflight)
}

fn rejected_results(desired: &DesiredState) -> Vec<ReconciliationResult> {
    desired
        .rejected
        .iter()
        .map(|rejected| {
            ReconciliationResult::aborted(
                rejected.name.clone(),
                ErrorKind::ConfigurationError,
                rejected.reason.clone(),
            )
        })
        .collect()
}

async fn up(settings: &Settings, desired: DesiredState) -> Result<ExitCode> {
    let cancellation = CancellationHandle::new();
    spawn_signal_handler(cancellation.clone());

    let mut results = rejected_results(&desired);
    let total = results.len().saturating_add(desired.services.len());
    for (done, result) in (1..).zip(&results) {
        println!("{}", report::progress_line(done, total, result));
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<ReconciliationResult>();
    let mut done = results.len();
    let progress = tokio::spawn(async move {
        while let Some(result) = rx.recv().await {
            done = done.saturating_add(1);
            println!("{}", report::progress_line(done, total, &result));
        }
    });

    let orchestrator = orchestrator(settings)
        .with_cancellation(cancellation)
        .with_progress(tx)
        .build()
        .context("Failed to configure orchestrator")?;

    info!(services = total, "Starting reconciliation");
    let reconciled = orchestrator
        .reconcile_all(desired.services)
        .await
        .context("Reconciliation could not start")?;
    drop(orchestrator);
    if let Err(e) = progress.await {
        error!(error = %e, "Progress reporter failed");
    }
    results.extend(reconciled);

    print!("{}", report::summarize(&results));
    Ok(exit_code(report::all_succeeded(&results)))
}

async fn plan(settings: &Settings, desired: DesiredState) -> Result<ExitCode> {
    let rejected = rejected_results(&desired);

    let plans = orchestrator(settings)
        .build()
        .context("Failed to configure orchestrator")?
        .preview_all(desired.services)
        .await
        .context("Planning could not start")?;

    print!("{}", report::render_plans(&plans));
    for result in &rejected {
        if let Some(failure) = &result.aborted {
            println!("{}: cannot plan: {failure}", result.service_name);
        }
    }

    let all_planned = rejected.is_empty() && plans.iter().all(|plan| plan.outcome.is_ok());
    Ok(exit_code(all_planned))
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Raise cancellation on the first SIGINT or SIGTERM; a second signal exits at once.
fn spawn_signal_handler(cancellation: CancellationHandle) {
    tokio::spawn(watch_signals(cancellation));
}

fn on_signal(cancellation: &CancellationHandle, received: ShutdownSignal) {
    if cancellation.cancel(received) {
        info!(signal = %received, "Letting in-flight calls finish, press Ctrl+C again to exit now");
    } else {
        error!(signal = %received, "Second shutdown signal, exiting immediately");
        std::process::exit(EXIT_INTERRUPTED);
    }
}

#[cfg(unix)]
async fn watch_signals(cancellation: CancellationHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                return;
            }
        };

    loop {
        let received = tokio::select! {
            _ = sigterm.recv() => ShutdownSignal::Terminate,
            _ = sigint.recv() => ShutdownSignal::Interrupt,
        };
        on_signal(&cancellation, received);
    }
}

#[cfg(not(unix))]
async fn watch_signals(cancellation: CancellationHandle) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        on_signal(&cancellation, ShutdownSignal::Interrupt);
    }
}
