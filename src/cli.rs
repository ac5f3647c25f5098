//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::SettingsLayer;

/// fly-compose - converge a compose file onto Fly.io
#[derive(Parser, Debug)]
#[command(name = "fly-compose")]
#[command(version)]
#[command(about = "Deploy compose-style services as Fly.io apps, machines and volumes")]
#[command(
    long_about = "fly-compose reads a compose file, compares every service with what Fly.io currently runs, and creates apps and volumes, replaces machines, or deploys builds until each service matches."
)]
pub struct Cli {
    /// Compose file (defaults to compose.yml, then docker-compose.yml)
    #[arg(short, long, global = true)]
    pub file: Option<PathBuf>,

    /// Settings file (defaults to fly-compose.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Maximum services reconciled at once
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// Timeout for a single fly call, in seconds
    #[arg(short, long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// fly binary to invoke
    #[arg(long, global = true, value_name = "PATH")]
    pub fly_bin: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Skip the `fly version` check
    #[arg(long, global = true, default_value_t = false)]
    pub skip_preflight: bool,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Reconcile every service and report the result
    Up,

    /// Show the actions each service needs without executing them
    Plan,

    /// Print the parsed compose file as JSON
    Render,
}

impl Cli {
    /// Settings given on the command line; unset flags leave lower layers alone.
    #[must_use]
    pub fn settings_layer(&self) -> SettingsLayer {
        SettingsLayer {
            fly_bin: self.fly_bin.clone(),
            workers: self.workers,
            call_timeout_secs: self.timeout,
            log_file: self.log_file.clone(),
            skip_preflight: self.skip_preflight.then_some(true),
        }
    }
}
