//! Layered settings for the `fly-compose` binary.
//!
//! ## Hierarchy
//!
//! 1. Built-in defaults
//! 2. TOML settings file (`--config`, else `fly-compose.toml` in the working directory)
//! 3. Environment variables (`FLY_COMPOSE_*`)
//! 4. Command-line flags
//!
//! Later layers override earlier ones field by field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fly_compose_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Settings file looked up in the working directory when `--config` is absent.
pub const SETTINGS_FILE: &str = "fly-compose.toml";

/// Largest worker pool the scheduler can represent.
pub const MAX_WORKERS: usize = tokio::sync::Semaphore::MAX_PERMITS;

pub const ENV_FLY_BIN: &str = "FLY_COMPOSE_FLY_BIN";
pub const ENV_WORKERS: &str = "FLY_COMPOSE_WORKERS";
pub const ENV_TIMEOUT_SECS: &str = "FLY_COMPOSE_TIMEOUT_SECS";
pub const ENV_LOG_FILE: &str = "FLY_COMPOSE_LOG_FILE";

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Program invoked for every platform call.
    pub fly_bin: String,
    /// Maximum services reconciled at once; `None` means one worker per service.
    pub workers: Option<usize>,
    /// Upper bound on a single platform call, in seconds.
    pub call_timeout_secs: u64,
    /// Optional file receiving a copy of the log.
    pub log_file: Option<PathBuf>,
    /// Skip the `fly version` reachability check.
    pub skip_preflight: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fly_bin: "fly".to_string(),
            workers: None,
            call_timeout_secs: 300,
            log_file: None,
            skip_preflight: false,
        }
    }
}

/// One partial layer of settings; unset fields leave the lower layer alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsLayer {
    pub fly_bin: Option<String>,
    pub workers: Option<usize>,
    pub call_timeout_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub skip_preflight: Option<bool>,
}

impl Settings {
    /// Per-call timeout as a duration.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    fn merge(&mut self, layer: SettingsLayer) {
        if let Some(fly_bin) = layer.fly_bin {
            self.fly_bin = fly_bin;
        }
        if let Some(workers) = layer.workers {
            self.workers = Some(workers);
        }
        if let Some(secs) = layer.call_timeout_secs {
            self.call_timeout_secs = secs;
        }
        if let Some(log_file) = layer.log_file {
            self.log_file = Some(log_file);
        }
        if let Some(skip) = layer.skip_preflight {
            self.skip_preflight = skip;
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    fn validate(&self) -> Result<()> {
        if self.fly_bin.trim().is_empty() {
            return Err(Error::invalid_settings("fly_bin must not be empty"));
        }
        match self.workers {
            Some(0) => return Err(Error::invalid_settings("workers must be at least 1")),
            Some(workers) if workers > MAX_WORKERS => {
                return Err(Error::invalid_settings(format!(
                    "workers must be at most {MAX_WORKERS}"
                )));
            }
            _ => {}
        }
        if self.call_timeout_secs == 0 {
            return Err(Error::invalid_settings(
                "call_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Load settings from all sources with hierarchy.
///
/// `env` looks up one environment variable; the binary passes
/// `|key| std::env::var(key).ok()`.
///
/// # Errors
///
/// Returns error if:
/// - An explicit settings file cannot be read
/// - A settings file is malformed TOML or has unknown keys
/// - An environment variable holds an unparsable value
/// - The merged values fail validation
pub fn load_settings<F>(
    explicit: Option<&Path>,
    working_dir: &Path,
    env: F,
    flags: SettingsLayer,
) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    // 1. Start with built-in defaults
    let mut settings = Settings::default();

    // 2. Settings file, explicit or discovered
    let file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(working_dir.join(SETTINGS_FILE)).filter(|path| path.is_file()),
    };
    if let Some(path) = file {
        debug!(path = %path.display(), "Loading settings file");
        settings.merge(load_toml_file(&path)?);
    }

    // 3. Environment variable overrides
    settings.merge(env_layer(&env)?);

    // 4. Command-line flags
    settings.merge(flags);

    settings.validate()?;
    Ok(settings)
}

/// Load a TOML file into a partial settings layer
///
/// # Errors
///
/// Returns error if the file cannot be read or is malformed
fn load_toml_file(path: &Path) -> Result<SettingsLayer> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    toml::from_str(&content).map_err(|e| Error::toml_parse_failed(path, e.to_string()))
}

fn env_layer<F>(env: &F) -> Result<SettingsLayer>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(SettingsLayer {
        fly_bin: env(ENV_FLY_BIN),
        workers: env(ENV_WORKERS)
            .map(|value| parse_env(ENV_WORKERS, &value))
            .transpose()?,
        call_timeout_secs: env(ENV_TIMEOUT_SECS)
            .map(|value| parse_env(ENV_TIMEOUT_SECS, &value))
            .transpose()?,
        log_file: env(ENV_LOG_FILE).map(PathBuf::from),
        skip_preflight: None,
    })
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::invalid_settings(format!("invalid {key} value '{value}': {e}")))
}
