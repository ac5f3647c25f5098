//! Compose file loading.
//!
//! Turns a compose-style YAML document into validated [`ServiceSpec`]s. A
//! malformed service is set aside as a [`RejectedService`] so the remaining
//! services can still be reconciled.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fly_compose_core::{Error, Result};
use fly_compose_reconciler::{
    CpuKind, Placement, PortMapping, Resources, ServiceSpec, VolumeMount,
};
use itertools::{Either, Itertools};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, info, warn};

/// File names tried, in order, when no compose file is given.
pub const COMPOSE_FILE_CANDIDATES: [&str; 2] = ["compose.yml", "docker-compose.yml"];

/// Everything the compose file asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    pub organization: String,
    pub region: String,
    pub app_name_prefix: Option<String>,
    /// Valid services, in file order.
    pub services: Vec<ServiceSpec>,
    /// Services that could not be turned into a spec.
    pub rejected: Vec<RejectedService>,
}

/// A service whose definition is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedService {
    /// Platform app name the service would have had.
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct ComposeDocument {
    #[serde(default)]
    services: Option<serde_yaml::Mapping>,
    #[serde(default, alias = "fly_organization")]
    organization: Option<String>,
    #[serde(default, alias = "fly_region")]
    region: Option<String>,
    #[serde(default, alias = "fly_preffix_app")]
    app_name_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceEntry {
    image: Option<String>,
    build: Option<String>,
    command: Option<String>,
    environment: BTreeMap<String, Value>,
    volumes: Vec<String>,
    ports: Vec<String>,
    resources: Option<ResourcesEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResourcesEntry {
    kind: Option<String>,
    count: Option<Count>,
    limits: Option<LimitsEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LimitsEntry {
    cpus: Option<Count>,
    memory: Option<Count>,
}

/// A positive count written either as a number or as a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Count {
    Number(u32),
    Text(String),
}

impl Count {
    fn resolve(&self, field: &str) -> std::result::Result<u32, String> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|e| format!("{field} '{text}' is not a whole number: {e}")),
        }
    }
}

/// Find the compose file in `dir`.
///
/// # Errors
///
/// Returns `ComposeFileNotFound` if none of the candidates exist.
pub fn discover(dir: &Path) -> Result<PathBuf> {
    COMPOSE_FILE_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| Error::ComposeFileNotFound {
            candidates: COMPOSE_FILE_CANDIDATES.join(", "),
        })
}

/// Read and parse a compose file.
///
/// # Errors
///
/// Returns error if the file cannot be read or is not a valid compose
/// document. Problems confined to one service are reported in
/// [`DesiredState::rejected`] instead.
pub fn load(path: &Path) -> Result<DesiredState> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    let state = parse(&content, path)?;
    info!(
        path = %path.display(),
        services = state.services.len(),
        rejected = state.rejected.len(),
        "Compose file loaded"
    );
    Ok(state)
}

/// Parse compose YAML; `path` is only used in error messages.
///
/// # Errors
///
/// Returns `YamlParseFailed` if the document is not valid YAML or its
/// top-level keys have the wrong shape.
pub fn parse(content: &str, path: &Path) -> Result<DesiredState> {
    let document: ComposeDocument = serde_yaml::from_str(content)
        .map_err(|e| Error::yaml_parse_failed(path, e.to_string()))?;

    let placement = Placement {
        organization: document
            .organization
            .unwrap_or_else(|| Placement::default().organization),
        region: document
            .region
            .unwrap_or_else(|| Placement::default().region),
    };
    let prefix = document
        .app_name_prefix
        .filter(|prefix| !prefix.trim().is_empty());
    debug!(prefix = ?prefix, organization = %placement.organization, region = %placement.region, "Compose placement");

    let services = document.services.unwrap_or_default();
    if services.is_empty() {
        warn!(path = %path.display(), "Compose file declares no services");
    }

    let (services, rejected) = services.into_iter().partition_map(|(key, value)| {
        let app = app_name(prefix.as_deref(), &key_name(&key));
        match build_spec(&app, value, &placement) {
            Ok(spec) => Either::Left(spec),
            Err(reason) => {
                warn!(service = %app, reason = %reason, "Rejecting malformed service");
                Either::Right(RejectedService { name: app, reason })
            }
        }
    });

    Ok(DesiredState {
        organization: placement.organization,
        region: placement.region,
        app_name_prefix: prefix,
        services,
        rejected,
    })
}

/// Platform app name for a compose service key.
#[must_use]
pub fn app_name(prefix: Option<&str>, service: &str) -> String {
    prefix.map_or_else(|| service.to_string(), |prefix| format!("{prefix}-{service}"))
}

fn key_name(key: &Value) -> String {
    match key {
        Value::String(name) => name.clone(),
        other => serde_yaml::to_string(other)
            .map(|text| text.trim().to_string())
            .unwrap_or_default(),
    }
}

fn build_spec(
    app: &str,
    value: Value,
    placement: &Placement,
) -> std::result::Result<ServiceSpec, String> {
    let entry: ServiceEntry = if value.is_null() {
        ServiceEntry::default()
    } else {
        serde_yaml::from_value(value).map_err(|e| format!("malformed definition: {e}"))?
    };

    let mut builder = ServiceSpec::builder(app)
        .resources(resources(entry.resources.as_ref())?)
        .placement(placement.clone());

    if let Some(image) = entry.image {
        builder = builder.image(image);
    }
    if let Some(build) = entry.build {
        builder = builder.build_source(build);
    }
    if let Some(command) = entry.command {
        builder = builder.command(command);
    }
    for (key, value) in entry.environment {
        builder = builder.env(key.clone(), env_value(&key, &value)?);
    }
    for volume in &entry.volumes {
        builder = builder.volume(parse_volume(volume)?);
    }
    for port in &entry.ports {
        builder = builder.port(parse_port(port)?);
    }

    builder.build().map_err(|e| e.to_string())
}

fn resources(entry: Option<&ResourcesEntry>) -> std::result::Result<Resources, String> {
    let mut resources = Resources::default();
    let Some(entry) = entry else {
        return Ok(resources);
    };

    if let Some(kind) = &entry.kind {
        resources.kind = kind.parse::<CpuKind>()?;
    }
    if let Some(count) = &entry.count {
        resources.replica_count = count.resolve("resources.count")?;
    }
    if let Some(limits) = &entry.limits {
        if let Some(cpus) = &limits.cpus {
            resources.cpu_count = cpus.resolve("limits.cpus")?;
        }
        if let Some(memory) = &limits.memory {
            resources.memory_mb = memory.resolve("limits.memory")?;
        }
    }
    Ok(resources)
}

fn env_value(key: &str, value: &Value) -> std::result::Result<String, String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Ok(String::new()),
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => {
            Err(format!("environment variable '{key}' must be a scalar"))
        }
    }
}

/// Parse a `name:mountPath` volume entry. Trailing segments such as `:ro`
/// are ignored.
fn parse_volume(entry: &str) -> std::result::Result<VolumeMount, String> {
    let mut segments = entry.split(':');
    match (segments.next(), segments.next()) {
        (Some(name), Some(mount_path)) => Ok(VolumeMount::new(name.trim(), mount_path.trim())),
        _ => Err(format!("volume '{entry}' must be written as name:mountPath")),
    }
}

/// Parse a `hostPort:containerPort` port entry.
fn parse_port(entry: &str) -> std::result::Result<PortMapping, String> {
    let (host, container) = entry
        .split_once(':')
        .ok_or_else(|| format!("port '{entry}' must be written as hostPort:containerPort"))?;
    let parse = |text: &str| {
        text.trim()
            .parse::<u16>()
            .map_err(|e| format!("port '{entry}' has an invalid number '{text}': {e}"))
    };
    Ok(PortMapping::new(parse(host)?, parse(container)?))
}
