//! Desired-state model for one service.
//!
//! A [`ServiceSpec`] is built once through [`ServiceSpecBuilder`], which applies
//! defaults and validates invariants; it is immutable afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Image used when a service names neither an image nor a build source.
pub const DEFAULT_IMAGE: &str = "alpine";

/// Volume name meaning "the current directory"; such entries are dropped.
pub const CURRENT_DIR_VOLUME: &str = ".";

/// Guest CPU class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuKind {
    #[default]
    Shared,
    Performance,
}

impl CpuKind {
    /// Platform spelling of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Performance => "performance",
        }
    }
}

impl fmt::Display for CpuKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CpuKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "performance" => Ok(Self::Performance),
            other => Err(format!(
                "unknown cpu kind '{other}' (expected 'shared' or 'performance')"
            )),
        }
    }
}

/// Resource shape of every machine of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub kind: CpuKind,
    pub cpu_count: u32,
    pub memory_mb: u32,
    pub replica_count: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            kind: CpuKind::Shared,
            cpu_count: 1,
            memory_mb: 1024,
            replica_count: 1,
        }
    }
}

/// A named volume mounted into every machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

impl VolumeMount {
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
        }
    }
}

/// A published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortMapping {
    #[must_use]
    pub const fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }
}

/// Where a service's app lives on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub organization: String,
    pub region: String,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            organization: "personal".to_string(),
            region: "lhr".to_string(),
        }
    }
}

/// Full machine configuration derived from a [`ServiceSpec`].
///
/// Carried by launch and deploy actions so the executor needs no access
/// back to the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub cpu_kind: CpuKind,
    pub cpus: u32,
    pub memory_mb: u32,
    pub region: String,
    pub environment: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub command: Option<String>,
}

/// Immutable desired state of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    name: String,
    image: String,
    build_source: Option<String>,
    command: Option<String>,
    resources: Resources,
    environment: BTreeMap<String, String>,
    volumes: Vec<VolumeMount>,
    ports: Vec<PortMapping>,
    placement: Placement,
}

impl ServiceSpec {
    /// Start building a spec for the platform-qualified app `name`.
    pub fn builder(name: impl Into<String>) -> ServiceSpecBuilder {
        ServiceSpecBuilder::new(name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    #[must_use]
    pub fn build_source(&self) -> Option<&str> {
        self.build_source.as_deref()
    }

    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    #[must_use]
    pub const fn resources(&self) -> &Resources {
        &self.resources
    }

    #[must_use]
    pub const fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    #[must_use]
    pub fn volumes(&self) -> &[VolumeMount] {
        &self.volumes
    }

    #[must_use]
    pub fn ports(&self) -> &[PortMapping] {
        &self.ports
    }

    #[must_use]
    pub const fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Derive the machine configuration every replica is launched with.
    #[must_use]
    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            cpu_kind: self.resources.kind,
            cpus: self.resources.cpu_count,
            memory_mb: self.resources.memory_mb,
            region: self.placement.region.clone(),
            environment: self.environment.clone(),
            ports: self.ports.clone(),
            volumes: self.volumes.clone(),
            command: self.command.clone(),
        }
    }
}

/// Builder for [`ServiceSpec`].
#[derive(Debug, Clone)]
pub struct ServiceSpecBuilder {
    name: String,
    image: Option<String>,
    build_source: Option<String>,
    command: Option<String>,
    resources: Resources,
    environment: BTreeMap<String, String>,
    volumes: Vec<VolumeMount>,
    ports: Vec<PortMapping>,
    placement: Placement,
}

impl ServiceSpecBuilder {
    /// Create a new builder with default resources and placement.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: None,
            build_source: None,
            command: None,
            resources: Resources::default(),
            environment: BTreeMap::new(),
            volumes: Vec::new(),
            ports: Vec::new(),
            placement: Placement::default(),
        }
    }

    /// Set the prebuilt image reference.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Build and deploy from this source instead of running an image.
    #[must_use]
    pub fn build_source(mut self, source: impl Into<String>) -> Self {
        self.build_source = Some(source.into());
        self
    }

    /// Override the image's command.
    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Set the resource shape.
    #[must_use]
    pub const fn resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    /// Set the number of replicas.
    #[must_use]
    pub const fn replicas(mut self, count: u32) -> Self {
        self.resources.replica_count = count;
        self
    }

    /// Add an environment variable; a repeated key keeps the last value.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Add a volume mount.
    #[must_use]
    pub fn volume(mut self, volume: VolumeMount) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Add a port mapping.
    #[must_use]
    pub fn port(mut self, port: PortMapping) -> Self {
        self.ports.push(port);
        self
    }

    /// Set organization and region.
    #[must_use]
    pub fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Validate and build the spec.
    ///
    /// An empty image falls back to [`DEFAULT_IMAGE`] and volumes named
    /// [`CURRENT_DIR_VOLUME`] are dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSpec` if the name is empty, any resource count is
    /// zero, or a volume has an empty name or mount path.
    pub fn build(self) -> Result<ServiceSpec> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::invalid_spec(name, "service name cannot be empty"));
        }
        if self.resources.replica_count == 0 {
            return Err(Error::invalid_spec(
                name,
                "replica count must be at least 1",
            ));
        }
        if self.resources.cpu_count == 0 {
            return Err(Error::invalid_spec(name, "cpu count must be at least 1"));
        }
        if self.resources.memory_mb == 0 {
            return Err(Error::invalid_spec(name, "memory must be at least 1 MB"));
        }

        let volumes = self
            .volumes
            .into_iter()
            .filter(|volume| volume.name != CURRENT_DIR_VOLUME)
            .collect::<Vec<_>>();
        if let Some(bad) = volumes
            .iter()
            .find(|v| v.name.is_empty() || v.mount_path.is_empty())
        {
            return Err(Error::invalid_spec(
                name,
                format!(
                    "volume '{}:{}' needs both a name and a mount path",
                    bad.name, bad.mount_path
                ),
            ));
        }

        let image = self
            .image
            .filter(|image| !image.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string());

        Ok(ServiceSpec {
            name,
            image,
            build_source: self.build_source.filter(|s| !s.trim().is_empty()),
            command: self.command.filter(|c| !c.trim().is_empty()),
            resources: self.resources,
            environment: self.environment,
            volumes,
            ports: self.ports,
            placement: self.placement,
        })
    }
}
