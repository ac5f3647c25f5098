//! Boundary to the compute platform.
//!
//! The reconciler only depends on this contract. Responses are decoded into
//! typed records here so a malformed payload fails at the boundary instead of
//! deep inside planning.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult};
use crate::spec::MachineConfig;

/// An app as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    #[serde(alias = "Name")]
    pub name: String,
}

/// A machine as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(default)]
    pub state: String,
}

impl Machine {
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
        }
    }
}

/// A volume as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    #[serde(alias = "Name")]
    pub name: String,
}

/// Operations the reconciler issues against the platform.
///
/// Implementations must never panic across this boundary; every failure is a
/// [`PlatformError`].
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Check that the platform can be reached at all.
    async fn preflight(&self) -> PlatformResult<()> {
        Ok(())
    }

    async fn list_apps(&self) -> PlatformResult<Vec<AppRecord>>;

    async fn create_app(&self, name: &str, organization: &str) -> PlatformResult<()>;

    async fn list_machines(&self, app: &str) -> PlatformResult<Vec<Machine>>;

    async fn destroy_machine(&self, app: &str, machine_id: &str, force: bool)
    -> PlatformResult<()>;

    async fn run_machine(&self, app: &str, image: &str, config: &MachineConfig)
    -> PlatformResult<()>;

    async fn deploy_build(&self, app: &str, source: &str, config: &MachineConfig)
    -> PlatformResult<()>;

    async fn list_volumes(&self, app: &str) -> PlatformResult<Vec<VolumeRecord>>;

    async fn create_volume(
        &self,
        app: &str,
        name: &str,
        count: u32,
        region: &str,
    ) -> PlatformResult<()>;
}

/// Run a platform call with an upper time bound.
///
/// # Errors
///
/// Returns the call's own error, or a `Timeout` platform error if `limit`
/// elapses first.
pub async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> PlatformResult<T>
where
    F: Future<Output = PlatformResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(PlatformError::timeout(operation, limit)))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::indexing_slicing)]

    use super::*;
    use crate::error::PlatformErrorKind;

    #[test]
    fn test_machine_decodes_platform_json() {
        let raw = r#"[{"id":"148e","state":"started","region":"lhr"},{"id":"9080"}]"#;
        let machines: Vec<Machine> = serde_json::from_str(raw).unwrap();
        assert_eq!(machines[0], Machine::new("148e", "started"));
        assert_eq!(machines[1].state, "");
    }

    #[test]
    fn test_app_record_accepts_capitalised_name() {
        let raw = r#"[{"ID":"x","Name":"acme-web","Status":"deployed"}]"#;
        let apps: Vec<AppRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(apps[0].name, "acme-web");
    }

    #[test]
    fn test_volume_without_name_is_rejected() {
        let raw = r#"[{"id":"vol_1"}]"#;
        assert!(serde_json::from_str::<Vec<VolumeRecord>>(raw).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result: PlatformResult<()> =
            bounded(Duration::from_millis(50), "list apps", std::future::pending()).await;
        assert_eq!(result.unwrap_err().kind, PlatformErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let result = bounded(Duration::from_secs(1), "list apps", async { Ok(3) }).await;
        assert_eq!(result, Ok(3));
    }
}
