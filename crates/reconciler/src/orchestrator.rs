//! Fan-out of service reconcilers over a bounded worker pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::client::{PlatformClient, bounded};
use crate::error::{Error, ErrorKind, Result};
use crate::reconciler::{PlanPreview, ServiceReconciler};
use crate::shutdown::CancellationHandle;
use crate::spec::ServiceSpec;
use crate::types::{ReconciliationResult, ServiceFailure};

/// Default bound on a single platform call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum services reconciled at once; `None` runs every service at once.
    pub worker_limit: Option<usize>,
    /// Time bound applied to every platform call.
    pub call_timeout: Duration,
    /// Verify the platform is reachable before touching any service.
    pub preflight: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_limit: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            preflight: true,
        }
    }
}

/// Planned actions for one service, or why it could not be planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePlan {
    pub service_name: String,
    pub outcome: std::result::Result<PlanPreview, ServiceFailure>,
}

/// Runs one [`ServiceReconciler`] per service and aggregates the results.
pub struct Orchestrator {
    client: Arc<dyn PlatformClient>,
    config: OrchestratorConfig,
    cancellation: CancellationHandle,
    progress: Option<mpsc::UnboundedSender<ReconciliationResult>>,
}

enum Slot<T> {
    Ready(T),
    Running {
        service_name: String,
        handle: JoinHandle<T>,
    },
}

impl Orchestrator {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Handle that cancels services which have not started yet.
    #[must_use]
    pub fn cancellation(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Check the platform is reachable.
    ///
    /// # Errors
    ///
    /// Returns `PlatformUnavailable` if the check fails or times out.
    pub async fn preflight(&self) -> Result<()> {
        bounded(self.config.call_timeout, "preflight", self.client.preflight())
            .await
            .map_err(|e| Error::platform_unavailable(e.to_string()))
    }

    /// Never more workers than services; a pool always has at least one slot.
    fn worker_count(&self, services: usize) -> usize {
        self.config
            .worker_limit
            .map_or(services, |limit| limit.min(services))
            .clamp(1, Semaphore::MAX_PERMITS)
    }

    /// Reconcile every service and return one result per input, in input order.
    ///
    /// Services run concurrently up to the worker limit. A failing, hung or
    /// panicking service never affects the others. A later service whose
    /// platform name repeats an earlier one is rejected with
    /// `ConfigurationError` without touching the platform.
    ///
    /// # Errors
    ///
    /// Returns `PlatformUnavailable` if the pre-flight check is enabled and
    /// fails; no service is reconciled in that case.
    pub async fn reconcile_all(
        &self,
        specs: Vec<ServiceSpec>,
    ) -> Result<Vec<ReconciliationResult>> {
        if self.config.preflight {
            self.preflight().await?;
        }

        let workers = self.worker_count(specs.len());
        info!(services = specs.len(), workers, "Reconciling services");

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut seen = HashSet::new();

        let slots = specs
            .into_iter()
            .map(|spec| {
                let service_name = spec.name().to_string();
                if !seen.insert(service_name.clone()) {
                    let result = duplicate(&service_name);
                    self.report_progress(&result);
                    return Slot::Ready(result);
                }

                let client = Arc::clone(&self.client);
                let semaphore = Arc::clone(&semaphore);
                let cancellation = self.cancellation.clone();
                let progress = self.progress.clone();
                let call_timeout = self.config.call_timeout;

                let handle = tokio::spawn(async move {
                    let name = spec.name().to_string();
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            if let Some(signal) = cancellation.signal() {
                                debug!(
                                    service = %name,
                                    signal = %signal,
                                    "Skipping service after cancellation"
                                );
                                ReconciliationResult::aborted(
                                    name,
                                    ErrorKind::Cancelled,
                                    format!("run cancelled ({signal}) before the service started"),
                                )
                            } else {
                                ServiceReconciler::new(spec, client, call_timeout)
                                    .with_cancellation(cancellation)
                                    .run()
                                    .await
                            }
                        }
                        Err(e) => ReconciliationResult::aborted(
                            name,
                            ErrorKind::Internal,
                            format!("worker pool closed: {e}"),
                        ),
                    };
                    if let Some(progress) = progress {
                        send_progress(&progress, &result);
                    }
                    result
                });

                Slot::Running {
                    service_name,
                    handle,
                }
            })
            .collect::<Vec<_>>();

        let results = join_all(slots.into_iter().map(|slot| async move {
            match slot {
                Slot::Ready(result) => result,
                Slot::Running {
                    service_name,
                    handle,
                } => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        let result = faulted(&service_name, &e);
                        self.report_progress(&result);
                        result
                    }
                },
            }
        }))
        .await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            services = results.len(),
            failed, "Reconciliation run complete"
        );

        Ok(results)
    }

    /// Query and plan every service without executing anything.
    ///
    /// # Errors
    ///
    /// Returns `PlatformUnavailable` if the pre-flight check is enabled and
    /// fails.
    pub async fn preview_all(&self, specs: Vec<ServiceSpec>) -> Result<Vec<ServicePlan>> {
        if self.config.preflight {
            self.preflight().await?;
        }

        let semaphore = Arc::new(Semaphore::new(self.worker_count(specs.len())));
        let mut seen = HashSet::new();

        let slots = specs
            .into_iter()
            .map(|spec| {
                let service_name = spec.name().to_string();
                if !seen.insert(service_name.clone()) {
                    return Slot::Ready(ServicePlan {
                        outcome: Err(duplicate_failure(&service_name)),
                        service_name,
                    });
                }

                let client = Arc::clone(&self.client);
                let semaphore = Arc::clone(&semaphore);
                let call_timeout = self.config.call_timeout;
                let name = service_name.clone();

                let handle = tokio::spawn(async move {
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            ServiceReconciler::new(spec, client, call_timeout)
                                .preview()
                                .await
                        }
                        Err(e) => Err(ServiceFailure::new(
                            ErrorKind::Internal,
                            format!("worker pool closed: {e}"),
                        )),
                    };
                    ServicePlan {
                        service_name: name,
                        outcome,
                    }
                });

                Slot::Running {
                    service_name,
                    handle,
                }
            })
            .collect::<Vec<_>>();

        Ok(join_all(slots.into_iter().map(|slot| async move {
            match slot {
                Slot::Ready(plan) => plan,
                Slot::Running {
                    service_name,
                    handle,
                } => handle.await.unwrap_or_else(|e| ServicePlan {
                    outcome: Err(fault_failure(&service_name, &e)),
                    service_name,
                }),
            }
        }))
        .await)
    }

    fn report_progress(&self, result: &ReconciliationResult) {
        if let Some(progress) = &self.progress {
            send_progress(progress, result);
        }
    }
}

fn send_progress(
    progress: &mpsc::UnboundedSender<ReconciliationResult>,
    result: &ReconciliationResult,
) {
    if progress.send(result.clone()).is_err() {
        debug!(service = %result.service_name, "Progress receiver dropped");
    }
}

fn duplicate_failure(service_name: &str) -> ServiceFailure {
    ServiceFailure::new(
        ErrorKind::ConfigurationError,
        format!("app name '{service_name}' is already used by another service in this run"),
    )
}

fn duplicate(service_name: &str) -> ReconciliationResult {
    warn!(service = %service_name, "Rejecting service with duplicate app name");
    ReconciliationResult {
        aborted: Some(duplicate_failure(service_name)),
        ..ReconciliationResult::new(service_name)
    }
}

fn fault_failure(service_name: &str, e: &JoinError) -> ServiceFailure {
    error!(service = %service_name, error = %e, "Reconciler task faulted");
    ServiceFailure::new(ErrorKind::Internal, format!("reconciler task faulted: {e}"))
}

fn faulted(service_name: &str, e: &JoinError) -> ReconciliationResult {
    ReconciliationResult {
        aborted: Some(fault_failure(service_name, e)),
        ..ReconciliationResult::new(service_name)
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    client: Option<Arc<dyn PlatformClient>>,
    config: OrchestratorConfig,
    cancellation: CancellationHandle,
    progress: Option<mpsc::UnboundedSender<ReconciliationResult>>,
}

impl OrchestratorBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: None,
            config: OrchestratorConfig::default(),
            cancellation: CancellationHandle::new(),
            progress: None,
        }
    }

    /// Set the platform client.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the worker limit.
    #[must_use]
    pub const fn worker_limit(mut self, limit: Option<usize>) -> Self {
        self.config.worker_limit = limit;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Enable/disable the pre-flight check.
    #[must_use]
    pub const fn preflight(mut self, enabled: bool) -> Self {
        self.config.preflight = enabled;
        self
    }

    /// Share a cancellation handle with the caller.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Receive each result as soon as its service finishes.
    #[must_use]
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<ReconciliationResult>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if no client was set, the worker limit is zero
    /// or above the semaphore's permit ceiling, or the call timeout is zero.
    pub fn build(self) -> Result<Orchestrator> {
        let client = self
            .client
            .ok_or_else(|| Error::invalid_config("platform client is required"))?;

        match self.config.worker_limit {
            Some(0) => return Err(Error::invalid_config("worker limit must be at least 1")),
            Some(limit) if limit > Semaphore::MAX_PERMITS => {
                return Err(Error::invalid_config(format!(
                    "worker limit must be at most {}",
                    Semaphore::MAX_PERMITS
                )));
            }
            _ => {}
        }
        if self.config.call_timeout.is_zero() {
            return Err(Error::invalid_config("call timeout must be greater than zero"));
        }

        Ok(Orchestrator {
            client,
            config: self.config,
            cancellation: self.cancellation,
            progress: self.progress,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
