//! Error types for the reconciler crate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for calls across the platform boundary.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A service spec failed validation at construction time.
    InvalidSpec { service: String, reason: String },
    /// The platform could not be reached during the pre-flight check.
    PlatformUnavailable { reason: String },
    /// Invalid orchestrator configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSpec { service, reason } => {
                write!(f, "invalid service spec '{service}': {reason}")
            }
            Self::PlatformUnavailable { reason } => {
                write!(f, "platform unavailable: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create an invalid spec error.
    pub fn invalid_spec(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a platform unavailable error.
    pub fn platform_unavailable(reason: impl Into<String>) -> Self {
        Self::PlatformUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// How a platform call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformErrorKind {
    /// The platform (or its CLI) could not be reached or executed.
    Unavailable,
    /// The platform rejected the operation.
    CommandFailed,
    /// The call did not finish within its time bound.
    Timeout,
    /// The platform answered with a payload that does not match the expected record.
    InvalidResponse,
}

impl fmt::Display for PlatformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unavailable => "unavailable",
            Self::CommandFailed => "command failed",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid response",
        };
        f.write_str(label)
    }
}

/// Structured failure returned by every `PlatformClient` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for PlatformError {}

impl PlatformError {
    /// Create a platform error of the given kind.
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The platform could not be reached.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Unavailable, message)
    }

    /// The platform rejected the operation.
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::CommandFailed, message)
    }

    /// The response could not be decoded.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::InvalidResponse, message)
    }

    /// The call exceeded its time bound.
    pub fn timeout(operation: &str, limit: Duration) -> Self {
        Self::new(
            PlatformErrorKind::Timeout,
            format!("{operation} did not complete within {limit:?}"),
        )
    }
}

/// Classification of a failure recorded in a reconciliation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Could not reach or execute against the platform.
    PlatformUnavailable,
    /// The app could not be created; the rest of the plan was skipped.
    AppCreationFailed,
    /// A volume could not be created; it stays absent.
    VolumeCreationFailed,
    /// A stale machine could not be destroyed; it persists until the next run.
    MachineDestroyFailed,
    /// A replica (or the build deploy) failed to launch.
    LaunchFailed,
    /// The desired-state input for the service is malformed.
    ConfigurationError,
    /// The run was cancelled before the service started.
    Cancelled,
    /// The reconciler task itself faulted.
    Internal,
}

impl ErrorKind {
    /// Whether this kind stops the remaining plan of its service.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::AppCreationFailed | Self::ConfigurationError)
    }

    /// Stable label for reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlatformUnavailable => "PlatformUnavailable",
            Self::AppCreationFailed => "AppCreationFailed",
            Self::VolumeCreationFailed => "VolumeCreationFailed",
            Self::MachineDestroyFailed => "MachineDestroyFailed",
            Self::LaunchFailed => "LaunchFailed",
            Self::ConfigurationError => "ConfigurationError",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
