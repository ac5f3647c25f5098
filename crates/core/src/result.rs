//! Result type definition and extension traits for Railway-Oriented Programming.

use std::fmt::Display;

use crate::error::Error;

/// The standard Result type for fly-compose input handling.
///
/// # Examples
///
/// ```ignore
/// fn read(path: &Path) -> Result<String> {
///     std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for Results whose error is only worth a log line.
pub trait LoggedResultExt<T> {
    /// Convert a Result to an Option, logging the error at warn level if present.
    fn into_option_logged(self, what: &str) -> Option<T>;
}

impl<T, E: Display> LoggedResultExt<T> for std::result::Result<T, E> {
    fn into_option_logged(self, what: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{what} failed");
                None
            }
        }
    }
}

/// Tap-style combinators for side effects on any Result.
pub trait GenericResultExt<T, E> {
    /// Perform a side effect on Ok value without consuming the Result.
    #[must_use]
    fn tap_ok<F: FnOnce(&T)>(self, f: F) -> Self;

    /// Perform a side effect on Err value without consuming the Result.
    #[must_use]
    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self;
}

impl<T, E> GenericResultExt<T, E> for std::result::Result<T, E> {
    fn tap_ok<F: FnOnce(&T)>(self, f: F) -> Self {
        if let Ok(ref v) = self {
            f(v);
        }
        self
    }

    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
