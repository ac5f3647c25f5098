//! Core types shared by the fly-compose crates.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod error;
pub mod result;

pub use error::Error;
pub use result::{GenericResultExt, LoggedResultExt, Result};
