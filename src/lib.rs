//! # fly-compose
//!
//! Converge compose-style service definitions onto Fly.io apps, machines and
//! volumes.
//!
//! This library holds the binary's surface: CLI, layered settings, compose
//! loading, the `fly` CLI platform client, and run reports. The reconciliation
//! engine itself lives in `fly-compose-reconciler`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

// Re-export workspace crates
pub use fly_compose_core;
pub use fly_compose_reconciler;

pub mod cli;
pub mod compose;
pub mod config;
pub mod flyctl;
pub mod report;
