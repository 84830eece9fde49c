//! vmgrid-core — shared types and configuration for the vmgrid control plane.
//!
//! Domain types (`HostCapacity`, `VmRequest`, `RoundInput`, `RoundReport`)
//! are consumed by the engine and the snapshot boundary; `GridConfig`
//! parses the optional `vmgrid.toml` used by the daemon.

pub mod config;
pub mod types;

pub use config::GridConfig;
pub use types::*;
