//! Shared domain types for the vmgrid control plane.
//!
//! These types are the engine's public contract: a `RoundInput` describes
//! the desired state for one reconciliation round, a `RoundReport` is what
//! the round publishes. Everything is serializable because the report is
//! also the wire output written by the daemon.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a physical host.
pub type HostId = String;

/// Unique identifier for a virtual machine.
pub type VmId = String;

// ── Resources ─────────────────────────────────────────────────────

/// Fixed CPU/RAM capacity of a physical host.
///
/// Capacities never change after the host is loaded into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapacity {
    pub cpu: u32,
    pub ram: u64,
}

/// Resource request of a virtual machine.
///
/// Immutable for the lifetime of the VM id; a resized VM arrives as a
/// remove + re-add under a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRequest {
    pub cpu: u32,
    pub ram: u64,
}

// ── Round input ───────────────────────────────────────────────────

/// Incremental change to the desired VM set, as an alternative to
/// resending the full map.
///
/// Ids in `add` take their request sizes from the `virtual_machines` map
/// accompanying the diff; ids absent from that map are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredSetDiff {
    pub add: Vec<VmId>,
    pub remove: Vec<VmId>,
}

/// Desired state consumed by one reconciliation round.
///
/// `hosts` is only meaningful on the first round (host capacities are
/// fixed for the process lifetime). Exactly one of `virtual_machines`
/// (full desired set) or `diff` drives the round; when both are present
/// the diff wins and the map only supplies request sizes for added ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInput {
    pub hosts: BTreeMap<HostId, HostCapacity>,
    pub virtual_machines: Option<BTreeMap<VmId, VmRequest>>,
    pub diff: Option<DesiredSetDiff>,
}

// ── Round report ──────────────────────────────────────────────────

/// A VM moved between hosts within a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub vm: VmId,
    pub from: HostId,
    pub to: HostId,
}

/// Per-host utilization entry in the round report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostUtilization {
    /// Average of CPU-used and RAM-used fractions, in percent.
    pub usage_percentage: f64,
    /// Reporting quality score derived from the utilization fraction.
    pub score: f64,
}

/// Everything one reconciliation round publishes.
///
/// Migrations are per-round, not cumulative; the engine clears its
/// transient migration log after emitting the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub allocations: BTreeMap<HostId, Vec<VmId>>,
    pub allocation_failures: Vec<VmId>,
    pub migrations: Vec<Migration>,
    pub host_utilizations: BTreeMap<HostId, HostUtilization>,
    pub underutilized_hosts: Vec<HostId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_input_defaults_to_empty() {
        let input = RoundInput::default();
        assert!(input.hosts.is_empty());
        assert!(input.virtual_machines.is_none());
        assert!(input.diff.is_none());
    }

    #[test]
    fn report_serializes_with_stable_keys() {
        let mut report = RoundReport::default();
        report
            .allocations
            .insert("h2".to_string(), vec!["vm1".to_string()]);
        report
            .allocations
            .insert("h1".to_string(), vec!["vm2".to_string()]);

        let json = serde_json::to_string(&report).unwrap();
        // BTreeMap keys come out sorted, so reports are byte-stable.
        assert!(json.find("h1").unwrap() < json.find("h2").unwrap());
    }
}
