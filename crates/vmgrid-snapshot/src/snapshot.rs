//! Snapshot wire formats and validation.
//!
//! The raw types mirror the JSON shapes on disk. Resource fields are
//! deserialized as `i64` so a negative capacity or request is rejected
//! with a clear error instead of wrapping into a huge unsigned value;
//! conversion into the engine's `RoundInput` does the range checks.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use vmgrid_core::{DesiredSetDiff, HostCapacity, RoundInput, RoundReport, VmRequest};

use crate::error::{SnapshotError, SnapshotResult};

// ── Raw wire types ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct RawResource {
    pub cpu: i64,
    pub ram: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RawSnapshot {
    #[serde(default)]
    pub hosts: BTreeMap<String, RawResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_machines: Option<BTreeMap<String, RawResource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<RawDiff>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RawDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add: Option<RawDiffSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<RawDiffSet>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RawDiffSet {
    #[serde(default)]
    pub virtual_machines: Vec<String>,
}

// ── Conversion ────────────────────────────────────────────────────

fn capacity(id: &str, raw: &RawResource) -> SnapshotResult<HostCapacity> {
    let cpu = u32::try_from(raw.cpu)
        .map_err(|_| SnapshotError::Invalid(format!("host {id}: cpu out of range: {}", raw.cpu)))?;
    let ram = u64::try_from(raw.ram)
        .map_err(|_| SnapshotError::Invalid(format!("host {id}: ram out of range: {}", raw.ram)))?;
    Ok(HostCapacity { cpu, ram })
}

fn request(id: &str, raw: &RawResource) -> SnapshotResult<VmRequest> {
    let cpu = u32::try_from(raw.cpu)
        .map_err(|_| SnapshotError::Invalid(format!("vm {id}: cpu out of range: {}", raw.cpu)))?;
    let ram = u64::try_from(raw.ram)
        .map_err(|_| SnapshotError::Invalid(format!("vm {id}: ram out of range: {}", raw.ram)))?;
    Ok(VmRequest { cpu, ram })
}

impl RawSnapshot {
    pub(crate) fn into_round_input(self) -> SnapshotResult<RoundInput> {
        let mut hosts = BTreeMap::new();
        for (id, raw) in &self.hosts {
            hosts.insert(id.clone(), capacity(id, raw)?);
        }

        let virtual_machines = match &self.virtual_machines {
            Some(vms) => {
                let mut converted = BTreeMap::new();
                for (id, raw) in vms {
                    converted.insert(id.clone(), request(id, raw)?);
                }
                Some(converted)
            }
            None => None,
        };

        let diff = self.diff.map(|d| DesiredSetDiff {
            add: d.add.map(|s| s.virtual_machines).unwrap_or_default(),
            remove: d.remove.map(|s| s.virtual_machines).unwrap_or_default(),
        });

        Ok(RoundInput {
            hosts,
            virtual_machines,
            diff,
        })
    }
}

// ── Public API ────────────────────────────────────────────────────

/// Parse a snapshot from its JSON text.
pub fn parse_snapshot(json: &str) -> SnapshotResult<RoundInput> {
    let raw: RawSnapshot = serde_json::from_str(json)?;
    raw.into_round_input()
}

/// Read and validate a snapshot file.
pub fn read_snapshot(path: &Path) -> SnapshotResult<RoundInput> {
    let json = fs::read_to_string(path)?;
    let input = parse_snapshot(&json)?;
    debug!(
        path = %path.display(),
        hosts = input.hosts.len(),
        vms = input.virtual_machines.as_ref().map(|v| v.len()).unwrap_or_default(),
        diff = input.diff.is_some(),
        "snapshot read"
    );
    Ok(input)
}

/// Render a round report as pretty-printed JSON.
pub fn report_to_string(report: &RoundReport) -> SnapshotResult<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Write a round report next to the snapshot it answers.
pub fn write_report(path: &Path, report: &RoundReport) -> SnapshotResult<()> {
    fs::write(path, report_to_string(report)?)?;
    Ok(())
}
