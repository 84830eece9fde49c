//! Synthetic VM generation for exercising the engine.
//!
//! Appends randomly sized VM requests to an existing snapshot file, the
//! way a demand generator would feed the reconciliation loop during
//! testing.

use std::fs;
use std::path::Path;

use rand::Rng;
use tracing::info;

use vmgrid_core::VmId;

use crate::error::{SnapshotError, SnapshotResult};
use crate::snapshot::{RawResource, RawSnapshot};

/// Inclusive request-size ranges for generated VMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthRanges {
    pub cpu_min: u32,
    pub cpu_max: u32,
    pub ram_min: u64,
    pub ram_max: u64,
}

impl Default for SynthRanges {
    fn default() -> Self {
        Self {
            cpu_min: 1,
            cpu_max: 3,
            ram_min: 2,
            ram_max: 5,
        }
    }
}

impl SynthRanges {
    fn validate(&self) -> SnapshotResult<()> {
        if self.cpu_min > self.cpu_max || self.ram_min > self.ram_max {
            return Err(SnapshotError::Invalid(format!(
                "malformed synth ranges (cpu {}..={}, ram {}..={})",
                self.cpu_min, self.cpu_max, self.ram_min, self.ram_max
            )));
        }
        Ok(())
    }
}

/// Append one randomly sized VM to the snapshot at `path`.
///
/// The new id is `vm{n}` for the smallest `n` past the current VM count
/// that is not taken, so removals never cause a collision. Returns the
/// id that was written.
pub fn append_random_vm(path: &Path, ranges: &SynthRanges) -> SnapshotResult<VmId> {
    ranges.validate()?;

    let json = fs::read_to_string(path)?;
    let mut raw: RawSnapshot = serde_json::from_str(&json)?;
    let vms = raw.virtual_machines.get_or_insert_with(Default::default);

    let mut n = vms.len() + 1;
    while vms.contains_key(&format!("vm{n}")) {
        n += 1;
    }
    let id = format!("vm{n}");

    let mut rng = rand::thread_rng();
    let ram_max = ranges.ram_max.min(i64::MAX as u64);
    let vm = RawResource {
        cpu: i64::from(rng.gen_range(ranges.cpu_min..=ranges.cpu_max)),
        ram: rng.gen_range(ranges.ram_min.min(ram_max)..=ram_max) as i64,
    };
    vms.insert(id.clone(), vm);

    fs::write(path, serde_json::to_string_pretty(&raw)?)?;
    info!(vm = %id, cpu = vm.cpu, ram = vm.ram, "synthetic VM appended");
    Ok(id)
}
