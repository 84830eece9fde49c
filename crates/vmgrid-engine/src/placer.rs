//! Placement planner — bounded best-fit under the target band.
//!
//! A VM goes to the feasible host with the lowest current utilization,
//! but only if the allocation would not push that host above the band's
//! high-water mark. Capacity alone is not enough: a VM that would
//! overshoot the band on every feasible host fails placement and is left
//! for the rebalancer to rescue.

use std::cmp::Ordering;

use tracing::{debug, warn};

use vmgrid_core::{HostId, VmRequest};

use crate::error::{EngineError, EngineResult};
use crate::ledger::CapacityLedger;

/// The `[low, high]` utilization band the engine keeps hosts inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetBand {
    pub low: f64,
    pub high: f64,
}

impl TargetBand {
    pub const DEFAULT_LOW: f64 = 0.75;
    pub const DEFAULT_HIGH: f64 = 0.80;

    pub fn new(low: f64, high: f64) -> EngineResult<Self> {
        if !low.is_finite() || !high.is_finite() || low < 0.0 || high > 1.0 || low > high {
            return Err(EngineError::Validation(format!(
                "malformed target band [{low}, {high}]"
            )));
        }
        Ok(Self { low, high })
    }
}

impl Default for TargetBand {
    fn default() -> Self {
        Self {
            low: Self::DEFAULT_LOW,
            high: Self::DEFAULT_HIGH,
        }
    }
}

/// Rank candidate hosts for `vm`: feasible, below the high-water mark
/// after allocation, ordered by (current utilization, host id) ascending.
///
/// The id tie-break makes selection independent of container iteration
/// order. `exclude` drops one host from consideration (a migration's
/// source). The rebalancer shares this rule for target selection.
pub fn rank_hosts(
    ledger: &CapacityLedger,
    band: &TargetBand,
    vm: &VmRequest,
    exclude: Option<&str>,
) -> Vec<HostId> {
    let mut candidates: Vec<(f64, &HostId)> = ledger
        .iter()
        .filter(|(id, _)| exclude.is_none_or(|ex| ex != id.as_str()))
        .filter(|(_, state)| state.can_host(vm))
        .filter(|(_, state)| state.projected_utilization(vm) <= band.high)
        .map(|(id, state)| (state.utilization(), id))
        .collect();

    candidates.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    candidates.into_iter().map(|(_, id)| id.clone()).collect()
}

/// Place one VM, performing the allocation on success.
///
/// Returns the chosen host id, or `None` when no host satisfies both
/// capacity and the band ceiling — never a partial allocation.
pub fn place_vm(
    ledger: &mut CapacityLedger,
    band: &TargetBand,
    vm_id: &str,
    vm: &VmRequest,
) -> EngineResult<Option<HostId>> {
    let Some(host) = rank_hosts(ledger, band, vm, None).into_iter().next() else {
        warn!(vm = vm_id, cpu = vm.cpu, ram = vm.ram, "no host can take this request inside the band");
        return Ok(None);
    };

    ledger.allocate(&host, vm)?;
    debug!(
        vm = vm_id,
        host = %host,
        utilization = ledger.get(&host).map(|h| h.utilization()).unwrap_or_default(),
        "placed"
    );
    Ok(Some(host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vmgrid_core::HostCapacity;

    fn ledger(entries: &[(&str, u32, u64)]) -> CapacityLedger {
        let caps: BTreeMap<HostId, HostCapacity> = entries
            .iter()
            .map(|(id, cpu, ram)| (id.to_string(), HostCapacity { cpu: *cpu, ram: *ram }))
            .collect();
        CapacityLedger::new(&caps).unwrap()
    }

    fn vm(cpu: u32, ram: u64) -> VmRequest {
        VmRequest { cpu, ram }
    }

    #[test]
    fn band_rejects_inverted_limits() {
        assert!(TargetBand::new(0.9, 0.8).is_err());
        assert!(TargetBand::new(-0.1, 0.8).is_err());
        assert!(TargetBand::new(0.5, 1.5).is_err());
        assert!(TargetBand::new(0.75, 0.80).is_ok());
    }

    #[test]
    fn picks_least_utilized_host() {
        let mut ledger = ledger(&[("h1", 10, 10), ("h2", 10, 10)]);
        ledger.allocate("h1", &vm(4, 4)).unwrap();

        let host = place_vm(&mut ledger, &TargetBand::default(), "vm1", &vm(2, 2))
            .unwrap()
            .unwrap();
        assert_eq!(host, "h2");
    }

    #[test]
    fn ties_break_by_host_id() {
        let mut ledger = ledger(&[("h2", 10, 10), ("h1", 10, 10)]);

        let host = place_vm(&mut ledger, &TargetBand::default(), "vm1", &vm(2, 2))
            .unwrap()
            .unwrap();
        assert_eq!(host, "h1");
    }

    #[test]
    fn band_ceiling_blocks_despite_raw_capacity() {
        // 9/10 + 9/10 → projected 0.9, above the 0.8 ceiling even though
        // the host could physically fit the VM.
        let mut ledger = ledger(&[("h1", 10, 10)]);
        let placed = place_vm(&mut ledger, &TargetBand::default(), "vm1", &vm(9, 9)).unwrap();
        assert_eq!(placed, None);
        // The failed attempt must not leak any allocation.
        assert_eq!(ledger.get("h1").unwrap().cpu_used(), 0);
    }

    #[test]
    fn oversized_request_fails() {
        let mut ledger = ledger(&[("h1", 4, 4)]);
        let placed = place_vm(&mut ledger, &TargetBand::default(), "vm1", &vm(5, 5)).unwrap();
        assert_eq!(placed, None);
    }

    #[test]
    fn allocation_lands_at_exact_ceiling() {
        // Projected utilization exactly 0.8 is inside the band.
        let mut ledger = ledger(&[("h1", 10, 10)]);
        let placed = place_vm(&mut ledger, &TargetBand::default(), "vm1", &vm(8, 8)).unwrap();
        assert_eq!(placed.as_deref(), Some("h1"));
    }

    #[test]
    fn rank_hosts_excludes_source() {
        let ledger = ledger(&[("h1", 10, 10), ("h2", 10, 10)]);
        let ranked = rank_hosts(&ledger, &TargetBand::default(), &vm(1, 1), Some("h1"));
        assert_eq!(ranked, ["h2"]);
    }

    #[test]
    fn rank_hosts_orders_by_utilization_then_id() {
        let mut ledger = ledger(&[("h1", 10, 10), ("h2", 10, 10), ("h3", 10, 10)]);
        ledger.allocate("h1", &vm(4, 4)).unwrap();
        ledger.allocate("h3", &vm(2, 2)).unwrap();

        let ranked = rank_hosts(&ledger, &TargetBand::default(), &vm(1, 1), None);
        assert_eq!(ranked, ["h2", "h3", "h1"]);
    }
}
