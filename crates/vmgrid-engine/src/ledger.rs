//! Capacity ledger — the single place resource accounting is enforced.
//!
//! Hosts are keyed in a `BTreeMap` so every scan over the ledger is in
//! host-id order, which keeps placement and migration decisions
//! deterministic. All usage mutation goes through [`CapacityLedger::allocate`]
//! and [`CapacityLedger::deallocate`]; the planners never touch counters
//! directly.

use std::collections::BTreeMap;

use vmgrid_core::{HostCapacity, HostId, VmRequest};

use crate::error::{EngineError, EngineResult};

/// Capacity and current usage of a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostState {
    capacity: HostCapacity,
    cpu_used: u32,
    ram_used: u64,
}

impl HostState {
    fn new(capacity: HostCapacity) -> Self {
        Self {
            capacity,
            cpu_used: 0,
            ram_used: 0,
        }
    }

    pub fn capacity(&self) -> HostCapacity {
        self.capacity
    }

    pub fn cpu_used(&self) -> u32 {
        self.cpu_used
    }

    pub fn ram_used(&self) -> u64 {
        self.ram_used
    }

    /// True iff the VM fits into the host's remaining raw capacity.
    pub fn can_host(&self, vm: &VmRequest) -> bool {
        u64::from(self.cpu_used) + u64::from(vm.cpu) <= u64::from(self.capacity.cpu)
            && self.ram_used.saturating_add(vm.ram) <= self.capacity.ram
    }

    /// True iff the VM would fit after removing `evicted` from this host.
    ///
    /// Used by assisted placement to decide whether migrating one resident
    /// VM away actually frees enough room.
    pub fn can_host_after_removing(&self, evicted: &VmRequest, vm: &VmRequest) -> bool {
        let cpu = u64::from(self.cpu_used.saturating_sub(evicted.cpu)) + u64::from(vm.cpu);
        let ram = self
            .ram_used
            .saturating_sub(evicted.ram)
            .saturating_add(vm.ram);
        cpu <= u64::from(self.capacity.cpu) && ram <= self.capacity.ram
    }

    /// Average of the CPU-used and RAM-used fractions, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        (f64::from(self.cpu_used) / f64::from(self.capacity.cpu)
            + self.ram_used as f64 / self.capacity.ram as f64)
            / 2.0
    }

    /// Utilization this host would have after allocating `vm`.
    pub fn projected_utilization(&self, vm: &VmRequest) -> f64 {
        (f64::from(self.cpu_used + vm.cpu) / f64::from(self.capacity.cpu)
            + (self.ram_used + vm.ram) as f64 / self.capacity.ram as f64)
            / 2.0
    }
}

/// Tracks capacity and usage for every host in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityLedger {
    hosts: BTreeMap<HostId, HostState>,
}

impl CapacityLedger {
    /// Build a ledger from fixed host capacities.
    ///
    /// Rejects an empty host set and zero capacities (utilization would
    /// divide by zero).
    pub fn new(capacities: &BTreeMap<HostId, HostCapacity>) -> EngineResult<Self> {
        if capacities.is_empty() {
            return Err(EngineError::Validation("host set is empty".to_string()));
        }
        for (id, cap) in capacities {
            if cap.cpu == 0 || cap.ram == 0 {
                return Err(EngineError::Validation(format!(
                    "host {id} has zero capacity (cpu={}, ram={})",
                    cap.cpu, cap.ram
                )));
            }
        }
        Ok(Self {
            hosts: capacities
                .iter()
                .map(|(id, cap)| (id.clone(), HostState::new(*cap)))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn get(&self, host: &str) -> Option<&HostState> {
        self.hosts.get(host)
    }

    /// Hosts in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&HostId, &HostState)> {
        self.hosts.iter()
    }

    /// Pure feasibility check; false for unknown hosts.
    pub fn can_host(&self, host: &str, vm: &VmRequest) -> bool {
        self.hosts.get(host).is_some_and(|h| h.can_host(vm))
    }

    /// Record an allocation on `host`.
    ///
    /// Precondition: `can_host` holds. Violations are bookkeeping bugs in
    /// the planners, not input conditions.
    pub fn allocate(&mut self, host: &str, vm: &VmRequest) -> EngineResult<()> {
        let state = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| EngineError::Invariant(format!("allocate on unknown host {host}")))?;
        if !state.can_host(vm) {
            return Err(EngineError::Invariant(format!(
                "allocation would overflow host {host} (cpu {}+{}/{}, ram {}+{}/{})",
                state.cpu_used, vm.cpu, state.capacity.cpu, state.ram_used, vm.ram, state.capacity.ram
            )));
        }
        state.cpu_used += vm.cpu;
        state.ram_used += vm.ram;
        Ok(())
    }

    /// Release a previous allocation on `host`.
    ///
    /// Decrementing below zero means the VM was never allocated here.
    pub fn deallocate(&mut self, host: &str, vm: &VmRequest) -> EngineResult<()> {
        let state = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| EngineError::Invariant(format!("deallocate on unknown host {host}")))?;
        let cpu = state.cpu_used.checked_sub(vm.cpu);
        let ram = state.ram_used.checked_sub(vm.ram);
        match (cpu, ram) {
            (Some(cpu), Some(ram)) => {
                state.cpu_used = cpu;
                state.ram_used = ram;
                Ok(())
            }
            _ => Err(EngineError::Invariant(format!(
                "deallocation underflows host {host} (cpu {}-{}, ram {}-{})",
                state.cpu_used, vm.cpu, state.ram_used, vm.ram
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(entries: &[(&str, u32, u64)]) -> BTreeMap<HostId, HostCapacity> {
        entries
            .iter()
            .map(|(id, cpu, ram)| (id.to_string(), HostCapacity { cpu: *cpu, ram: *ram }))
            .collect()
    }

    fn vm(cpu: u32, ram: u64) -> VmRequest {
        VmRequest { cpu, ram }
    }

    #[test]
    fn rejects_empty_host_set() {
        let result = CapacityLedger::new(&BTreeMap::new());
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn rejects_zero_capacity() {
        let result = CapacityLedger::new(&caps(&[("h1", 0, 16)]));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn allocate_updates_usage() {
        let mut ledger = CapacityLedger::new(&caps(&[("h1", 8, 16)])).unwrap();
        ledger.allocate("h1", &vm(2, 4)).unwrap();

        let state = ledger.get("h1").unwrap();
        assert_eq!(state.cpu_used(), 2);
        assert_eq!(state.ram_used(), 4);
        assert_eq!(state.utilization(), 0.25);
    }

    #[test]
    fn can_host_respects_both_dimensions() {
        let mut ledger = CapacityLedger::new(&caps(&[("h1", 4, 4)])).unwrap();
        ledger.allocate("h1", &vm(3, 1)).unwrap();

        // CPU is the binding constraint now.
        assert!(!ledger.can_host("h1", &vm(2, 1)));
        assert!(ledger.can_host("h1", &vm(1, 3)));
        assert!(!ledger.can_host("h1", &vm(1, 4)));
    }

    #[test]
    fn can_host_false_for_unknown_host() {
        let ledger = CapacityLedger::new(&caps(&[("h1", 4, 4)])).unwrap();
        assert!(!ledger.can_host("nope", &vm(1, 1)));
    }

    #[test]
    fn oversized_allocation_is_invariant_violation() {
        let mut ledger = CapacityLedger::new(&caps(&[("h1", 4, 4)])).unwrap();
        let result = ledger.allocate("h1", &vm(5, 5));
        assert!(matches!(result, Err(EngineError::Invariant(_))));
    }

    #[test]
    fn deallocate_underflow_is_invariant_violation() {
        let mut ledger = CapacityLedger::new(&caps(&[("h1", 8, 16)])).unwrap();
        ledger.allocate("h1", &vm(2, 4)).unwrap();
        ledger.deallocate("h1", &vm(2, 4)).unwrap();

        let result = ledger.deallocate("h1", &vm(1, 1));
        assert!(matches!(result, Err(EngineError::Invariant(_))));
    }

    #[test]
    fn deallocate_restores_usage() {
        let mut ledger = CapacityLedger::new(&caps(&[("h1", 8, 16)])).unwrap();
        ledger.allocate("h1", &vm(2, 4)).unwrap();
        ledger.allocate("h1", &vm(1, 2)).unwrap();
        ledger.deallocate("h1", &vm(2, 4)).unwrap();

        let state = ledger.get("h1").unwrap();
        assert_eq!(state.cpu_used(), 1);
        assert_eq!(state.ram_used(), 2);
    }

    #[test]
    fn projected_utilization_matches_post_allocation() {
        let mut ledger = CapacityLedger::new(&caps(&[("h1", 10, 10)])).unwrap();
        let request = vm(3, 5);

        let projected = ledger.get("h1").unwrap().projected_utilization(&request);
        ledger.allocate("h1", &request).unwrap();
        assert_eq!(ledger.get("h1").unwrap().utilization(), projected);
    }

    #[test]
    fn can_host_after_removing_swaps_room() {
        let mut ledger = CapacityLedger::new(&caps(&[("h1", 10, 10)])).unwrap();
        ledger.allocate("h1", &vm(8, 8)).unwrap();

        let state = ledger.get("h1").unwrap();
        assert!(!state.can_host(&vm(4, 4)));
        assert!(state.can_host_after_removing(&vm(8, 8), &vm(4, 4)));
        assert!(!state.can_host_after_removing(&vm(2, 2), &vm(8, 8)));
    }

    #[test]
    fn iteration_is_in_host_id_order() {
        let ledger =
            CapacityLedger::new(&caps(&[("h3", 1, 1), ("h1", 1, 1), ("h2", 1, 1)])).unwrap();
        let ids: Vec<&HostId> = ledger.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["h1", "h2", "h3"]);
    }
}
