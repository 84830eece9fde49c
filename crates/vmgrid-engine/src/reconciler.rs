//! Reconciliation loop — one round of desired-state convergence.
//!
//! The `Reconciler` owns all engine state for the process lifetime: the
//! capacity ledger, the VM→host assignment map, the desired set and the
//! active set. Each round it diffs the incoming desired set against what
//! it already tracks, deallocates removed VMs, places added ones, runs
//! the rebalancer and publishes a report. Rounds are atomic from the
//! report's point of view; the migration log is transient per round.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use vmgrid_core::{
    HostCapacity, HostId, HostUtilization, Migration, RoundInput, RoundReport, VmId, VmRequest,
};

use crate::error::{EngineError, EngineResult};
use crate::ledger::CapacityLedger;
use crate::placer::{TargetBand, place_vm};
use crate::rebalancer::rebalance;
use crate::scorer::score;

/// Stateful reconciliation engine.
///
/// Starts uninitialized; the first round's host map (or an explicit
/// [`Reconciler::initialize`] call) moves it to steady state. Host
/// capacities are fixed from then on.
#[derive(Debug)]
pub struct Reconciler {
    band: TargetBand,
    ledger: Option<CapacityLedger>,
    /// VM id → host id, unique per VM.
    assignments: BTreeMap<VmId, HostId>,
    /// Request sizes of every VM in the tracked desired set.
    desired: BTreeMap<VmId, VmRequest>,
    /// VM ids currently placed. A VM that failed placement stays out, so
    /// it is retried on every subsequent round.
    active: BTreeSet<VmId>,
}

impl Reconciler {
    pub fn new(band: TargetBand) -> Self {
        Self {
            band,
            ledger: None,
            assignments: BTreeMap::new(),
            desired: BTreeMap::new(),
            active: BTreeSet::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.ledger.is_some()
    }

    /// Load host capacities. One-shot: hosts never change afterwards.
    pub fn initialize(&mut self, hosts: &BTreeMap<HostId, HostCapacity>) -> EngineResult<()> {
        if self.ledger.is_some() {
            return Err(EngineError::Invariant(
                "hosts are fixed after initialization".to_string(),
            ));
        }
        let ledger = CapacityLedger::new(hosts)?;
        info!(hosts = ledger.len(), "capacity ledger initialized");
        self.ledger = Some(ledger);
        Ok(())
    }

    /// Execute one reconciliation round.
    ///
    /// A `Validation` error leaves all state untouched (the round is
    /// skipped); an `Invariant` error means engine bookkeeping broke.
    pub fn reconcile_round(&mut self, input: &RoundInput) -> EngineResult<RoundReport> {
        // Everything that can reject the input happens before the first
        // mutation, so a skipped round really is a no-op.
        let desired = self.next_desired(input)?;
        if self.ledger.is_none() {
            if input.hosts.is_empty() {
                return Err(EngineError::Validation(
                    "first round carries no hosts".to_string(),
                ));
            }
            self.initialize(&input.hosts)?;
        }

        let removed: Vec<VmId> = self
            .desired
            .keys()
            .filter(|id| !desired.contains_key(*id))
            .cloned()
            .collect();
        for vm_id in &removed {
            self.remove_vm(vm_id)?;
        }

        let mut failures: Vec<VmId> = Vec::new();
        for (vm_id, request) in &desired {
            if self.active.contains(vm_id) {
                continue;
            }
            if self.assignments.contains_key(vm_id) {
                return Err(EngineError::Invariant(format!(
                    "VM {vm_id} is assigned but not active"
                )));
            }
            let ledger = self.ledger.as_mut().ok_or(EngineError::NotInitialized)?;
            match place_vm(ledger, &self.band, vm_id, request)? {
                Some(host) => {
                    self.assignments.insert(vm_id.clone(), host);
                    self.active.insert(vm_id.clone());
                }
                None => failures.push(vm_id.clone()),
            }
        }

        let ledger = self.ledger.as_mut().ok_or(EngineError::NotInitialized)?;
        let outcome = rebalance(ledger, &mut self.assignments, &desired, &self.band, &failures)?;
        for vm_id in outcome.rescued.keys() {
            self.active.insert(vm_id.clone());
        }
        failures.retain(|vm_id| !outcome.rescued.contains_key(vm_id));

        self.desired = desired;

        let report = self.build_report(failures, outcome.migrations);
        info!(
            placed = self.active.len(),
            failures = report.allocation_failures.len(),
            migrations = report.migrations.len(),
            underutilized = report.underutilized_hosts.len(),
            "round reconciled"
        );
        Ok(report)
    }

    /// Compute the next desired set without touching engine state.
    fn next_desired(&self, input: &RoundInput) -> EngineResult<BTreeMap<VmId, VmRequest>> {
        if let Some(diff) = &input.diff {
            let mut desired = self.desired.clone();
            for vm_id in &diff.remove {
                // Removing an unknown id is a stale reference; skip it.
                desired.remove(vm_id);
            }
            for vm_id in &diff.add {
                match input
                    .virtual_machines
                    .as_ref()
                    .and_then(|vms| vms.get(vm_id))
                {
                    Some(request) => {
                        desired.insert(vm_id.clone(), *request);
                    }
                    None => warn!(
                        vm = %vm_id,
                        "diff adds a VM absent from the snapshot, ignoring"
                    ),
                }
            }
            Ok(desired)
        } else if let Some(vms) = &input.virtual_machines {
            Ok(vms.clone())
        } else {
            Err(EngineError::Validation(
                "round input carries neither a virtual machine set nor a diff".to_string(),
            ))
        }
    }

    /// Drop a VM from the engine, releasing its allocation if placed.
    fn remove_vm(&mut self, vm_id: &str) -> EngineResult<()> {
        self.active.remove(vm_id);
        let Some(host) = self.assignments.remove(vm_id) else {
            // Never placed; nothing to release.
            return Ok(());
        };
        let request = *self.desired.get(vm_id).ok_or_else(|| {
            EngineError::Invariant(format!("assigned VM {vm_id} has no tracked request"))
        })?;
        let ledger = self.ledger.as_mut().ok_or(EngineError::NotInitialized)?;
        ledger.deallocate(&host, &request)?;
        debug!(vm = vm_id, host = %host, "deallocated removed VM");
        Ok(())
    }

    fn build_report(&self, failures: Vec<VmId>, migrations: Vec<Migration>) -> RoundReport {
        let mut allocations: BTreeMap<HostId, Vec<VmId>> = BTreeMap::new();
        for (vm_id, host) in &self.assignments {
            allocations.entry(host.clone()).or_default().push(vm_id.clone());
        }

        let mut host_utilizations = BTreeMap::new();
        let mut underutilized_hosts = Vec::new();
        if let Some(ledger) = &self.ledger {
            for (host, state) in ledger.iter() {
                let utilization = state.utilization();
                host_utilizations.insert(
                    host.clone(),
                    HostUtilization {
                        usage_percentage: utilization * 100.0,
                        score: score(utilization),
                    },
                );
                if utilization < self.band.low {
                    underutilized_hosts.push(host.clone());
                }
            }
        }

        RoundReport {
            allocations,
            allocation_failures: failures,
            migrations,
            host_utilizations,
            underutilized_hosts,
        }
    }
}
