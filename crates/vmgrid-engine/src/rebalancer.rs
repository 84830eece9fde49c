//! Rebalance planner — restores the target band after placements.
//!
//! Two passes per round, in order:
//!
//! 1. **Overload correction** — every host above the high-water mark
//!    sheds VMs, largest request first, to the least-utilized target that
//!    fits them inside the band. One pass over each host's VMs; a host
//!    that stays hot is left for the next round.
//! 2. **Assisted placement** — VMs the placer could not fit get one
//!    direct retry (the overload pass may have freed room), then a helper
//!    search: migrate one resident VM off a quiet host when doing so
//!    provably makes room for the stranded VM.
//!
//! Underutilized hosts never trigger evictions; they are only reported.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, info};

use vmgrid_core::{HostId, Migration, VmId, VmRequest};

use crate::error::{EngineError, EngineResult};
use crate::ledger::CapacityLedger;
use crate::placer::{TargetBand, rank_hosts};

/// What a rebalance pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebalanceOutcome {
    /// Migrations performed, in execution order.
    pub migrations: Vec<Migration>,
    /// Stranded VMs that found a host this round, and where they landed.
    pub rescued: BTreeMap<VmId, HostId>,
}

/// Run both rebalance passes over the ledger and assignment map.
///
/// `requests` must carry the size of every assigned VM and every id in
/// `stranded`; a missing entry is a bookkeeping invariant violation.
pub fn rebalance(
    ledger: &mut CapacityLedger,
    assignments: &mut BTreeMap<VmId, HostId>,
    requests: &BTreeMap<VmId, VmRequest>,
    band: &TargetBand,
    stranded: &[VmId],
) -> EngineResult<RebalanceOutcome> {
    let mut outcome = RebalanceOutcome::default();
    correct_overloads(ledger, assignments, requests, band, &mut outcome)?;
    assist_stranded(ledger, assignments, requests, band, stranded, &mut outcome)?;
    Ok(outcome)
}

/// Resident VMs of `host`, largest request first, ids breaking ties.
fn residents_by_size(
    assignments: &BTreeMap<VmId, HostId>,
    requests: &BTreeMap<VmId, VmRequest>,
    host: &str,
) -> EngineResult<Vec<(VmId, VmRequest)>> {
    let mut resident: Vec<(VmId, VmRequest)> = Vec::new();
    for (vm_id, assigned) in assignments {
        if assigned == host {
            let request = requests.get(vm_id).ok_or_else(|| {
                EngineError::Invariant(format!("assigned VM {vm_id} has no tracked request"))
            })?;
            resident.push((vm_id.clone(), *request));
        }
    }
    resident.sort_by(|a, b| {
        let wa = u64::from(a.1.cpu).saturating_add(a.1.ram);
        let wb = u64::from(b.1.cpu).saturating_add(b.1.ram);
        wb.cmp(&wa).then_with(|| a.0.cmp(&b.0))
    });
    Ok(resident)
}

fn migrate(
    ledger: &mut CapacityLedger,
    assignments: &mut BTreeMap<VmId, HostId>,
    vm_id: &str,
    request: &VmRequest,
    from: &str,
    to: &str,
) -> EngineResult<Migration> {
    ledger.deallocate(from, request)?;
    ledger.allocate(to, request)?;
    assignments.insert(vm_id.to_string(), to.to_string());
    Ok(Migration {
        vm: vm_id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    })
}

/// Pass 1: move VMs off hosts above the high-water mark.
fn correct_overloads(
    ledger: &mut CapacityLedger,
    assignments: &mut BTreeMap<VmId, HostId>,
    requests: &BTreeMap<VmId, VmRequest>,
    band: &TargetBand,
    outcome: &mut RebalanceOutcome,
) -> EngineResult<()> {
    let overloaded: Vec<HostId> = ledger
        .iter()
        .filter(|(_, state)| state.utilization() > band.high)
        .map(|(id, _)| id.clone())
        .collect();

    for host in overloaded {
        for (vm_id, request) in residents_by_size(assignments, requests, &host)? {
            let still_hot = ledger
                .get(&host)
                .is_some_and(|state| state.utilization() > band.high);
            if !still_hot {
                break;
            }

            let Some(target) = rank_hosts(ledger, band, &request, Some(&host))
                .into_iter()
                .next()
            else {
                continue;
            };

            let migration = migrate(ledger, assignments, &vm_id, &request, &host, &target)?;
            info!(vm = %migration.vm, from = %migration.from, to = %migration.to, "migrated off overloaded host");
            outcome.migrations.push(migration);
        }

        let remaining = ledger.get(&host).map(|s| s.utilization()).unwrap_or_default();
        if remaining > band.high {
            debug!(host = %host, utilization = remaining, "host remains above the high-water mark this round");
        }
    }
    Ok(())
}

/// Pass 2: rescue VMs that failed placement.
fn assist_stranded(
    ledger: &mut CapacityLedger,
    assignments: &mut BTreeMap<VmId, HostId>,
    requests: &BTreeMap<VmId, VmRequest>,
    band: &TargetBand,
    stranded: &[VmId],
    outcome: &mut RebalanceOutcome,
) -> EngineResult<()> {
    for vm_id in stranded {
        let request = requests.get(vm_id).ok_or_else(|| {
            EngineError::Invariant(format!("stranded VM {vm_id} has no tracked request"))
        })?;

        // Direct retry: the overload pass may have freed room, and a plain
        // placement beats a migration.
        if let Some(host) = rank_hosts(ledger, band, request, None).into_iter().next() {
            ledger.allocate(&host, request)?;
            assignments.insert(vm_id.clone(), host.clone());
            debug!(vm = %vm_id, host = %host, "stranded VM placed on retry");
            outcome.rescued.insert(vm_id.clone(), host);
            continue;
        }

        if let Some((migration, helper)) =
            free_room_for(ledger, assignments, requests, band, request)?
        {
            ledger.allocate(&helper, request)?;
            assignments.insert(vm_id.clone(), helper.clone());
            info!(
                vm = %vm_id,
                host = %helper,
                helper_vm = %migration.vm,
                "assisted placement after helper migration"
            );
            outcome.migrations.push(migration);
            outcome.rescued.insert(vm_id.clone(), helper);
        }
    }
    Ok(())
}

/// Find a helper host and migrate one of its VMs away so `request` fits.
///
/// Helper hosts are tried quietest first; a helper VM is only moved when
/// its departure provably makes room and a band-respecting target exists
/// for it. Returns the helper migration and the now-freed host.
fn free_room_for(
    ledger: &mut CapacityLedger,
    assignments: &mut BTreeMap<VmId, HostId>,
    requests: &BTreeMap<VmId, VmRequest>,
    band: &TargetBand,
    request: &VmRequest,
) -> EngineResult<Option<(Migration, HostId)>> {
    let mut helpers: Vec<(f64, HostId)> = ledger
        .iter()
        .map(|(id, state)| (state.utilization(), id.clone()))
        .collect();
    helpers.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    for (_, helper) in helpers {
        for (victim_id, victim) in residents_by_size(assignments, requests, &helper)? {
            let frees_enough = ledger
                .get(&helper)
                .is_some_and(|state| state.can_host_after_removing(&victim, request));
            if !frees_enough {
                continue;
            }

            let Some(target) = rank_hosts(ledger, band, &victim, Some(&helper))
                .into_iter()
                .next()
            else {
                continue;
            };

            let migration = migrate(ledger, assignments, &victim_id, &victim, &helper, &target)?;
            return Ok(Some((migration, helper)));
        }
    }
    Ok(None)
}
