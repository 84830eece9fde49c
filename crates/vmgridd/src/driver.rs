//! Snapshot-polling driver for the reconciliation engine.
//!
//! Each tick reads the input snapshot (if present), runs one round and
//! writes the report. A rejected snapshot or a round-level validation
//! error skips the tick and leaves prior state untouched; a ledger
//! invariant violation is a bug and aborts the loop loudly.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use vmgrid_core::RoundReport;
use vmgrid_engine::{EngineError, Reconciler, TargetBand};
use vmgrid_snapshot::SynthRanges;

pub struct Driver {
    reconciler: Reconciler,
    input: PathBuf,
    output: PathBuf,
    /// When set, one synthetic VM is appended to the snapshot per tick.
    synth: Option<SynthRanges>,
}

impl Driver {
    pub fn new(band: TargetBand, input: PathBuf, output: PathBuf) -> Self {
        Self {
            reconciler: Reconciler::new(band),
            input,
            output,
            synth: None,
        }
    }

    pub fn with_synth(mut self, ranges: SynthRanges) -> Self {
        self.synth = Some(ranges);
        self
    }

    /// Run one reconciliation tick.
    ///
    /// Returns the round's report, or `None` when the tick was skipped
    /// (no snapshot yet, or input rejected).
    pub fn tick(&mut self) -> anyhow::Result<Option<RoundReport>> {
        if !self.input.exists() {
            debug!(input = %self.input.display(), "no snapshot yet, skipping tick");
            return Ok(None);
        }

        if let Some(ranges) = &self.synth
            && let Err(e) = vmgrid_snapshot::append_random_vm(&self.input, ranges)
        {
            warn!(error = %e, "synthetic VM generation failed");
        }

        let input = match vmgrid_snapshot::read_snapshot(&self.input) {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "snapshot rejected, skipping round");
                return Ok(None);
            }
        };

        let report = match self.reconciler.reconcile_round(&input) {
            Ok(report) => report,
            Err(EngineError::Validation(reason)) => {
                warn!(%reason, "round skipped");
                return Ok(None);
            }
            // Invariant violations and missing initialization are bugs in
            // the engine's bookkeeping, not input conditions.
            Err(e) => return Err(e.into()),
        };

        vmgrid_snapshot::write_report(&self.output, &report)?;
        info!(
            output = %self.output.display(),
            failures = report.allocation_failures.len(),
            migrations = report.migrations.len(),
            "round complete"
        );
        Ok(Some(report))
    }

    /// Run the polling loop until shutdown.
    pub async fn run(
        mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(
            interval_secs = interval.as_secs(),
            input = %self.input.display(),
            "driver started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick()?;
                }
                _ = shutdown.changed() => {
                    info!("driver shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn driver_in(dir: &tempfile::TempDir) -> Driver {
        Driver::new(
            TargetBand::default(),
            dir.path().join("input.json"),
            dir.path().join("output.json"),
        )
    }

    #[test]
    fn missing_snapshot_skips_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = driver_in(&dir);

        let report = driver.tick().unwrap();
        assert!(report.is_none());
        assert!(!dir.path().join("output.json").exists());
    }

    #[test]
    fn tick_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("input.json"),
            r#"{
                "hosts": { "h1": { "cpu": 8, "ram": 16 } },
                "virtual_machines": { "vm1": { "cpu": 2, "ram": 4 } }
            }"#,
        )
        .unwrap();

        let mut driver = driver_in(&dir);
        let report = driver.tick().unwrap().unwrap();
        assert_eq!(report.allocations["h1"], ["vm1"]);

        let written: vmgrid_core::RoundReport =
            serde_json::from_str(&fs::read_to_string(dir.path().join("output.json")).unwrap())
                .unwrap();
        assert_eq!(written, report);
    }

    #[test]
    fn malformed_snapshot_skips_round_and_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.json");
        fs::write(
            &input,
            r#"{
                "hosts": { "h1": { "cpu": 8, "ram": 16 } },
                "virtual_machines": { "vm1": { "cpu": 2, "ram": 4 } }
            }"#,
        )
        .unwrap();

        let mut driver = driver_in(&dir);
        driver.tick().unwrap().unwrap();

        // A negative request is rejected at the boundary.
        fs::write(
            &input,
            r#"{ "virtual_machines": { "vm2": { "cpu": -1, "ram": 4 } } }"#,
        )
        .unwrap();
        assert!(driver.tick().unwrap().is_none());

        // The engine still has round 1's state: vm1 remains placed.
        fs::write(
            &input,
            r#"{ "virtual_machines": { "vm1": { "cpu": 2, "ram": 4 } } }"#,
        )
        .unwrap();
        let report = driver.tick().unwrap().unwrap();
        assert_eq!(report.allocations["h1"], ["vm1"]);
        assert!(report.migrations.is_empty());
    }

    #[test]
    fn synth_tick_grows_the_desired_set() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.json");
        fs::write(
            &input,
            r#"{
                "hosts": { "h1": { "cpu": 64, "ram": 128 } },
                "virtual_machines": {}
            }"#,
        )
        .unwrap();

        let mut driver = driver_in(&dir).with_synth(SynthRanges::default());
        let report = driver.tick().unwrap().unwrap();

        // The generated VM was reconciled in the same tick.
        assert_eq!(report.allocations["h1"].len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver_in(&dir);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(driver.run(Duration::from_secs(3600), rx));
        tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
    }
}
