//! vmgrid-snapshot — the file boundary of the reconciliation loop.
//!
//! Reads desired-state snapshots (full VM sets or add/remove diffs),
//! validates them into the engine's `RoundInput`, writes round reports,
//! and generates synthetic VM demand for testing.

pub mod error;
pub mod snapshot;
pub mod synth;

pub use error::{SnapshotError, SnapshotResult};
pub use snapshot::{parse_snapshot, read_snapshot, report_to_string, write_report};
pub use synth::{SynthRanges, append_random_vm};
