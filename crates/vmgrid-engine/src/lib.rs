//! vmgrid-engine — allocation and rebalancing for VM placement.
//!
//! The engine assigns virtual machines to hosts under CPU/RAM capacity
//! constraints, keeps host utilization inside a target band and migrates
//! placed VMs when hosts drift out of it. It is synchronous and owns all
//! of its state; the daemon drives it one round at a time.
//!
//! # Components
//!
//! - **`ledger`** — capacity accounting, the only mutation point
//! - **`placer`** — bounded best-fit placement under the band ceiling
//! - **`rebalancer`** — overload correction and assisted placement
//! - **`scorer`** — utilization → report score curve
//! - **`reconciler`** — the per-round state machine tying it together

pub mod error;
pub mod ledger;
pub mod placer;
pub mod rebalancer;
pub mod reconciler;
pub mod scorer;

pub use error::{EngineError, EngineResult};
pub use ledger::{CapacityLedger, HostState};
pub use placer::{TargetBand, place_vm, rank_hosts};
pub use rebalancer::{RebalanceOutcome, rebalance};
pub use reconciler::Reconciler;
pub use scorer::score;
