//! C4 Execution Coordinator (§4.4). Exclusively writes Order records and
//! the linkage between an Order and its Allocation.

mod coordinator;
mod order_tracker;

pub use coordinator::ExecutionCoordinator;
pub use order_tracker::{decide_leg_action, leg_sync_ratio, needs_sync_correction, sync_correction, LegAction, POLL_INTERVAL_SECS};
