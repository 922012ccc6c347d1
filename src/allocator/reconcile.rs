//! Startup recovery and reconciliation (§4.3 "Recovery and
//! reconciliation"), plus the E6-supplemented leg-only orphan detection
//! drawn from `original_source/services/position-manager/manager/
//! reconciliation.py`: a position with only one confirmed leg order is a
//! failure mode the distilled spec doesn't name but the original system
//! actively scans for and alerts on.

use crate::models::{Allocation, AllocationId, AllocationState, OpportunityId, Position, PositionId};
use std::collections::{HashMap, HashSet};

pub struct ReconcileResult {
    /// Positions found in the store with no matching cached allocation;
    /// given a synthetic allocation record so the coin-cap accounting
    /// stays correct.
    pub synthetic_allocations: Vec<Allocation>,
    /// Cached allocations whose position no longer exists in the store.
    pub closed_allocation_ids: Vec<AllocationId>,
    /// Positions with exactly one leg confirmed — a failed paired
    /// execution that never got cleaned up.
    pub orphan_leg_positions: Vec<PositionId>,
}

/// `leg_presence` maps a position id to (long-leg-confirmed,
/// short-leg-confirmed); absence means "unknown", treated as both present
/// so an incomplete feed never manufactures false orphans.
pub fn reconcile(
    cached: &[Allocation],
    open_positions: &[Position],
    leg_presence: &HashMap<PositionId, (bool, bool)>,
) -> ReconcileResult {
    let allocated_positions: HashSet<PositionId> =
        cached.iter().filter_map(|a| a.position_id).collect();
    let open_position_ids: HashSet<PositionId> = open_positions.iter().map(|p| p.id).collect();

    let mut synthetic_allocations = Vec::new();
    for position in open_positions {
        if !allocated_positions.contains(&position.id) {
            let mut allocation = Allocation::new(
                OpportunityId::new(),
                position.symbol.clone(),
                position.long_venue.clone(),
                position.short_venue.clone(),
                position.size_usd,
                0,
            );
            allocation.position_id = Some(position.id);
            allocation.transition(AllocationState::Executing);
            allocation.transition(AllocationState::Active);
            synthetic_allocations.push(allocation);
        }
    }

    let closed_allocation_ids: Vec<AllocationId> = cached
        .iter()
        .filter(|a| !a.state.is_terminal())
        .filter(|a| matches!(a.position_id, Some(pid) if !open_position_ids.contains(&pid)))
        .map(|a| a.id)
        .collect();

    let orphan_leg_positions: Vec<PositionId> = open_positions
        .iter()
        .filter_map(|p| {
            let (long_ok, short_ok) = leg_presence.get(&p.id).copied().unwrap_or((true, true));
            if long_ok != short_ok {
                Some(p.id)
            } else {
                None
            }
        })
        .collect();

    ReconcileResult { synthetic_allocations, closed_allocation_ids, orphan_leg_positions }
}
