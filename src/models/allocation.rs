//! Allocation state machine (§3).

use super::ids::{AllocationId, OpportunityId, PositionId, Symbol, VenueId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    Pending,
    Executing,
    Active,
    Closing,
    Closed,
    Failed,
    Cancelled,
}

impl AllocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AllocationState::Closed | AllocationState::Failed | AllocationState::Cancelled)
    }

    /// Ordering enforced per §5: EXECUTING precedes ACTIVE precedes CLOSING
    /// precedes CLOSED. Violating transitions are dropped by the caller.
    pub fn can_transition_to(&self, next: AllocationState) -> bool {
        use AllocationState::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Executing, Active)
                | (Executing, Failed)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    /// Weak reference: the opportunity may already be invalidated.
    pub opportunity_id: OpportunityId,
    pub symbol: Symbol,
    pub long_venue: VenueId,
    pub short_venue: VenueId,
    pub size_usd: Decimal,
    pub uos_at_entry: u8,
    pub state: AllocationState,
    pub position_id: Option<PositionId>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
    /// Mirrored from the owning Position while ACTIVE.
    pub unrealized_pnl: Decimal,
    pub net_funding_collected: Decimal,
}

impl Allocation {
    pub fn new(
        opportunity_id: OpportunityId,
        symbol: Symbol,
        long_venue: VenueId,
        short_venue: VenueId,
        size_usd: Decimal,
        uos_at_entry: u8,
    ) -> Self {
        Self {
            id: AllocationId::new(),
            opportunity_id,
            symbol,
            long_venue,
            short_venue,
            size_usd,
            uos_at_entry,
            state: AllocationState::Pending,
            position_id: None,
            created_at: Utc::now(),
            executed_at: None,
            closed_at: None,
            realized_pnl: None,
            unrealized_pnl: Decimal::ZERO,
            net_funding_collected: Decimal::ZERO,
        }
    }

    /// Attempt a state transition, honoring the ordering invariant of §5.
    /// Returns false (and leaves state unchanged) on an out-of-order
    /// transition so the caller can drop the late event per §5.
    pub fn transition(&mut self, next: AllocationState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        match next {
            AllocationState::Executing => self.executed_at = Some(Utc::now()),
            AllocationState::Closed => self.closed_at = Some(Utc::now()),
            _ => {}
        }
        self.state = next;
        true
    }
}
