//! Tagged event-family variants (§9 "Dynamic payload shapes"). The source
//! system used free-form maps for event details; this statically-typed
//! core defines one variant per topic named in §5 so consumers can
//! exhaustively match instead of probing a map.

use crate::activity::ActivityEvent;
use crate::models::{
    Allocation, AllocationId, FundingRate, Opportunity, OpportunityId, Order, PositionId, Quote,
    RiskSnapshot, Symbol, VenueHealth, VenueId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub enum MarketEvent {
    Funding(FundingRate),
    Price(Quote),
    Health(VenueHealth),
}

#[derive(Debug, Clone)]
pub struct OpportunityDetected(pub Opportunity);

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub allocation_id: AllocationId,
    pub symbol: Symbol,
    pub long_venue: VenueId,
    pub short_venue: VenueId,
    pub size_usd: Decimal,
    pub max_slippage_pct: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct ExecutionCloseRequest {
    pub position_id: PositionId,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// Both legs filled. Carries everything C5 needs to construct the
    /// Position record it then exclusively owns (§1 "Ownership") — C4
    /// hands off the opening snapshot once, not a reference to mutate.
    PositionOpened {
        allocation_id: AllocationId,
        position_id: PositionId,
        symbol: Symbol,
        long_venue: VenueId,
        short_venue: VenueId,
        size_usd: Decimal,
        entry_price: Decimal,
        entry_spread: Decimal,
        long_funding_rate: Decimal,
        short_funding_rate: Decimal,
    },
    ExecutionFailed { allocation_id: AllocationId, reason: String },
    PositionClosed { position_id: PositionId, realized_pnl: Decimal },
    OrdersUpdated { long: Order, short: Order },
}

#[derive(Debug, Clone)]
pub enum PositionEvent {
    Opened(PositionId),
    Updated(PositionId),
    HealthChanged { position_id: PositionId, reason: Option<String> },
    ExitTriggered { position_id: PositionId, reason: String },
    Closed(PositionId),
    FundingCollected { position_id: PositionId, amount: Decimal, at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub enum RiskEvent {
    StateUpdated(Box<RiskSnapshotSummary>),
    CircuitBreaker { active: bool, reason: String },
}

#[derive(Debug, Clone)]
pub struct RiskSnapshotSummary {
    pub total_exposure: Decimal,
    pub drawdown_pct: Decimal,
    pub circuit_breaker_active: bool,
}

impl From<&RiskSnapshot> for RiskSnapshotSummary {
    fn from(s: &RiskSnapshot) -> Self {
        Self {
            total_exposure: s.total_exposure,
            drawdown_pct: s.current_drawdown_pct,
            circuit_breaker_active: s.circuit_breaker_active,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CapitalEvent {
    Allocated(Allocation),
    Released { allocation_id: AllocationId },
    AutoUnwind { allocation_id: AllocationId, position_id: PositionId, reason: String },
}

#[derive(Debug, Clone)]
pub enum SystemEvent {
    ConfigUpdated,
    ModeChanged { mode: &'static str },
}

/// Union of every family a handler may see on the bus, plus a catch-all for
/// the `opportunity.detected` topic (kept distinct from `OpportunityEvent`
/// since opportunities have exactly one producer topic, not a family).
#[derive(Debug, Clone)]
pub enum CoreEvent {
    Market(MarketEvent),
    OpportunityDetected(OpportunityDetected),
    ExecutionRequest(ExecutionRequest),
    ExecutionCloseRequest(ExecutionCloseRequest),
    ExecutionResult(ExecutionResult),
    Position(PositionEvent),
    Risk(RiskEvent),
    Capital(CapitalEvent),
    System(SystemEvent),
    Activity(ActivityEvent),
}

#[allow(dead_code)]
pub fn opportunity_id_of(e: &OpportunityDetected) -> OpportunityId {
    e.0.id
}
