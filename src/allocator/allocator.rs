//! C3 Capital Allocator orchestrator: sizing pipeline, concurrent-coin cap
//! enforcement, reconciliation entrypoint (§4.3). Exclusively writes
//! Allocation records (§1 "Ownership").

use super::reconcile::{reconcile, ReconcileResult};
use super::sizing::{self, EdgeStats};
use super::weakness;
use crate::bus::TopicBus;
use crate::config::AllocationConfig;
use crate::error::CoreError;
use crate::events::{CapitalEvent, CoreEvent, ExecutionCloseRequest, ExecutionRequest};
use crate::models::{Allocation, AllocationId, AllocationState, Opportunity, Position, PositionId, Symbol};
use crate::risk::RiskController;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

pub struct CapitalAllocator {
    config: AllocationConfig,
    bus: Arc<TopicBus>,
    risk: Arc<RiskController>,
    allocations: RwLock<HashMap<AllocationId, Allocation>>,
}

impl CapitalAllocator {
    pub fn new(config: AllocationConfig, bus: Arc<TopicBus>, risk: Arc<RiskController>) -> Self {
        Self { config, bus, risk, allocations: RwLock::new(HashMap::new()) }
    }

    pub fn active_symbols(&self) -> HashSet<Symbol> {
        self.allocations
            .read()
            .values()
            .filter(|a| !a.state.is_terminal())
            .map(|a| a.symbol.clone())
            .collect()
    }

    pub fn active_coin_count(&self) -> usize {
        self.active_symbols().len()
    }

    pub fn allocation(&self, id: AllocationId) -> Option<Allocation> {
        self.allocations.read().get(&id).cloned()
    }

    /// Keyed indirection for the Allocation/Position cyclic reference
    /// (§9 "Cyclic references between Allocation and Position"): Position
    /// doesn't know its Allocation, so a caller holding only a position-id
    /// consults this index instead.
    pub fn allocation_for_position(&self, position_id: PositionId) -> Option<Allocation> {
        self.allocations
            .read()
            .values()
            .find(|a| a.position_id == Some(position_id))
            .cloned()
    }

    /// The full sizing pipeline of §4.3 steps 1-4. On success, the
    /// allocation is stored PENDING→EXECUTING and an `execution.request`
    /// is published; the caller (C4) owns everything from there.
    pub fn size_and_allocate(
        &self,
        opportunity: &Opportunity,
        edge: Option<&EdgeStats>,
    ) -> Result<Allocation, CoreError> {
        let snapshot = self.risk.snapshot();
        let available_capital = snapshot.available_capital();

        let base = if self.config.use_kelly_criterion {
            match edge {
                Some(e) => sizing::kelly_base_amount(e, available_capital, self.config.min_kelly_edge)?,
                None => sizing::score_weighted_base_amount(
                    available_capital,
                    opportunity.uos_total(),
                    self.config.score_weight_factor,
                ),
            }
        } else {
            sizing::score_weighted_base_amount(
                available_capital,
                opportunity.uos_total(),
                self.config.score_weight_factor,
            )
        };

        let active_symbols: Vec<Symbol> = self.active_symbols().into_iter().collect();
        let rho = sizing::estimate_correlation(&opportunity.symbol, &active_symbols);
        let penalized = sizing::apply_correlation_penalty(base, rho, &self.config);
        let clamped = sizing::clamp_allocation(penalized, available_capital, &self.config);

        let approval = self.risk.validate_trade(
            clamped,
            &opportunity.long_venue,
            &opportunity.short_venue,
            &opportunity.symbol,
        );
        if !approval.approved {
            return Err(CoreError::risk_rejected(approval.reason));
        }
        for warning in &approval.warnings {
            warn!(symbol = %opportunity.symbol, warning, "risk approval warning on allocation");
        }
        let final_size = clamped.min(approval.max_allowed_size);
        if final_size < self.config.min_allocation_usd {
            return Err(CoreError::risk_rejected(format!(
                "risk-capped size {} below min_allocation_usd {}",
                final_size, self.config.min_allocation_usd
            )));
        }

        let mut allocation = Allocation::new(
            opportunity.id,
            opportunity.symbol.clone(),
            opportunity.long_venue.clone(),
            opportunity.short_venue.clone(),
            final_size,
            opportunity.uos_total(),
        );
        allocation.transition(AllocationState::Executing);

        self.allocations.write().insert(allocation.id, allocation.clone());
        self.bus.publish(CoreEvent::Capital(CapitalEvent::Allocated(allocation.clone())));
        self.bus.publish(CoreEvent::ExecutionRequest(ExecutionRequest {
            allocation_id: allocation.id,
            symbol: allocation.symbol.clone(),
            long_venue: allocation.long_venue.clone(),
            short_venue: allocation.short_venue.clone(),
            size_usd: allocation.size_usd,
            max_slippage_pct: None,
        }));

        info!(allocation_id = %allocation.id, symbol = %allocation.symbol, size_usd = %allocation.size_usd, "capital allocated");
        Ok(allocation)
    }

    pub fn on_position_opened(&self, allocation_id: AllocationId, position_id: PositionId) {
        if let Some(allocation) = self.allocations.write().get_mut(&allocation_id) {
            allocation.position_id = Some(position_id);
            allocation.transition(AllocationState::Active);
        }
    }

    pub fn on_execution_failed(&self, allocation_id: AllocationId) {
        if let Some(allocation) = self.allocations.write().get_mut(&allocation_id) {
            allocation.transition(AllocationState::Failed);
        }
        self.bus.publish(CoreEvent::Capital(CapitalEvent::Released { allocation_id }));
    }

    pub fn on_position_closed(&self, allocation_id: AllocationId, realized_pnl: Decimal) {
        let mut allocations = self.allocations.write();
        if let Some(allocation) = allocations.get_mut(&allocation_id) {
            allocation.transition(AllocationState::Closing);
            allocation.transition(AllocationState::Closed);
            allocation.realized_pnl = Some(realized_pnl);
        }
        drop(allocations);
        self.bus.publish(CoreEvent::Capital(CapitalEvent::Released { allocation_id }));
    }

    /// Periodic (60 s) and on-allocation-attempt enforcement of the
    /// concurrent-coin cap (§4.3). Needs a snapshot of positions keyed by
    /// id since Position records are owned by C5, not C3.
    pub fn enforce_coin_cap(&self, positions: &HashMap<PositionId, Position>) {
        let allocations = self.allocations.read();
        let active_symbols: HashSet<Symbol> = allocations
            .values()
            .filter(|a| !a.state.is_terminal())
            .map(|a| a.symbol.clone())
            .collect();
        metrics::gauge!("allocator.active_coin_count").set(active_symbols.len() as f64);
        if active_symbols.len() <= self.config.max_concurrent_coins {
            return;
        }
        let excess = active_symbols.len() - self.config.max_concurrent_coins;
        metrics::counter!("allocator.coin_cap_excess").increment(excess as u64);

        let now = Utc::now();
        let mut scored = Vec::new();
        let mut allocation_by_position = HashMap::new();
        for allocation in allocations.values().filter(|a| !a.state.is_terminal()) {
            if let Some(position_id) = allocation.position_id {
                if let Some(position) = positions.get(&position_id) {
                    scored.push((position_id, weakness::weakness_score_for(position, now)));
                    allocation_by_position.insert(position_id, allocation.id);
                }
            }
        }
        drop(allocations);

        let to_close = weakness::select_unwind_candidates(scored, excess);
        for position_id in to_close {
            self.bus.publish(CoreEvent::ExecutionCloseRequest(ExecutionCloseRequest {
                position_id,
                reason: "auto-unwind: concurrent-coin cap exceeded".to_string(),
            }));
            if let Some(&allocation_id) = allocation_by_position.get(&position_id) {
                self.bus.publish(CoreEvent::Capital(CapitalEvent::AutoUnwind {
                    allocation_id,
                    position_id,
                    reason: "concurrent-coin cap exceeded".to_string(),
                }));
            }
            info!(%position_id, "auto-unwind issued: concurrent-coin cap exceeded");
        }
    }

    /// Startup recovery (§4.3 "Recovery and reconciliation"). The database
    /// is authoritative for coin count; this merges synthetic allocations
    /// in and drops cached ones whose position vanished.
    pub fn reconcile_from_store(
        &self,
        open_positions: &[Position],
        leg_presence: &HashMap<PositionId, (bool, bool)>,
    ) -> ReconcileResult {
        let started = std::time::Instant::now();
        let cached: Vec<Allocation> = self.allocations.read().values().cloned().collect();
        let result = reconcile(&cached, open_positions, leg_presence);
        metrics::histogram!("allocator.reconciliation_ms").record(started.elapsed().as_millis() as f64);
        metrics::counter!("allocator.reconciliation_synthetic_allocations").increment(result.synthetic_allocations.len() as u64);
        metrics::counter!("allocator.reconciliation_orphan_legs").increment(result.orphan_leg_positions.len() as u64);

        let mut allocations = self.allocations.write();
        for allocation in &result.synthetic_allocations {
            allocations.insert(allocation.id, allocation.clone());
        }
        for id in &result.closed_allocation_ids {
            if let Some(allocation) = allocations.get_mut(id) {
                allocation.transition(AllocationState::Closing);
                allocation.transition(AllocationState::Closed);
            }
        }
        drop(allocations);

        for position_id in &result.orphan_leg_positions {
            warn!(%position_id, "reconciliation found a leg-only orphan position");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::models::{Quote, UosScore, VenueId};
    use rust_decimal_macros::dec;

    fn sample_opportunity() -> Opportunity {
        Opportunity {
            id: crate::models::OpportunityId::new(),
            symbol: Symbol::from("BTC-PERP"),
            long_venue: VenueId::from("alpha"),
            short_venue: VenueId::from("beta"),
            gross_spread: dec!(0.0007),
            annualized_apr: dec!(0.3),
            estimated_net_apr: dec!(0.15),
            uos: UosScore { return_score: 25, risk_score: 25, execution_score: 20, timing_score: 10 },
            verdict: crate::models::BotAction::AutoTrade,
            verdict_details: vec![],
            long_quote: sample_quote("alpha"),
            short_quote: sample_quote("beta"),
            detected_at: Utc::now(),
        }
    }

    fn sample_quote(venue: &str) -> Quote {
        Quote {
            venue: VenueId::from(venue),
            symbol: Symbol::from("BTC-PERP"),
            bid: dec!(50000),
            ask: dec!(50001),
            last: dec!(50000.5),
            mark: Some(dec!(50000.5)),
            bid_depth_usd: dec!(1000000),
            ask_depth_usd: dec!(1000000),
            open_interest_usd: dec!(10000000),
            volume_24h_usd: dec!(50000000),
            last_update: Utc::now(),
        }
    }

    #[test]
    fn sizes_and_allocates_within_clamp() {
        let bus = Arc::new(TopicBus::default());
        let risk = Arc::new(RiskController::new(dec!(100000), RiskConfig::default()));
        let allocator = CapitalAllocator::new(AllocationConfig::default(), bus, risk);

        let opportunity = sample_opportunity();
        let allocation = allocator.size_and_allocate(&opportunity, None).unwrap();
        assert_eq!(allocation.state, AllocationState::Executing);
        assert!(allocation.size_usd >= AllocationConfig::default().min_allocation_usd);
    }

    #[test]
    fn coin_cap_enforcement_issues_close_for_weakest() {
        let bus = Arc::new(TopicBus::default());
        let risk = Arc::new(RiskController::new(dec!(100000), RiskConfig::default()));
        let mut config = AllocationConfig::default();
        config.max_concurrent_coins = 1;
        let allocator = CapitalAllocator::new(config, bus, risk);

        let opp1 = sample_opportunity();
        let mut opp2 = sample_opportunity();
        opp2.symbol = Symbol::from("ETH-PERP");

        let alloc1 = allocator.size_and_allocate(&opp1, None).unwrap();
        let alloc2 = allocator.size_and_allocate(&opp2, None).unwrap();

        let pos1 = Position::new(
            PositionId::new(),
            opp1.symbol.clone(),
            opp1.long_venue.clone(),
            opp1.short_venue.clone(),
            alloc1.size_usd,
            dec!(50000),
            dec!(0.0007),
            dec!(0.0001),
            dec!(0.0008),
        );
        let mut pos2 = Position::new(
            PositionId::new(),
            opp2.symbol.clone(),
            opp2.long_venue.clone(),
            opp2.short_venue.clone(),
            alloc2.size_usd,
            dec!(3000),
            dec!(0.0007),
            dec!(0.0001),
            dec!(0.0008),
        );
        pos2.unrealized_pnl = dec!(-500);

        allocator.on_position_opened(alloc1.id, pos1.id);
        allocator.on_position_opened(alloc2.id, pos2.id);

        let mut positions = HashMap::new();
        positions.insert(pos1.id, pos1);
        positions.insert(pos2.id, pos2);

        // Coin-cap enforcement publishes a close request for the weakest
        // position; it doesn't mutate allocation state itself (C4/C5 do,
        // on processing the close), so the book stays at 2 active coins.
        allocator.enforce_coin_cap(&positions);
        assert_eq!(allocator.active_coin_count(), 2);
    }
}
