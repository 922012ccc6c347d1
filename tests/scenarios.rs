//! Multi-component integration tests (spec §8 scenarios): a candidate pair
//! detected by the Opportunity Engine flowing through allocation, paired
//! execution, and position bookkeeping, plus the risk controller's
//! drawdown circuit breaker and the allocator's coin-cap auto-unwind.

use async_trait::async_trait;
use funding_arb_core::allocator::CapitalAllocator;
use funding_arb_core::bus::TopicBus;
use funding_arb_core::config::{AllocationConfig, OpportunityConfig, RiskConfig};
use funding_arb_core::models::{
    AllocationState, BotAction, FundingRate, HealthState, Order, Position, PositionId,
    PositionState, Quote, RateSource, Symbol, VenueId, VenueTier,
};
use funding_arb_core::execution::ExecutionCoordinator;
use funding_arb_core::market_cache::MarketStateCache;
use funding_arb_core::opportunity::{ExternalContext, OpportunityEngine};
use funding_arb_core::risk::RiskController;
use funding_arb_core::venue::{
    CancelResult, LiquiditySnapshot, PlaceOrderResult, Ticker, VenueAdapter, VenuePosition,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct MockAdapter {
    venue: VenueId,
    fail_orders: AtomicBool,
    last_price: Decimal,
}

impl MockAdapter {
    fn new(venue: &str, last_price: Decimal) -> Self {
        Self { venue: VenueId::from(venue), fail_orders: AtomicBool::new(false), last_price }
    }

    fn failing(venue: &str, last_price: Decimal) -> Self {
        let adapter = Self::new(venue, last_price);
        adapter.fail_orders.store(true, Ordering::SeqCst);
        adapter
    }
}

#[async_trait]
impl VenueAdapter for MockAdapter {
    fn venue_id(&self) -> VenueId {
        self.venue.clone()
    }
    async fn get_funding_rates(&self) -> anyhow::Result<Vec<FundingRate>> {
        Ok(vec![])
    }
    async fn get_prices(&self) -> anyhow::Result<Vec<Quote>> {
        Ok(vec![])
    }
    async fn get_liquidity(&self) -> anyhow::Result<Vec<LiquiditySnapshot>> {
        Ok(vec![])
    }
    async fn get_positions(&self) -> anyhow::Result<Vec<VenuePosition>> {
        Ok(vec![])
    }
    async fn get_orders(&self, _symbol: &Symbol) -> anyhow::Result<Vec<Order>> {
        Ok(vec![])
    }
    async fn get_ticker(&self, _symbol: &Symbol) -> anyhow::Result<Ticker> {
        Ok(Ticker { last: self.last_price })
    }
    async fn get_min_order_size(&self, _symbol: &Symbol) -> anyhow::Result<Decimal> {
        Ok(dec!(0.001))
    }
    async fn place_order(
        &self,
        _symbol: &Symbol,
        _side: funding_arb_core::models::Side,
        _size: Decimal,
        _price: Option<Decimal>,
        _order_type: funding_arb_core::models::OrderType,
        _reduce_only: bool,
    ) -> anyhow::Result<PlaceOrderResult> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Ok(PlaceOrderResult {
                success: false,
                order_id: None,
                fee: None,
                average_price: None,
                status: "rejected".to_string(),
            });
        }
        Ok(PlaceOrderResult {
            success: true,
            order_id: Some("sim-1".to_string()),
            fee: Some(dec!(1)),
            average_price: Some(self.last_price),
            status: "filled".to_string(),
        })
    }
    async fn cancel_order(&self, _symbol: &Symbol, _id: &str) -> anyhow::Result<CancelResult> {
        Ok(CancelResult { success: true })
    }
    fn has_credentials(&self) -> bool {
        true
    }
}

fn sample_quote(venue: &str, symbol: &str) -> Quote {
    Quote {
        venue: VenueId::from(venue),
        symbol: Symbol::from(symbol),
        bid: dec!(50000),
        ask: dec!(50001),
        last: dec!(50000.5),
        mark: Some(dec!(50000.5)),
        bid_depth_usd: dec!(5000000),
        ask_depth_usd: dec!(5000000),
        open_interest_usd: dec!(20000000),
        volume_24h_usd: dec!(50000000),
        last_update: chrono::Utc::now(),
    }
}

fn sample_rate(venue: &str, symbol: &str, rate: Decimal) -> FundingRate {
    FundingRate {
        venue: VenueId::from(venue),
        symbol: Symbol::from(symbol),
        current_rate: rate,
        predicted_next_rate: None,
        next_funding_time: chrono::Utc::now() + chrono::Duration::hours(8),
        funding_interval_hours: 8,
        source: RateSource::Primary,
        last_update: chrono::Utc::now(),
    }
}

fn detect_auto_trade_opportunity(cache: &Arc<MarketStateCache>) -> funding_arb_core::models::Opportunity {
    cache.register_venue(VenueId::from("L"), VenueTier::Primary);
    cache.register_venue(VenueId::from("S"), VenueTier::Primary);
    cache.update_funding(sample_rate("L", "BTC-PERP", dec!(0.0001))).unwrap();
    cache.update_funding(sample_rate("S", "BTC-PERP", dec!(0.0008))).unwrap();
    cache.update_quote(sample_quote("L", "BTC-PERP"));
    cache.update_quote(sample_quote("S", "BTC-PERP"));

    let bus = Arc::new(TopicBus::default());
    let mut opp_config = OpportunityConfig::default();
    opp_config.auto_execute = true;
    opp_config.auto_uos_threshold = 1;
    opp_config.min_uos_score = 1;
    let engine = OpportunityEngine::new(cache.clone(), bus, opp_config);

    let active_symbols = HashSet::new();
    let mut venue_credentials = HashMap::new();
    venue_credentials.insert(VenueId::from("L"), true);
    venue_credentials.insert(VenueId::from("S"), true);
    let blacklisted = HashSet::new();
    let venue_fees = HashMap::new();

    let ctx = ExternalContext {
        system_running: true,
        circuit_breaker_active: false,
        risk_mode_blocks_trading: false,
        active_coin_count: 0,
        max_concurrent_coins: 10,
        active_symbols: &active_symbols,
        available_capital: dec!(8000),
        min_allocation_usd: dec!(100),
        venue_credentials: &venue_credentials,
        blacklisted_symbols: &blacklisted,
        venue_fees: &venue_fees,
    };

    let opportunity = engine
        .recompute_pair(&Symbol::from("BTC-PERP"), &VenueId::from("L"), &VenueId::from("S"), &ctx)
        .expect("both legs healthy with data");
    assert_eq!(opportunity.verdict, BotAction::AutoTrade);
    opportunity
}

/// Opportunity -> allocation -> paired submission -> position open, with
/// both legs filling cleanly.
#[tokio::test]
async fn happy_auto_trade_opens_a_hedged_position() {
    let cache = Arc::new(MarketStateCache::new());
    let opportunity = detect_auto_trade_opportunity(&cache);

    let bus = Arc::new(TopicBus::default());
    let risk = Arc::new(RiskController::new(dec!(100000), RiskConfig::default()));
    let allocator = CapitalAllocator::new(AllocationConfig::default(), bus.clone(), risk.clone());

    let allocation = allocator.size_and_allocate(&opportunity, None).expect("sizing approved");
    assert_eq!(allocation.state, AllocationState::Executing);
    assert!(allocation.size_usd > Decimal::ZERO);

    let mut adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
    adapters.insert(VenueId::from("L"), Arc::new(MockAdapter::new("L", dec!(50000))));
    adapters.insert(VenueId::from("S"), Arc::new(MockAdapter::new("S", dec!(50000))));
    let execution = ExecutionCoordinator::new(adapters, bus.clone(), risk.clone());

    let request = funding_arb_core::events::ExecutionRequest {
        allocation_id: allocation.id,
        symbol: allocation.symbol.clone(),
        long_venue: allocation.long_venue.clone(),
        short_venue: allocation.short_venue.clone(),
        size_usd: allocation.size_usd,
        max_slippage_pct: None,
    };
    let position_id = execution.execute(&request).await.expect("both legs fill");
    allocator.on_position_opened(allocation.id, position_id);

    let resolved = allocator.allocation_for_position(position_id).expect("indexed by position");
    assert_eq!(resolved.id, allocation.id);
    assert_eq!(resolved.state, AllocationState::Active);
}

/// One leg's adapter rejects the order: the coordinator must emergency-close
/// the filled leg and release the allocation's capital rather than leaving a
/// naked position.
#[tokio::test]
async fn single_leg_failure_releases_allocation_without_opening_a_position() {
    let cache = Arc::new(MarketStateCache::new());
    let opportunity = detect_auto_trade_opportunity(&cache);

    let bus = Arc::new(TopicBus::default());
    let risk = Arc::new(RiskController::new(dec!(100000), RiskConfig::default()));
    let allocator = CapitalAllocator::new(AllocationConfig::default(), bus.clone(), risk.clone());
    let allocation = allocator.size_and_allocate(&opportunity, None).expect("sizing approved");

    let mut adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
    adapters.insert(VenueId::from("L"), Arc::new(MockAdapter::new("L", dec!(50000))));
    adapters.insert(VenueId::from("S"), Arc::new(MockAdapter::failing("S", dec!(50000))));
    let execution = ExecutionCoordinator::new(adapters, bus.clone(), risk.clone());

    let request = funding_arb_core::events::ExecutionRequest {
        allocation_id: allocation.id,
        symbol: allocation.symbol.clone(),
        long_venue: allocation.long_venue.clone(),
        short_venue: allocation.short_venue.clone(),
        size_usd: allocation.size_usd,
        max_slippage_pct: None,
    };
    let result = execution.execute(&request).await;
    assert!(result.is_err(), "short leg failure must surface as an execution error");

    allocator.on_execution_failed(allocation.id);
    let released = allocator.allocation(allocation.id).expect("allocation still tracked");
    assert_eq!(released.state, AllocationState::Failed);
    assert!(released.position_id.is_none(), "no position should have been opened");
}

/// A sharp drop in equity must trip the circuit breaker, and a subsequent
/// execution attempt must be rejected outright rather than opening a
/// position while the breaker is active.
#[tokio::test]
async fn drawdown_breach_trips_circuit_breaker_and_blocks_execution() {
    let risk = Arc::new(RiskController::new(dec!(100000), RiskConfig::default()));
    risk.record_equity(dec!(100000));
    risk.record_equity(dec!(75000)); // 25% drawdown, above the 20% default max.

    let snapshot = risk.snapshot();
    assert!(snapshot.circuit_breaker_active, "25% drawdown must exceed the default 20% max");

    let bus = Arc::new(TopicBus::default());
    let mut adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
    adapters.insert(VenueId::from("L"), Arc::new(MockAdapter::new("L", dec!(50000))));
    adapters.insert(VenueId::from("S"), Arc::new(MockAdapter::new("S", dec!(50000))));
    let execution = ExecutionCoordinator::new(adapters, bus, risk.clone());

    let request = funding_arb_core::events::ExecutionRequest {
        allocation_id: funding_arb_core::models::AllocationId::new(),
        symbol: Symbol::from("BTC-PERP"),
        long_venue: VenueId::from("L"),
        short_venue: VenueId::from("S"),
        size_usd: dec!(1000),
        max_slippage_pct: None,
    };
    let result = execution.execute(&request).await;
    assert!(result.is_err(), "circuit breaker must reject new execution requests");

    risk.reset_circuit_breaker();
    assert!(!risk.snapshot().circuit_breaker_active);
}

/// With the concurrent-coin cap exceeded, the allocator must issue an
/// auto-unwind close-request for the weakest (worst-performing) position,
/// not an arbitrary one.
#[test]
fn coin_cap_breach_auto_unwinds_the_weakest_position() {
    let bus = Arc::new(TopicBus::default());
    let risk = Arc::new(RiskController::new(dec!(100000), RiskConfig::default()));
    let mut allocation_config = AllocationConfig::default();
    allocation_config.max_concurrent_coins = 1;
    let allocator = CapitalAllocator::new(allocation_config, bus.clone(), risk.clone());

    let btc_opportunity = detect_auto_trade_opportunity(&Arc::new(MarketStateCache::new()));
    let mut eth_opportunity = btc_opportunity.clone();
    eth_opportunity.id = funding_arb_core::models::OpportunityId::new();
    eth_opportunity.symbol = Symbol::from("ETH-PERP");

    let btc_allocation = allocator.size_and_allocate(&btc_opportunity, None).expect("btc sized");
    let eth_allocation = allocator.size_and_allocate(&eth_opportunity, None).expect("eth sized");

    let strong_position_id = PositionId::new();
    let weak_position_id = PositionId::new();
    allocator.on_position_opened(btc_allocation.id, strong_position_id);
    allocator.on_position_opened(eth_allocation.id, weak_position_id);

    let mut strong = Position::new(
        strong_position_id,
        Symbol::from("BTC-PERP"),
        VenueId::from("L"),
        VenueId::from("S"),
        dec!(1000),
        dec!(50000),
        dec!(0.0007),
        dec!(0.0001),
        dec!(0.0008),
    );
    strong.state = PositionState::Active;
    strong.health = HealthState::Healthy;
    strong.unrealized_pnl = dec!(50);
    strong.funding_received = dec!(20);

    let mut weak = Position::new(
        weak_position_id,
        Symbol::from("ETH-PERP"),
        VenueId::from("L"),
        VenueId::from("S"),
        dec!(1000),
        dec!(3000),
        dec!(0.0007),
        dec!(0.0001),
        dec!(0.0008),
    );
    weak.state = PositionState::Active;
    weak.health = HealthState::Degraded;
    weak.unrealized_pnl = dec!(-80);
    weak.funding_paid = dec!(30);

    let mut positions = HashMap::new();
    positions.insert(strong_position_id, strong);
    positions.insert(weak_position_id, weak);

    let mut rx = bus.subscribe();
    allocator.enforce_coin_cap(&positions);

    let envelope = rx.try_recv().expect("a close-request must be published");
    match envelope.event {
        funding_arb_core::events::CoreEvent::ExecutionCloseRequest(req) => {
            assert_eq!(req.position_id, weak_position_id, "the losing position must be the one unwound");
        }
        other => panic!("expected an ExecutionCloseRequest, got {other:?}"),
    }
}
