//! Bootstrap binary for the funding-rate arbitrage core.
//!
//! Wires the six components (§4) together over the in-process `TopicBus`,
//! spawns the periodic loops spec §4.5/§4.3/§4.6 call for, and dispatches
//! bus events to the component each one belongs to. The REST/WebSocket
//! gateway, venue adapters, and the persistent store's production backend
//! are out of scope (§1) — this binary runs the core with whatever
//! `VenueAdapter`s a deployment registers and a local `SqlitePersistentStore`
//! standing in for the external database.

use anyhow::Result;
use funding_arb_core::activity::{ActivityCategory, ActivityEvent, Severity};
use funding_arb_core::allocator::CapitalAllocator;
use funding_arb_core::bus::{DedupeWindow, TopicBus};
use funding_arb_core::config::Config;
use funding_arb_core::events::{CapitalEvent, CoreEvent, ExecutionResult};
use funding_arb_core::execution::ExecutionCoordinator;
use funding_arb_core::market_cache::MarketStateCache;
use funding_arb_core::models::{BotAction, Symbol, VenueId};
use funding_arb_core::opportunity::{ExternalContext, OpportunityEngine, VenueFees};
use funding_arb_core::position::PositionManager;
use funding_arb_core::risk::RiskController;
use funding_arb_core::store::{PersistentStore, SqlitePersistentStore};
use funding_arb_core::venue::VenueAdapter;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Running equity and the realized P&L accumulated since the last 5-minute
/// sample (§4.6 "Record P&L snapshots every 5 min"). `current` feeds
/// `RiskController::record_equity` on every position close so the drawdown
/// breaker sees realized losses immediately; `pnl_since_sample` is drained
/// into `record_pnl_sample` by the periodic sampler loop.
struct EquityTracker {
    current: Decimal,
    capital_base: Decimal,
    pnl_since_sample: Decimal,
}

impl EquityTracker {
    fn new(initial_capital: Decimal) -> Self {
        Self { current: initial_capital, capital_base: initial_capital, pnl_since_sample: Decimal::ZERO }
    }

    fn apply_realized_pnl(&mut self, pnl: Decimal) -> Decimal {
        self.current += pnl;
        self.pnl_since_sample += pnl;
        self.current
    }

    /// Drains the accumulated P&L as a fraction of the starting capital base
    /// and resets the accumulator for the next sampling window.
    fn take_sample(&mut self) -> f64 {
        let capital = if self.capital_base.is_zero() { Decimal::ONE } else { self.capital_base };
        let pct = (self.pnl_since_sample / capital).to_f64().unwrap_or(0.0);
        self.pnl_since_sample = Decimal::ZERO;
        pct
    }
}

/// Everything the bootstrap needs to keep alive for the process lifetime.
/// One `Arc` per component, matching the single-writer-per-component
/// ownership rule of §3 "Ownership".
struct Engine {
    cache: Arc<MarketStateCache>,
    opportunity: Arc<OpportunityEngine>,
    allocator: Arc<CapitalAllocator>,
    execution: Arc<ExecutionCoordinator>,
    positions: Arc<PositionManager>,
    risk: Arc<RiskController>,
    bus: Arc<TopicBus>,
    equity: Arc<Mutex<EquityTracker>>,
    config: Config,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funding_arb_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Adapters are registered by deployment-specific configuration (§6 "Venue
/// adapter contract"); this crate ships no concrete venue client (§1). A
/// real bootstrap populates this map from `config.exchanges`; it is empty
/// by default so the binary still runs end-to-end (minus any live trading)
/// with nothing configured.
fn build_adapters() -> HashMap<VenueId, Arc<dyn VenueAdapter>> {
    HashMap::new()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("funding-arb-core starting");

    let config = Config::from_env()?;
    let bus = Arc::new(TopicBus::new());
    let cache = Arc::new(MarketStateCache::new());
    let risk = Arc::new(RiskController::new(config.initial_capital_usd, config.risk.clone()));
    let opportunity = Arc::new(OpportunityEngine::new(cache.clone(), bus.clone(), config.opportunity.clone()));
    let allocator = Arc::new(CapitalAllocator::new(config.allocation.clone(), bus.clone(), risk.clone()));
    let adapters = build_adapters();
    if adapters.is_empty() {
        warn!("no venue adapters registered; running with market data and order flow idle");
    }
    let execution = Arc::new(ExecutionCoordinator::new(adapters.clone(), bus.clone(), risk.clone()));
    let store: Arc<dyn PersistentStore> = Arc::new(SqlitePersistentStore::new(&config.database_path)?);
    let positions = Arc::new(PositionManager::new(cache.clone(), bus.clone(), store.clone(), adapters, config.position.clone()));

    reconcile_on_startup(&allocator, &store).await;

    let equity = Arc::new(Mutex::new(EquityTracker::new(config.initial_capital_usd)));

    let engine = Engine {
        cache,
        opportunity,
        allocator,
        execution,
        positions,
        risk,
        bus: bus.clone(),
        equity,
        config,
    };

    let dispatcher = tokio::spawn(run_dispatcher(
        bus.subscribe(),
        engine.opportunity.clone(),
        engine.allocator.clone(),
        engine.execution.clone(),
        engine.positions.clone(),
        engine.risk.clone(),
        engine.equity.clone(),
    ));

    let periodic = spawn_periodic_loops(&engine);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down, waiting up to 30s for periodic loops");
    dispatcher.abort();
    for handle in periodic {
        handle.abort();
    }
    let _ = tokio::time::timeout(Duration::from_secs(30), tokio::task::yield_now()).await;
    info!("funding-arb-core stopped");
    Ok(())
}

/// Rebuild the in-memory allocation set from the store's open positions on
/// startup (§4.3 "Recovery and reconciliation"). The database is
/// authoritative for coin count; orphaned allocations or positions are
/// reported as activity events rather than silently dropped.
async fn reconcile_on_startup(allocator: &Arc<CapitalAllocator>, store: &Arc<dyn PersistentStore>) {
    match store.load_open_positions().await {
        Ok(open_positions) => {
            // No venue adapters are wired in this bootstrap (§1), so leg
            // presence can't be cross-checked against live orders; an empty
            // map treats every position's legs as present per the
            // reconciliation contract's "unknown" default.
            let leg_presence = HashMap::new();
            let result = allocator.reconcile_from_store(&open_positions, &leg_presence);
            info!(
                synthesized = result.synthetic_allocations.len(),
                closed_orphans = result.closed_allocation_ids.len(),
                leg_orphans = result.orphan_leg_positions.len(),
                "startup reconciliation complete"
            );
        }
        Err(err) => {
            warn!(%err, "reconciliation query failed, starting with an empty allocation set");
        }
    }
}

/// Single consumer draining the bus and routing each event to the
/// component that owns the next step, mirroring the steady-state data
/// flow of spec §2: opportunity -> allocation -> execution request ->
/// execution result -> position lifecycle -> capital/risk release.
async fn run_dispatcher(
    mut rx: tokio::sync::broadcast::Receiver<funding_arb_core::bus::Envelope>,
    opportunity: Arc<OpportunityEngine>,
    allocator: Arc<CapitalAllocator>,
    execution: Arc<ExecutionCoordinator>,
    positions: Arc<PositionManager>,
    risk: Arc<RiskController>,
    equity: Arc<Mutex<EquityTracker>>,
) {
    let _ = &opportunity; // C2 is driven by the scan loop below, not by bus events.
    let mut dedupe = DedupeWindow::new();

    loop {
        let envelope = match rx.recv().await {
            Ok(e) => e,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "bus dispatcher lagged, continuing from latest");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        if !dedupe.observe(envelope.event_id) {
            continue; // at-least-once delivery: a redelivered event is a no-op (§5).
        }

        match envelope.event {
            CoreEvent::OpportunityDetected(detected) => {
                let opportunity = detected.0;
                if opportunity.verdict == BotAction::AutoTrade {
                    match allocator.size_and_allocate(&opportunity, None) {
                        Ok(allocation) => {
                            info!(allocation_id = %allocation.id, symbol = %allocation.symbol, "allocation sized for auto-trade opportunity");
                        }
                        Err(err) => {
                            ActivityEvent::builder(
                                ActivityCategory::Capital,
                                "capital.allocation_rejected",
                                format!("allocation rejected: {err}"),
                            )
                            .severity(Severity::Warning)
                            .opportunity(opportunity.id)
                            .symbol(opportunity.symbol.clone())
                            .build()
                            .log();
                        }
                    }
                }
            }
            CoreEvent::ExecutionRequest(request) => {
                let execution = execution.clone();
                let allocator = allocator.clone();
                tokio::spawn(async move {
                    if let Err(err) = execution.execute(&request).await {
                        warn!(allocation_id = %request.allocation_id, %err, "execution request failed");
                        allocator.on_execution_failed(request.allocation_id);
                    }
                });
            }
            CoreEvent::ExecutionResult(result) => match result {
                ExecutionResult::PositionOpened {
                    allocation_id,
                    position_id,
                    symbol,
                    long_venue,
                    short_venue,
                    size_usd,
                    entry_price,
                    ..
                } => {
                    risk.apply_exposure_delta(&long_venue, &short_venue, &symbol, size_usd);
                    allocator.on_position_opened(allocation_id, position_id);
                    positions
                        .open_position(allocation_id, position_id, symbol, long_venue, short_venue, size_usd, entry_price)
                        .await;
                }
                ExecutionResult::ExecutionFailed { allocation_id, reason } => {
                    warn!(%allocation_id, reason, "execution failed, releasing capital");
                    allocator.on_execution_failed(allocation_id);
                }
                ExecutionResult::PositionClosed { position_id, realized_pnl } => {
                    if let Some(position) = positions.position(position_id) {
                        risk.apply_exposure_delta(&position.long_venue, &position.short_venue, &position.symbol, -position.size_usd);
                    }
                    let current_equity = equity.lock().apply_realized_pnl(realized_pnl);
                    risk.record_equity(current_equity);
                    positions.on_position_closed(position_id, realized_pnl).await;
                }
                ExecutionResult::OrdersUpdated { .. } => {}
            },
            CoreEvent::ExecutionCloseRequest(request) => {
                if let Some(position) = positions.position(request.position_id) {
                    let execution = execution.clone();
                    let allocator = allocator.clone();
                    tokio::spawn(async move {
                        match execution.close(&request, &position.long_venue, &position.short_venue, &position.symbol).await {
                            Ok(realized_pnl) => {
                                if let Some(allocation) = allocator.allocation_for_position(position.id) {
                                    allocator.on_position_closed(allocation.id, realized_pnl);
                                }
                            }
                            Err(err) => warn!(position_id = %request.position_id, %err, "close protocol failed"),
                        }
                    });
                } else {
                    ActivityEvent::builder(
                        ActivityCategory::Position,
                        "position.close_unknown",
                        format!("close-request for unknown position {}", request.position_id),
                    )
                    .severity(Severity::Error)
                    .build()
                    .log();
                }
            }
            CoreEvent::Capital(CapitalEvent::AutoUnwind { allocation_id, position_id, reason }) => {
                info!(%allocation_id, %position_id, reason, "auto-unwind close-request issued");
            }
            CoreEvent::Risk(_) | CoreEvent::Capital(_) | CoreEvent::System(_) | CoreEvent::Activity(_) | CoreEvent::Market(_) => {}
        }
    }
}

/// Spawns one task per periodic loop named in §4.3/§4.5/§4.6. Per §9
/// "Coroutine/async control flow", each loop is one task that iterates its
/// component's full working set on every tick, not one task per position.
fn spawn_periodic_loops(engine: &Engine) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    // C5 health monitor (30s, §4.5).
    {
        let positions = engine.positions.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                positions.health_tick().await;
            }
        }));
    }
    // C5 funding tracker (60s, §4.5).
    {
        let positions = engine.positions.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                positions.funding_tick().await;
            }
        }));
    }
    // C5 price updater (10s, §4.5).
    {
        let positions = engine.positions.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                positions.price_update_tick().await;
            }
        }));
    }
    // C5 state publisher (30s, §4.5).
    {
        let positions = engine.positions.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                positions.state_publish_tick();
            }
        }));
    }
    // C5 correlation/rebalance (30s, §4.5).
    {
        let positions = engine.positions.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                positions.correlation_rebalance_tick().await;
            }
        }));
    }
    // C4 partial-fill monitor (5s, §4.4).
    {
        let execution = engine.execution.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(funding_arb_core::execution::POLL_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                execution.poll_partial_fills().await;
            }
        }));
    }
    // C3 concurrent-coin-cap enforcement (60s, §4.3).
    {
        let allocator = engine.allocator.clone();
        let positions = engine.positions.clone();
        let period = engine.config.allocation.coin_cap_enforcement_interval_secs;
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(period));
            loop {
                ticker.tick().await;
                let snapshot: HashMap<_, _> = positions
                    .open_positions()
                    .into_iter()
                    .map(|p| (p.id, p))
                    .collect();
                allocator.enforce_coin_cap(&snapshot);
            }
        }));
    }
    // C6 risk snapshot publish (>=10s, §4.6).
    {
        let risk = engine.risk.clone();
        let bus = engine.bus.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                let snapshot = risk.snapshot();
                bus.publish(CoreEvent::Risk(funding_arb_core::events::RiskEvent::StateUpdated(Box::new((&snapshot).into()))));
            }
        }));
    }
    // C6 P&L snapshot sampler (every 5 min, up to 252 samples, §4.6).
    {
        let risk = engine.risk.clone();
        let equity = engine.equity.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(300));
            loop {
                ticker.tick().await;
                let pct_return = equity.lock().take_sample();
                risk.record_pnl_sample(pct_return);
            }
        }));
    }
    // C2 opportunity scan: recompute every candidate pair on a fixed tick.
    // The production system drives this from fresh market-data ticks (§4.2
    // "on each venue/symbol update"); this bootstrap also sweeps on a timer
    // so a quiet market still re-evaluates stale verdicts.
    {
        let cache = engine.cache.clone();
        let opportunity = engine.opportunity.clone();
        let allocator = engine.allocator.clone();
        let risk = engine.risk.clone();
        let allocation_cfg = engine.config.allocation.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                scan_all_pairs(&cache, &opportunity, &allocator, &risk, &allocation_cfg);
            }
        }));
    }

    handles
}

/// Enumerates every (long, short) venue pair for every symbol the Market
/// State Cache has data for and asks C2 to recompute each one (§4.2).
fn scan_all_pairs(
    cache: &Arc<MarketStateCache>,
    opportunity: &Arc<OpportunityEngine>,
    allocator: &Arc<CapitalAllocator>,
    risk: &Arc<RiskController>,
    allocation_cfg: &funding_arb_core::config::AllocationConfig,
) {
    let venues: Vec<VenueId> = cache.all_venue_health().into_iter().map(|h| h.venue).collect();
    let mut symbols: HashSet<Symbol> = HashSet::new();
    for venue in &venues {
        symbols.extend(cache.symbols_on_venue(venue));
    }

    let active_symbols = allocator.active_symbols();
    let available_capital = risk.snapshot().available_capital();
    let venue_credentials: HashMap<VenueId, bool> = HashMap::new();
    let blacklisted_symbols: HashSet<Symbol> = HashSet::new();
    let venue_fees: HashMap<VenueId, VenueFees> = HashMap::new();
    let risk_snapshot = risk.snapshot();

    let ctx = ExternalContext {
        system_running: true,
        circuit_breaker_active: risk_snapshot.circuit_breaker_active,
        risk_mode_blocks_trading: matches!(
            risk_snapshot.risk_mode,
            funding_arb_core::models::RiskMode::Discovery | funding_arb_core::models::RiskMode::Emergency
        ),
        active_coin_count: allocator.active_coin_count(),
        max_concurrent_coins: allocation_cfg.max_concurrent_coins,
        active_symbols: &active_symbols,
        available_capital,
        min_allocation_usd: allocation_cfg.min_allocation_usd,
        venue_credentials: &venue_credentials,
        blacklisted_symbols: &blacklisted_symbols,
        venue_fees: &venue_fees,
    };

    for symbol in symbols {
        for long_venue in &venues {
            for short_venue in &venues {
                if long_venue == short_venue {
                    continue;
                }
                opportunity.recompute_pair(&symbol, long_venue, short_venue, &ctx);
            }
        }
    }
}
