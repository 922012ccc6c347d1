//! C4 Execution Coordinator (§4.4): pre-trade checks, paired submission,
//! outcome-matrix cleanup, close protocol. Owns Order linkage exclusively
//! (§1 "Ownership") — generalized from `arbitrage/engine.rs`'s
//! `TradeLeg`/`ExecutionPlan` two-leg shape into the paired-order state
//! machine and outcome matrix spec §4.4 specifies.

use super::order_tracker;
use crate::error::{CoreError, CoreResult};
use crate::events::{CoreEvent, ExecutionCloseRequest, ExecutionRequest, ExecutionResult};
use crate::bus::TopicBus;
use crate::models::{Order, OrderId, OrderState, OrderType, PositionId, Side, Symbol, VenueId};
use crate::risk::RiskController;
use crate::venue::VenueAdapter;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// If minimum order size's notional exceeds this multiple of the intended
/// size, the request is aborted rather than rounded up (§4.4).
const MIN_ORDER_NOTIONAL_ABORT_MULTIPLE: Decimal = dec!(2);

pub struct ExecutionCoordinator {
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    bus: Arc<TopicBus>,
    risk: Arc<RiskController>,
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl ExecutionCoordinator {
    pub fn new(adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>, bus: Arc<TopicBus>, risk: Arc<RiskController>) -> Self {
        Self { adapters, bus, risk, orders: RwLock::new(HashMap::new()) }
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.orders.read().get(&id).cloned()
    }

    fn adapter(&self, venue: &VenueId) -> CoreResult<&Arc<dyn VenueAdapter>> {
        self.adapters
            .get(venue)
            .ok_or_else(|| CoreError::validation(format!("no venue adapter registered for {}", venue)))
    }

    /// §4.4 "Request" + "Pre-trade checks" + "Submission" + "Outcome matrix".
    pub async fn execute(&self, request: &ExecutionRequest) -> CoreResult<PositionId> {
        let snapshot = self.risk.snapshot();
        if snapshot.circuit_breaker_active {
            self.fail(request, "circuit breaker active").await;
            return Err(CoreError::risk_rejected("circuit breaker active"));
        }
        if snapshot.risk_mode == crate::models::RiskMode::Emergency {
            self.fail(request, "risk mode is EMERGENCY").await;
            return Err(CoreError::risk_rejected("risk mode is EMERGENCY"));
        }

        let long_adapter = self.adapter(&request.long_venue)?;
        let short_adapter = self.adapter(&request.short_venue)?;

        let price = match long_adapter.get_ticker(&request.symbol).await {
            Ok(t) => t.last,
            Err(_) => short_adapter
                .get_ticker(&request.symbol)
                .await
                .map_err(|e| CoreError::transient(request.short_venue.to_string(), e.to_string()))?
                .last,
        };
        if price.is_zero() {
            self.fail(request, "zero reference price").await;
            return Err(CoreError::validation("zero reference price"));
        }
        let base_size = request.size_usd / price;

        for (venue, adapter) in [(&request.long_venue, long_adapter), (&request.short_venue, short_adapter)] {
            let min_size = adapter
                .get_min_order_size(&request.symbol)
                .await
                .map_err(|e| CoreError::transient(venue.to_string(), e.to_string()))?;
            let min_notional = min_size * price;
            if min_notional > request.size_usd * MIN_ORDER_NOTIONAL_ABORT_MULTIPLE {
                self.fail(request, &format!("{} minimum order size exceeds 2x requested notional", venue)).await;
                return Err(CoreError::validation(format!(
                    "{} min order notional {} exceeds 2x requested {}",
                    venue, min_notional, request.size_usd
                )));
            }
        }

        let paired_id = OrderId::new();
        let long_order = new_order(request.long_venue.clone(), request.symbol.clone(), Side::Buy, base_size, price, paired_id);
        let short_order = new_order(request.short_venue.clone(), request.symbol.clone(), Side::Sell, base_size, price, paired_id);

        let (long_result, short_result) = tokio::join!(
            submit_leg(long_adapter, &request.symbol, Side::Buy, base_size, price),
            submit_leg(short_adapter, &request.symbol, Side::Sell, base_size, price),
        );

        let mut long_order = long_order;
        let mut short_order = short_order;
        apply_result(&mut long_order, &long_result);
        apply_result(&mut short_order, &short_result);

        self.orders.write().insert(long_order.id, long_order.clone());
        self.orders.write().insert(short_order.id, short_order.clone());

        match (long_result.is_ok(), short_result.is_ok()) {
            (true, true) => {
                let position_id = PositionId::new();
                // Funding rates and spread at entry are the Market State
                // Cache's data, not this coordinator's; C5 fills them in
                // from a fresh cache read when it constructs the Position.
                self.bus.publish(CoreEvent::ExecutionResult(ExecutionResult::PositionOpened {
                    allocation_id: request.allocation_id,
                    position_id,
                    symbol: request.symbol.clone(),
                    long_venue: request.long_venue.clone(),
                    short_venue: request.short_venue.clone(),
                    size_usd: request.size_usd,
                    entry_price: long_order.average_fill_price.unwrap_or(price),
                    entry_spread: Decimal::ZERO,
                    long_funding_rate: Decimal::ZERO,
                    short_funding_rate: Decimal::ZERO,
                }));
                info!(allocation_id = %request.allocation_id, %position_id, "both legs filled, position opened");
                Ok(position_id)
            }
            (true, false) => {
                warn!(allocation_id = %request.allocation_id, "short leg failed, emergency-closing long leg");
                self.emergency_close_leg(long_adapter, &request.symbol, Side::Buy, long_order.filled_size.max(base_size)).await;
                self.fail(request, "short leg failed").await;
                Err(CoreError::transient(request.short_venue.to_string(), "short leg failed"))
            }
            (false, true) => {
                warn!(allocation_id = %request.allocation_id, "long leg failed, emergency-closing short leg");
                self.emergency_close_leg(short_adapter, &request.symbol, Side::Sell, short_order.filled_size.max(base_size)).await;
                self.fail(request, "long leg failed").await;
                Err(CoreError::transient(request.long_venue.to_string(), "long leg failed"))
            }
            (false, false) => {
                self.fail(request, "both legs failed").await;
                Err(CoreError::transient("both-venues", "both legs failed"))
            }
        }
    }

    async fn emergency_close_leg(&self, adapter: &Arc<dyn VenueAdapter>, symbol: &Symbol, opened_side: Side, size: Decimal) {
        let closing_side = opened_side.opposite();
        if let Err(e) = adapter.place_order(symbol, closing_side, size, None, OrderType::Market, true).await {
            error!(error = %e, "emergency leg close failed, position may be one-sided");
        }
    }

    async fn fail(&self, request: &ExecutionRequest, reason: &str) {
        self.bus.publish(CoreEvent::ExecutionResult(ExecutionResult::ExecutionFailed {
            allocation_id: request.allocation_id,
            reason: reason.to_string(),
        }));
    }

    /// §4.4 "Partial-fill handling": every `POLL_INTERVAL_SECS`, pair up
    /// each PARTIAL order with its paired leg and drive them through
    /// `order_tracker::poll_once`. Per §9's single-writer rule, this is the
    /// only path allowed to transition an Order out of PARTIAL once the
    /// submission call that created it has returned.
    pub async fn poll_partial_fills(&self) {
        let pending: Vec<(OrderId, OrderId)> = {
            let orders = self.orders.read();
            let mut seen = std::collections::HashSet::new();
            let mut pairs = Vec::new();
            for order in orders.values().filter(|o| o.state == OrderState::Partial) {
                let Some(paired_id) = order.paired_order_id else { continue };
                if seen.contains(&order.id) || seen.contains(&paired_id) {
                    continue;
                }
                if orders.contains_key(&paired_id) {
                    seen.insert(order.id);
                    seen.insert(paired_id);
                    pairs.push((order.id, paired_id));
                }
            }
            pairs
        };

        let now = Utc::now();
        for (a, b) in pending {
            let (mut long, mut short) = {
                let orders = self.orders.read();
                let Some(first) = orders.get(&a).cloned() else { continue };
                let Some(second) = orders.get(&b).cloned() else { continue };
                if first.side == Side::Buy { (first, second) } else { (second, first) }
            };
            let Ok(long_adapter) = self.adapter(&long.venue).map(Arc::clone) else { continue };
            let Ok(short_adapter) = self.adapter(&short.venue).map(Arc::clone) else { continue };

            order_tracker::poll_once(&long_adapter, &short_adapter, &mut long, &mut short, now).await;

            let mut orders = self.orders.write();
            orders.insert(long.id, long);
            orders.insert(short.id, short);
        }
    }

    /// §4.4 "Close protocol". Fetches live positions and reduce-only closes
    /// the actual open size on each venue.
    pub async fn close(&self, request: &ExecutionCloseRequest, long_venue: &VenueId, short_venue: &VenueId, symbol: &Symbol) -> CoreResult<Decimal> {
        let long_adapter = self.adapter(long_venue)?;
        let short_adapter = self.adapter(short_venue)?;

        let long_positions = long_adapter.get_positions().await.map_err(|e| CoreError::transient(long_venue.to_string(), e.to_string()))?;
        let short_positions = short_adapter.get_positions().await.map_err(|e| CoreError::transient(short_venue.to_string(), e.to_string()))?;

        let long_size = long_positions.iter().find(|p| &p.symbol == symbol).map(|p| p.size).unwrap_or(Decimal::ZERO);
        let short_size = short_positions.iter().find(|p| &p.symbol == symbol).map(|p| p.size).unwrap_or(Decimal::ZERO);

        if long_size > Decimal::ZERO {
            let _ = long_adapter.place_order(symbol, Side::Sell, long_size, None, OrderType::Market, true).await;
        }
        if short_size > Decimal::ZERO {
            let _ = short_adapter.place_order(symbol, Side::Buy, short_size, None, OrderType::Market, true).await;
        }

        let realized_pnl = Decimal::ZERO; // P&L accounting is C5's; C4 only reports the close executed.
        self.bus.publish(CoreEvent::ExecutionResult(ExecutionResult::PositionClosed {
            position_id: request.position_id,
            realized_pnl,
        }));
        Ok(realized_pnl)
    }
}

fn new_order(venue: VenueId, symbol: Symbol, side: Side, size: Decimal, expected_price: Decimal, paired_order_id: OrderId) -> Order {
    Order {
        id: OrderId::new(),
        venue,
        symbol,
        side,
        order_type: OrderType::Market,
        size,
        requested_price: None,
        expected_price,
        filled_size: Decimal::ZERO,
        average_fill_price: None,
        trading_fee: Decimal::ZERO,
        actual_slippage_pct: None,
        fill_time_ms: None,
        paired_order_id: Some(paired_order_id),
        partial_fill_count: 0,
        error: None,
        state: OrderState::Pending,
        reduce_only: false,
        submitted_at: Utc::now(),
    }
}

async fn submit_leg(
    adapter: &Arc<dyn VenueAdapter>,
    symbol: &Symbol,
    side: Side,
    size: Decimal,
    _expected_price: Decimal,
) -> anyhow::Result<crate::venue::PlaceOrderResult> {
    adapter.place_order(symbol, side, size, None, OrderType::Market, false).await
}

fn apply_result(order: &mut Order, result: &anyhow::Result<crate::venue::PlaceOrderResult>) {
    match result {
        Ok(r) if r.success => {
            order.state = if r.average_price.is_some() { OrderState::Filled } else { OrderState::Submitted };
            order.filled_size = order.size;
            order.average_fill_price = r.average_price;
            order.trading_fee = r.fee.unwrap_or(Decimal::ZERO);
            order.actual_slippage_pct = order.compute_slippage();
        }
        Ok(_) => {
            order.state = OrderState::Failed;
            order.error = Some("adapter reported failure".to_string());
        }
        Err(e) => {
            order.state = OrderState::Failed;
            order.error = Some(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::models::{FundingRate, Quote};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockAdapter {
        venue: VenueId,
        fail_orders: AtomicBool,
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
        async fn get_liquidity(&self) -> anyhow::Result<Vec<crate::venue::LiquiditySnapshot>> {
            Ok(vec![])
        }
        async fn get_positions(&self) -> anyhow::Result<Vec<crate::venue::VenuePosition>> {
            Ok(vec![])
        }
        async fn get_orders(&self, _symbol: &Symbol) -> anyhow::Result<Vec<Order>> {
            Ok(vec![])
        }
        async fn get_ticker(&self, _symbol: &Symbol) -> anyhow::Result<crate::venue::Ticker> {
            Ok(crate::venue::Ticker { last: dec!(50000) })
        }
        async fn get_min_order_size(&self, _symbol: &Symbol) -> anyhow::Result<Decimal> {
            Ok(dec!(0.001))
        }
        async fn place_order(
            &self,
            _symbol: &Symbol,
            _side: Side,
            _size: Decimal,
            _price: Option<Decimal>,
            _order_type: OrderType,
            _reduce_only: bool,
        ) -> anyhow::Result<crate::venue::PlaceOrderResult> {
            if self.fail_orders.load(Ordering::SeqCst) {
                return Ok(crate::venue::PlaceOrderResult {
                    success: false,
                    order_id: None,
                    fee: None,
                    average_price: None,
                    status: "rejected".to_string(),
                });
            }
            Ok(crate::venue::PlaceOrderResult {
                success: true,
                order_id: Some("mock-1".to_string()),
                fee: Some(dec!(0.5)),
                average_price: Some(dec!(50000)),
                status: "filled".to_string(),
            })
        }
        async fn cancel_order(&self, _symbol: &Symbol, _exchange_order_id: &str) -> anyhow::Result<crate::venue::CancelResult> {
            Ok(crate::venue::CancelResult { success: true })
        }
        fn has_credentials(&self) -> bool {
            true
        }
    }

    fn coordinator(long_fails: bool, short_fails: bool) -> ExecutionCoordinator {
        let mut adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(
            VenueId::from("L"),
            Arc::new(MockAdapter { venue: VenueId::from("L"), fail_orders: AtomicBool::new(long_fails) }),
        );
        adapters.insert(
            VenueId::from("S"),
            Arc::new(MockAdapter { venue: VenueId::from("S"), fail_orders: AtomicBool::new(short_fails) }),
        );
        let bus = Arc::new(TopicBus::default());
        let risk = Arc::new(RiskController::new(dec!(100000), RiskConfig::default()));
        ExecutionCoordinator::new(adapters, bus, risk)
    }

    fn sample_request() -> ExecutionRequest {
        ExecutionRequest {
            allocation_id: crate::models::AllocationId::new(),
            symbol: Symbol::from("BTC-PERP"),
            long_venue: VenueId::from("L"),
            short_venue: VenueId::from("S"),
            size_usd: dec!(1000),
            max_slippage_pct: None,
        }
    }

    #[tokio::test]
    async fn both_legs_ok_opens_position() {
        let coordinator = coordinator(false, false);
        let result = coordinator.execute(&sample_request()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn short_leg_fails_triggers_emergency_close_and_error() {
        let coordinator = coordinator(false, true);
        let result = coordinator.execute(&sample_request()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn circuit_breaker_blocks_execution() {
        let coordinator = coordinator(false, false);
        coordinator.risk.activate_circuit_breaker("test");
        let result = coordinator.execute(&sample_request()).await;
        assert!(result.is_err());
    }
}
