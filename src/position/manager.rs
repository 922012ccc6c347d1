//! C5 Position Manager orchestrator (§4.5): owns every open `Position`
//! exclusively (save for Order linkage, owned by C4) and drives its five
//! periodic loops. Generalized from the position-poll/health-reclassify
//! shape of `risk.rs`'s `DrawdownMonitor`, widened from a single bankroll
//! figure to a per-position health state machine.

use super::forecast::SpreadForecaster;
use super::health;
use super::rebalance;
use crate::activity::{ActivityCategory, ActivityEvent, Severity};
use crate::bus::TopicBus;
use crate::config::PositionConfig;
use crate::events::{CoreEvent, ExecutionCloseRequest, PositionEvent};
use crate::market_cache::MarketStateCache;
use crate::models::{
    AllocationId, ExitReason, HealthState, OpportunityId, Position, PositionId, PositionState,
    SpreadSample, SpreadTrend, Symbol, VenueId,
};
use crate::store::{FundingPaymentRow, InteractionRow, PersistentStore};
use crate::venue::VenueAdapter;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

type PairKey = (VenueId, VenueId, Symbol);

pub struct PositionManager {
    cache: Arc<MarketStateCache>,
    bus: Arc<TopicBus>,
    store: Arc<dyn PersistentStore>,
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    config: PositionConfig,
    positions: RwLock<HashMap<PositionId, Position>>,
    forecasters: RwLock<HashMap<PairKey, SpreadForecaster>>,
}

impl PositionManager {
    pub fn new(
        cache: Arc<MarketStateCache>,
        bus: Arc<TopicBus>,
        store: Arc<dyn PersistentStore>,
        adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
        config: PositionConfig,
    ) -> Self {
        Self {
            cache,
            bus,
            store,
            adapters,
            config,
            positions: RwLock::new(HashMap::new()),
            forecasters: RwLock::new(HashMap::new()),
        }
    }

    pub fn position(&self, id: PositionId) -> Option<Position> {
        self.positions.read().get(&id).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .filter(|p| p.state != PositionState::Closed)
            .cloned()
            .collect()
    }

    /// Construct the Position record from C4's opening snapshot (§1
    /// "Ownership": C5 is the sole writer from this point on).
    #[allow(clippy::too_many_arguments)]
    pub async fn open_position(
        &self,
        _allocation_id: AllocationId,
        position_id: PositionId,
        symbol: Symbol,
        long_venue: VenueId,
        short_venue: VenueId,
        size_usd: Decimal,
        entry_price: Decimal,
    ) {
        let long_rate = self.cache.funding_rate(&long_venue, &symbol);
        let short_rate = self.cache.funding_rate(&short_venue, &symbol);
        let long_funding_rate = long_rate.as_ref().map(|r| r.current_rate).unwrap_or(Decimal::ZERO);
        let short_funding_rate = short_rate.as_ref().map(|r| r.current_rate).unwrap_or(Decimal::ZERO);
        let entry_spread = short_funding_rate - long_funding_rate;

        let mut position = Position::new(
            position_id,
            symbol.clone(),
            long_venue.clone(),
            short_venue.clone(),
            size_usd,
            entry_price,
            entry_spread,
            long_funding_rate,
            short_funding_rate,
        );
        position.state = PositionState::Active;
        if let Some(rate) = &long_rate {
            position.time_to_next_funding_secs = (rate.next_funding_time - Utc::now()).num_seconds().max(0);
        }

        self.positions.write().insert(position_id, position.clone());
        let _ = self.store.upsert_position(&position).await;
        self.write_interaction(Some(position_id), None, &symbol, "opened", "opened", format!(
            "opened {} {}/{} at entry spread {}",
            symbol, long_venue, short_venue, entry_spread
        ))
        .await;
        self.bus.publish(CoreEvent::Position(PositionEvent::Opened(position_id)));
        ActivityEvent::builder(ActivityCategory::Position, "position.opened", format!("opened position on {}", symbol))
            .position(position_id)
            .symbol(symbol)
            .build()
            .log();
    }

    /// Health monitor loop tick (30s cadence): recompute spread/health,
    /// append a spread snapshot, issue a close-request on CRITICAL.
    pub async fn health_tick(&self) {
        let started = std::time::Instant::now();
        let ids: Vec<PositionId> = self.positions.read().keys().copied().collect();
        metrics::gauge!("position_manager.open_positions").set(ids.len() as f64);
        for id in ids {
            self.health_tick_one(id).await;
        }
        metrics::histogram!("position_manager.health_tick_ms").record(started.elapsed().as_millis() as f64);
    }

    async fn health_tick_one(&self, id: PositionId) {
        let snapshot = match self.position(id) {
            Some(p) if p.state != PositionState::Closed => p,
            _ => return,
        };

        let long_rate = self.cache.funding_rate(&snapshot.long_venue, &snapshot.symbol);
        let short_rate = self.cache.funding_rate(&snapshot.short_venue, &snapshot.symbol);
        let current_spread = match (&long_rate, &short_rate) {
            (Some(l), Some(s)) => s.current_rate - l.current_rate,
            _ => snapshot.current_spread,
        };

        let now = Utc::now();
        let mut positions = self.positions.write();
        let Some(position) = positions.get_mut(&id) else { return };
        let previous_health = position.health;
        position.current_spread = current_spread;
        if let Some(rate) = &long_rate {
            position.long_funding_rate = rate.current_rate;
            position.time_to_next_funding_secs = (rate.next_funding_time - now).num_seconds().max(0);
        }
        if let Some(rate) = &short_rate {
            position.short_funding_rate = rate.current_rate;
        }

        push_spread_history(position, now);
        recompute_spread_trend(position);
        recompute_spread_drawdown(position);

        let decision = health::evaluate(position, &self.config, now);
        position.degraded_since = health::degraded_clock_start(previous_health, &decision, position.degraded_since, now);
        position.health = decision.state;

        let sample = SpreadSample {
            spread: position.current_spread,
            long_rate: position.long_funding_rate,
            short_rate: position.short_funding_rate,
            price: position.current_price,
            timestamp: now,
        };
        let position_snapshot = position.clone();
        drop(positions);

        let _ = self.store.append_spread_snapshot(id, &sample).await;

        if previous_health != decision.state {
            self.write_interaction(
                Some(id),
                None,
                &position_snapshot.symbol,
                "health_transition",
                health_decision_label(decision.state),
                format!("health {:?} -> {:?}", previous_health, decision.state),
            )
            .await;
            self.bus.publish(CoreEvent::Position(PositionEvent::HealthChanged {
                position_id: id,
                reason: decision.exit_reason.map(health::exit_reason_str).map(str::to_string),
            }));
        }

        if decision.state == HealthState::Critical {
            metrics::counter!("position_manager.critical_transitions").increment(1);
            if let Some(reason) = decision.exit_reason {
                self.trigger_exit(id, reason, &position_snapshot).await;
            }
        }
    }

    async fn trigger_exit(&self, id: PositionId, reason: ExitReason, position: &Position) {
        if let Some(p) = self.positions.write().get_mut(&id) {
            if p.exit_reason.is_some() {
                return; // close-request already issued, don't duplicate
            }
            p.exit_reason = Some(reason);
            p.state = PositionState::Closing;
        } else {
            return;
        }
        warn!(position_id = %id, reason = reason.as_str(), "position critical, requesting close");
        self.write_interaction(Some(id), None, &position.symbol, "exit_triggered", reason.as_str(), format!(
            "exit triggered: {}", reason.as_str()
        ))
        .await;
        self.bus.publish(CoreEvent::ExecutionCloseRequest(ExecutionCloseRequest {
            position_id: id,
            reason: reason.as_str().to_string(),
        }));
        self.bus.publish(CoreEvent::Position(PositionEvent::ExitTriggered { position_id: id, reason: reason.as_str().to_string() }));
        ActivityEvent::builder(ActivityCategory::Position, "position.exit_triggered", format!("exit triggered: {}", reason.as_str()))
            .severity(Severity::Warning)
            .position(id)
            .symbol(position.symbol.clone())
            .suggested_action("close position")
            .build()
            .log();
    }

    /// C4 confirms the close; C5 finalizes bookkeeping and publishes.
    pub async fn on_position_closed(&self, id: PositionId, realized_pnl: Decimal) {
        let symbol = {
            let mut positions = self.positions.write();
            let Some(position) = positions.get_mut(&id) else { return };
            position.state = PositionState::Closed;
            position.closed_at = Some(Utc::now());
            position.unrealized_pnl = Decimal::ZERO;
            let _ = realized_pnl;
            position.symbol.clone()
        };
        if let Some(position) = self.position(id) {
            let _ = self.store.upsert_position(&position).await;
        }
        self.write_interaction(Some(id), None, &symbol, "closed", "closed", "position closed".to_string()).await;
        self.bus.publish(CoreEvent::Position(PositionEvent::Closed(id)));
    }

    /// Funding tracker loop tick (60s cadence): accrue funding for any
    /// position that has crossed its next_funding_time.
    pub async fn funding_tick(&self) {
        let ids: Vec<PositionId> = self.positions.read().keys().copied().collect();
        for id in ids {
            self.funding_tick_one(id).await;
        }
    }

    async fn funding_tick_one(&self, id: PositionId) {
        let now = Utc::now();
        let (should_accrue, symbol, long_venue, short_venue) = {
            let positions = self.positions.read();
            let Some(position) = positions.get(&id) else { return };
            (position.time_to_next_funding_secs <= 0 && position.state == PositionState::Active, position.symbol.clone(), position.long_venue.clone(), position.short_venue.clone())
        };
        if !should_accrue {
            return;
        }

        let long_rate = self.cache.funding_rate(&long_venue, &symbol);
        let short_rate = self.cache.funding_rate(&short_venue, &symbol);

        let mut positions = self.positions.write();
        let Some(position) = positions.get_mut(&id) else { return };
        let half = position.size_usd / Decimal::TWO;
        // Long leg pays funding when its rate is positive, receives when
        // negative; short leg is the mirror image.
        let long_payment = if let Some(r) = &long_rate { -half * r.current_rate } else { Decimal::ZERO };
        let short_payment = if let Some(r) = &short_rate { half * r.current_rate } else { Decimal::ZERO };
        let net = long_payment + short_payment;
        if net >= Decimal::ZERO {
            position.funding_received += net;
        } else {
            position.funding_paid += -net;
        }
        position.funding_periods_collected += 1;
        if let Some(r) = &long_rate {
            position.time_to_next_funding_secs = (r.next_funding_time - now).num_seconds().max(0);
        }
        let snapshot_for_row = position.clone();
        drop(positions);

        let _ = self
            .store
            .insert_funding_payment(&FundingPaymentRow {
                position_id: id,
                venue: long_venue.clone(),
                symbol: symbol.clone(),
                funding_rate: long_rate.map(|r| r.current_rate).unwrap_or(Decimal::ZERO),
                payment_amount: long_payment,
                position_size: half,
                timestamp: now,
            })
            .await;
        let _ = self
            .store
            .insert_funding_payment(&FundingPaymentRow {
                position_id: id,
                venue: short_venue,
                symbol: symbol.clone(),
                funding_rate: short_rate.map(|r| r.current_rate).unwrap_or(Decimal::ZERO),
                payment_amount: short_payment,
                position_size: half,
                timestamp: now,
            })
            .await;

        self.write_interaction(Some(id), None, &symbol, "funding_collected", "collected", format!(
            "net funding {} (received {}, paid {})", net, snapshot_for_row.funding_received, snapshot_for_row.funding_paid
        ))
        .await;
        metrics::counter!("position_manager.funding_periods_collected").increment(1);
        self.bus.publish(CoreEvent::Position(PositionEvent::FundingCollected { position_id: id, amount: net, at: now }));
    }

    /// Price updater loop tick (10s cadence): refresh marks and per-leg
    /// unrealized P&L from live adapter positions where available.
    pub async fn price_update_tick(&self) {
        let ids: Vec<PositionId> = self.positions.read().keys().copied().collect();
        for id in ids {
            self.price_update_tick_one(id).await;
        }
    }

    async fn price_update_tick_one(&self, id: PositionId) {
        let (symbol, long_venue, short_venue, entry_price, size_usd) = {
            let positions = self.positions.read();
            let Some(position) = positions.get(&id) else { return };
            if position.state == PositionState::Closed {
                return;
            }
            (position.symbol.clone(), position.long_venue.clone(), position.short_venue.clone(), position.entry_price, position.size_usd)
        };

        let long_quote = self.cache.quote(&long_venue, &symbol);
        let short_quote = self.cache.quote(&short_venue, &symbol);
        let current_price = match (&long_quote, &short_quote) {
            (Some(l), Some(s)) => (l.mid() + s.mid()) / Decimal::TWO,
            (Some(l), None) => l.mid(),
            (None, Some(s)) => s.mid(),
            (None, None) => entry_price,
        };

        let (long_mark, long_liq) = self.fetch_mark_and_liquidation(&long_venue, &symbol).await;
        let (short_mark, short_liq) = self.fetch_mark_and_liquidation(&short_venue, &symbol).await;

        let mut positions = self.positions.write();
        let Some(position) = positions.get_mut(&id) else { return };
        position.current_price = current_price;
        position.long_mark_price = long_mark.or(position.long_mark_price);
        position.long_liquidation_price = long_liq.or(position.long_liquidation_price);
        position.short_mark_price = short_mark.or(position.short_mark_price);
        position.short_liquidation_price = short_liq.or(position.short_liquidation_price);

        if let (Some(lm), Some(sm)) = (position.long_mark_price, position.short_mark_price) {
            let half = size_usd / Decimal::TWO;
            let long_notional = half * (lm / entry_price.max(dec!(0.00000001)));
            let short_notional = half * (sm / entry_price.max(dec!(0.00000001)));
            let total = long_notional + short_notional;
            if total > Decimal::ZERO {
                position.delta_exposure_pct = (long_notional - short_notional).abs() / total;
                position.leg_drift_pct = position.delta_exposure_pct;
            }
        }

        // A delta-neutral basis trade's price P&L is driven by residual
        // (un-hedged) exposure, not gross price movement (§9 open question:
        // the distilled spec names the field but not its formula).
        let price_return = if entry_price.is_zero() { Decimal::ZERO } else { (current_price - entry_price) / entry_price };
        position.unrealized_pnl = size_usd * price_return * position.delta_exposure_pct;
        drop(positions);

        if let Some(position) = self.position(id) {
            let _ = self.store.upsert_position(&position).await;
        }
        self.bus.publish(CoreEvent::Position(PositionEvent::Updated(id)));
    }

    async fn fetch_mark_and_liquidation(&self, venue: &VenueId, symbol: &Symbol) -> (Option<Decimal>, Option<Decimal>) {
        let Some(adapter) = self.adapters.get(venue) else { return (None, None) };
        match adapter.get_positions().await {
            Ok(positions) => positions
                .into_iter()
                .find(|p| &p.symbol == symbol)
                .map(|p| (Some(p.mark_price), p.liquidation_price))
                .unwrap_or((None, None)),
            Err(_) => (None, None),
        }
    }

    /// State publisher loop tick (30s cadence): broadcast updated records.
    pub fn state_publish_tick(&self) {
        for id in self.positions.read().keys().copied().collect::<Vec<_>>() {
            self.bus.publish(CoreEvent::Position(PositionEvent::Updated(id)));
        }
    }

    /// Correlation/rebalance loop tick (30s cadence): update rolling
    /// correlation and leg drift inputs, feed the per-pair spread
    /// forecaster, and issue a rebalance request when warranted.
    pub async fn correlation_rebalance_tick(&self) {
        let now = Utc::now();
        let ids: Vec<PositionId> = self.positions.read().keys().copied().collect();
        for id in ids {
            let (symbol, long_venue, short_venue, spread, should_rebalance) = {
                let positions = self.positions.read();
                let Some(position) = positions.get(&id) else { continue };
                if position.state == PositionState::Closed {
                    continue;
                }
                (
                    position.symbol.clone(),
                    position.long_venue.clone(),
                    position.short_venue.clone(),
                    position.current_spread,
                    rebalance::should_rebalance(position, &self.config, now),
                )
            };

            {
                let key = (long_venue.clone(), short_venue.clone(), symbol.clone());
                let mut forecasters = self.forecasters.write();
                let forecaster = forecasters.entry(key).or_insert_with(|| SpreadForecaster::new(30.0 / 3600.0));
                forecaster.record(spread.to_f64().unwrap_or(0.0));
            }

            if should_rebalance {
                if let Some(position) = self.positions.write().get_mut(&id) {
                    position.last_rebalance_at = Some(now);
                    position.rebalance_count += 1;
                }
                self.write_interaction(Some(id), None, &symbol, "rebalance", "triggered", "leg drift exceeded threshold, requesting rebalance".to_string()).await;
                self.bus.publish(CoreEvent::Position(PositionEvent::Updated(id)));
                metrics::counter!("position_manager.rebalances_triggered").increment(1);
                info!(position_id = %id, "rebalance triggered");
            }
        }
    }

    async fn write_interaction(
        &self,
        position_id: Option<PositionId>,
        opportunity_id: Option<OpportunityId>,
        symbol: &Symbol,
        interaction_type: &str,
        decision: &str,
        narrative: String,
    ) {
        let _ = self
            .store
            .insert_interaction(&InteractionRow {
                position_id,
                opportunity_id,
                symbol: symbol.clone(),
                interaction_type: interaction_type.to_string(),
                decision: decision.to_string(),
                narrative,
                timestamp: Utc::now(),
            })
            .await;
    }
}

fn push_spread_history(position: &mut Position, now: chrono::DateTime<Utc>) {
    position.push_spread_sample(SpreadSample {
        spread: position.current_spread,
        long_rate: position.long_funding_rate,
        short_rate: position.short_funding_rate,
        price: position.current_price,
        timestamp: now,
    });
}

/// Trend = sign of (mean of last 2 - mean of previous 2), stability band
/// ±5e-4 (§4.5).
fn recompute_spread_trend(position: &mut Position) {
    let history = &position.spread_history;
    if history.len() < 4 {
        return;
    }
    let n = history.len();
    let last_two = (history[n - 1].spread + history[n - 2].spread) / Decimal::TWO;
    let prev_two = (history[n - 3].spread + history[n - 4].spread) / Decimal::TWO;
    let delta = last_two - prev_two;
    const STABLE_BAND: Decimal = dec!(0.0005);
    position.spread_trend = if delta.abs() <= STABLE_BAND {
        SpreadTrend::Stable
    } else if delta > Decimal::ZERO {
        SpreadTrend::Rising
    } else {
        SpreadTrend::Falling
    };
}

fn recompute_spread_drawdown(position: &mut Position) {
    if position.entry_spread <= Decimal::ZERO {
        position.spread_drawdown_pct = Decimal::ZERO;
        return;
    }
    let peak = position
        .spread_history
        .iter()
        .map(|s| s.spread)
        .fold(position.entry_spread, |a, b| a.max(b));
    if peak <= Decimal::ZERO {
        position.spread_drawdown_pct = Decimal::ZERO;
        return;
    }
    position.spread_drawdown_pct = ((peak - position.current_spread) / peak).max(Decimal::ZERO);
}

fn health_decision_label(state: HealthState) -> &'static str {
    match state {
        HealthState::Healthy => "healthy",
        HealthState::Degraded => "degraded",
        HealthState::Critical => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FundingRate, Quote, RateSource, VenueTier};
    use crate::store::SqlitePersistentStore;

    async fn manager_with_cache() -> (PositionManager, Arc<MarketStateCache>) {
        let cache = Arc::new(MarketStateCache::new());
        cache.register_venue(VenueId::from("alpha"), VenueTier::Primary);
        cache.register_venue(VenueId::from("beta"), VenueTier::Primary);
        cache
            .update_funding(FundingRate {
                venue: VenueId::from("alpha"),
                symbol: Symbol::from("BTC-PERP"),
                current_rate: dec!(0.0001),
                predicted_next_rate: None,
                next_funding_time: Utc::now() + chrono::Duration::hours(8),
                funding_interval_hours: 8,
                source: RateSource::Primary,
                last_update: Utc::now(),
            })
            .unwrap();
        cache
            .update_funding(FundingRate {
                venue: VenueId::from("beta"),
                symbol: Symbol::from("BTC-PERP"),
                current_rate: dec!(0.0008),
                predicted_next_rate: None,
                next_funding_time: Utc::now() + chrono::Duration::hours(8),
                funding_interval_hours: 8,
                source: RateSource::Primary,
                last_update: Utc::now(),
            })
            .unwrap();
        cache.update_quote(Quote {
            venue: VenueId::from("alpha"),
            symbol: Symbol::from("BTC-PERP"),
            bid: dec!(50000),
            ask: dec!(50001),
            last: dec!(50000.5),
            mark: Some(dec!(50000.5)),
            bid_depth_usd: dec!(1000000),
            ask_depth_usd: dec!(1000000),
            open_interest_usd: dec!(1000000),
            volume_24h_usd: dec!(10000000),
            last_update: Utc::now(),
        });
        cache.update_quote(Quote {
            venue: VenueId::from("beta"),
            symbol: Symbol::from("BTC-PERP"),
            bid: dec!(50000),
            ask: dec!(50001),
            last: dec!(50000.5),
            mark: Some(dec!(50000.5)),
            bid_depth_usd: dec!(1000000),
            ask_depth_usd: dec!(1000000),
            open_interest_usd: dec!(1000000),
            volume_24h_usd: dec!(10000000),
            last_update: Utc::now(),
        });

        let bus = Arc::new(TopicBus::default());
        let store: Arc<dyn PersistentStore> = Arc::new(SqlitePersistentStore::new(":memory:").unwrap());
        let manager = PositionManager::new(cache.clone(), bus, store, HashMap::new(), PositionConfig::default());
        (manager, cache)
    }

    #[tokio::test]
    async fn opening_a_position_sets_entry_spread_from_cache() {
        let (manager, _cache) = manager_with_cache().await;
        let position_id = PositionId::new();
        manager
            .open_position(
                AllocationId::new(),
                position_id,
                Symbol::from("BTC-PERP"),
                VenueId::from("alpha"),
                VenueId::from("beta"),
                dec!(1000),
                dec!(50000),
            )
            .await;
        let position = manager.position(position_id).unwrap();
        assert_eq!(position.entry_spread, dec!(0.0007));
        assert_eq!(position.state, PositionState::Active);
    }

    #[tokio::test]
    async fn health_tick_detects_spread_flip_and_triggers_exit() {
        let (manager, cache) = manager_with_cache().await;
        let position_id = PositionId::new();
        manager
            .open_position(
                AllocationId::new(),
                position_id,
                Symbol::from("BTC-PERP"),
                VenueId::from("alpha"),
                VenueId::from("beta"),
                dec!(1000),
                dec!(50000),
            )
            .await;

        // Flip the spread negative by pushing alpha's rate above beta's.
        cache
            .update_funding(FundingRate {
                venue: VenueId::from("alpha"),
                symbol: Symbol::from("BTC-PERP"),
                current_rate: dec!(0.0009),
                predicted_next_rate: None,
                next_funding_time: Utc::now() + chrono::Duration::hours(8),
                funding_interval_hours: 8,
                source: RateSource::Primary,
                last_update: Utc::now(),
            })
            .unwrap();

        manager.health_tick().await;
        let position = manager.position(position_id).unwrap();
        assert_eq!(position.health, HealthState::Critical);
        assert_eq!(position.state, PositionState::Closing);
    }

    #[tokio::test]
    async fn funding_tick_accrues_once_funding_time_has_passed() {
        let (manager, cache) = manager_with_cache().await;
        let position_id = PositionId::new();
        manager
            .open_position(
                AllocationId::new(),
                position_id,
                Symbol::from("BTC-PERP"),
                VenueId::from("alpha"),
                VenueId::from("beta"),
                dec!(1000),
                dec!(50000),
            )
            .await;
        if let Some(p) = manager.positions.write().get_mut(&position_id) {
            p.time_to_next_funding_secs = 0;
        }
        let _ = &cache;
        manager.funding_tick().await;
        let position = manager.position(position_id).unwrap();
        assert_eq!(position.funding_periods_collected, 1);
    }
}
