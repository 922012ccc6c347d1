//! C2 Opportunity Engine orchestrator: recomputes spread/APR/UOS/verdict
//! for a candidate venue pair on each fresh market snapshot (§4.2),
//! generalized from `arbitrage/engine.rs`'s `scan_opportunities` /
//! `validate_and_enhance_opportunity` fetch-filter-enhance-emit shape.

use super::fees;
use super::scoring;
use super::verdict::{self, VerdictContext};
use crate::bus::TopicBus;
use crate::config::OpportunityConfig;
use crate::events::{CoreEvent, OpportunityDetected};
use crate::market_cache::MarketStateCache;
use crate::models::{Opportunity, OpportunityId, SpreadTrend, Symbol, UosScore, VenueId, VenueTier};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

const PAIR_SPREAD_HISTORY_LEN: usize = 60;
const STABLE_BAND: Decimal = dec!(0.0005);
/// Assumed holding period (in funding intervals) used to amortize one-time
/// entry/exit costs into an annualized rate (§4.2 "funding-interval
/// normalization"); chosen to match `PositionConfig::max_hold_periods`.
const ASSUMED_HOLD_PERIODS: f64 = 90.0;

#[derive(Debug, Clone)]
pub struct VenueFees {
    pub taker_fee_pct: Decimal,
}

/// Per-invocation context the engine has no business owning itself — risk
/// mode, coin-cap state, credentials — supplied by the caller that wires
/// C2 to C3/C6 on the bus (§1 "Ownership").
pub struct ExternalContext<'a> {
    pub system_running: bool,
    pub circuit_breaker_active: bool,
    pub risk_mode_blocks_trading: bool,
    pub active_coin_count: usize,
    pub max_concurrent_coins: usize,
    pub active_symbols: &'a HashSet<Symbol>,
    pub available_capital: Decimal,
    pub min_allocation_usd: Decimal,
    pub venue_credentials: &'a HashMap<VenueId, bool>,
    pub blacklisted_symbols: &'a HashSet<Symbol>,
    pub venue_fees: &'a HashMap<VenueId, VenueFees>,
}

pub struct OpportunityEngine {
    cache: Arc<MarketStateCache>,
    bus: Arc<TopicBus>,
    config: OpportunityConfig,
    spread_history: parking_lot::RwLock<HashMap<(VenueId, VenueId, Symbol), std::collections::VecDeque<Decimal>>>,
}

impl OpportunityEngine {
    pub fn new(cache: Arc<MarketStateCache>, bus: Arc<TopicBus>, config: OpportunityConfig) -> Self {
        Self { cache, bus, config, spread_history: parking_lot::RwLock::new(HashMap::new()) }
    }

    /// Recompute one (symbol, long-venue, short-venue) candidate. Returns
    /// `None` when either leg is missing data or unhealthy — the opportunity
    /// simply isn't produced rather than being emitted as BLOCKED (§3:
    /// "invalidated when ... either venue becomes unhealthy").
    pub fn recompute_pair(
        &self,
        symbol: &Symbol,
        long_venue: &VenueId,
        short_venue: &VenueId,
        ctx: &ExternalContext,
    ) -> Option<Opportunity> {
        let long_health = self.cache.venue_health(long_venue)?;
        let short_health = self.cache.venue_health(short_venue)?;
        if !long_health.healthy || !short_health.healthy {
            debug!(%symbol, %long_venue, %short_venue, "skipping pair: unhealthy venue");
            return None;
        }

        let long_rate = self.cache.funding_rate(long_venue, symbol)?;
        let short_rate = self.cache.funding_rate(short_venue, symbol)?;
        let long_quote = self.cache.quote(long_venue, symbol)?;
        let short_quote = self.cache.quote(short_venue, symbol)?;

        let gross_spread = short_rate.current_rate - long_rate.current_rate;
        let funding_interval_hours = long_rate.funding_interval_hours.max(short_rate.funding_interval_hours);
        let periods_per_year = (24.0 / funding_interval_hours.max(1) as f64) * 365.0;
        let annualized_apr = gross_spread * Decimal::try_from(periods_per_year).unwrap_or(Decimal::ZERO);

        let size_hint = self.config.min_24h_volume_usd.min(long_quote.bid_depth_usd.max(dec!(1)));
        let long_fee = ctx.venue_fees.get(long_venue).map(|f| f.taker_fee_pct).unwrap_or(dec!(0.0005));
        let short_fee = ctx.venue_fees.get(short_venue).map(|f| f.taker_fee_pct).unwrap_or(dec!(0.0005));
        let fee_estimate = fees::estimate(
            size_hint,
            long_fee,
            short_fee,
            long_quote.bid_depth_usd,
            short_quote.bid_depth_usd,
        );
        let amortized_cost_apr = (fee_estimate.total_fees_pct + fee_estimate.slippage_pct)
            * Decimal::try_from(periods_per_year / ASSUMED_HOLD_PERIODS).unwrap_or(Decimal::ZERO);
        let estimated_net_apr = annualized_apr - amortized_cost_apr;

        let (stddev, trend, adverse) = self.update_pair_history(long_venue, short_venue, symbol, gross_spread);

        let both_tier1 = long_health.tier == VenueTier::Primary && short_health.tier == VenueTier::Primary;
        let one_tier1 = long_health.tier == VenueTier::Primary || short_health.tier == VenueTier::Primary;
        let avg_reliability = (long_health.reliability_score + short_health.reliability_score) / 2.0;
        let seconds_since_last_funding = (Utc::now() - long_rate.last_update).num_seconds().max(0);

        let uos = UosScore {
            return_score: scoring::return_score(annualized_apr, gross_spread, self.config.optimal_spread_pct),
            risk_score: scoring::risk_score(
                both_tier1,
                one_tier1,
                long_quote.volume_24h_usd.min(short_quote.volume_24h_usd),
                self.config.min_24h_volume_usd,
                self.config.max_24h_volume_usd,
                stddev,
            ),
            execution_score: scoring::execution_score(
                fee_estimate.slippage_pct,
                fee_estimate.total_fees_pct,
                avg_reliability,
            ),
            timing_score: scoring::timing_score(seconds_since_last_funding, funding_interval_hours, trend, adverse),
        };

        let long_creds = ctx.venue_credentials.get(long_venue).copied().unwrap_or(false);
        let short_creds = ctx.venue_credentials.get(short_venue).copied().unwrap_or(false);

        let verdict_ctx = VerdictContext {
            system_running: ctx.system_running,
            circuit_breaker_active: ctx.circuit_breaker_active,
            risk_mode_blocks_trading: ctx.risk_mode_blocks_trading,
            long_has_credentials: long_creds,
            short_has_credentials: short_creds,
            symbol_blacklisted: ctx.blacklisted_symbols.contains(symbol),
            uos_total: uos.total(),
            min_uos_score: self.config.min_uos_score,
            gross_spread,
            min_spread_pct: self.config.min_spread_pct,
            estimated_net_apr,
            min_net_apr_pct: self.config.min_net_apr_pct,
            auto_execute: self.config.auto_execute,
            auto_uos_threshold: self.config.auto_uos_threshold,
            active_coin_count: ctx.active_coin_count,
            max_concurrent_coins: ctx.max_concurrent_coins,
            symbol_already_active: ctx.active_symbols.contains(symbol),
            available_capital: ctx.available_capital,
            min_allocation_usd: ctx.min_allocation_usd,
            symbol,
        };
        let outcome = verdict::evaluate(&verdict_ctx);

        let opportunity = Opportunity {
            id: OpportunityId::new(),
            symbol: symbol.clone(),
            long_venue: long_venue.clone(),
            short_venue: short_venue.clone(),
            gross_spread,
            annualized_apr,
            estimated_net_apr,
            uos,
            verdict: outcome.action,
            verdict_details: outcome.details,
            long_quote,
            short_quote,
            detected_at: Utc::now(),
        };

        info!(
            %symbol, %long_venue, %short_venue,
            uos = opportunity.uos_total(),
            verdict = opportunity.verdict.as_str(),
            "recomputed opportunity"
        );

        self.bus.publish(CoreEvent::OpportunityDetected(OpportunityDetected(opportunity.clone())));
        Some(opportunity)
    }

    /// Rolling spread history per pair, independent of any Position (an
    /// opportunity can recompute for months before ever being allocated).
    /// Returns (stddev, trend, adverse).
    fn update_pair_history(
        &self,
        long_venue: &VenueId,
        short_venue: &VenueId,
        symbol: &Symbol,
        spread: Decimal,
    ) -> (Decimal, SpreadTrend, bool) {
        let key = (long_venue.clone(), short_venue.clone(), symbol.clone());
        let mut history = self.spread_history.write();
        let series = history.entry(key).or_default();
        if series.len() >= PAIR_SPREAD_HISTORY_LEN {
            series.pop_front();
        }
        series.push_back(spread);

        if series.len() < 4 {
            return (Decimal::ZERO, SpreadTrend::Stable, false);
        }

        let mean = series.iter().sum::<Decimal>() / Decimal::from(series.len() as i64);
        let variance = series.iter().map(|s| (*s - mean) * (*s - mean)).sum::<Decimal>()
            / Decimal::from(series.len() as i64);
        let stddev = sqrt_decimal(variance);

        let n = series.len();
        let last_two = (series[n - 1] + series[n - 2]) / Decimal::TWO;
        let prev_two = (series[n - 3] + series[n - 4]) / Decimal::TWO;
        let delta = last_two - prev_two;

        let trend = if delta.abs() <= STABLE_BAND {
            SpreadTrend::Stable
        } else if delta > Decimal::ZERO {
            SpreadTrend::Rising
        } else {
            SpreadTrend::Falling
        };
        // Adverse: spread is falling and has crossed into unprofitable territory.
        let adverse = trend == SpreadTrend::Falling && spread < Decimal::ZERO;

        (stddev, trend, adverse)
    }
}

fn sqrt_decimal(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    value.sqrt().unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FundingRate, Quote, RateSource, VenueTier};

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
            last_update: Utc::now(),
        }
    }

    fn sample_rate(venue: &str, symbol: &str, rate: Decimal) -> FundingRate {
        FundingRate {
            venue: VenueId::from(venue),
            symbol: Symbol::from(symbol),
            current_rate: rate,
            predicted_next_rate: None,
            next_funding_time: Utc::now(),
            funding_interval_hours: 8,
            source: RateSource::Primary,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn happy_auto_trade_pair_yields_auto_trade_verdict() {
        let cache = Arc::new(MarketStateCache::new());
        cache.register_venue(VenueId::from("L"), VenueTier::Primary);
        cache.register_venue(VenueId::from("S"), VenueTier::Primary);
        cache.update_funding(sample_rate("L", "BTC-PERP", dec!(0.0001))).unwrap();
        cache.update_funding(sample_rate("S", "BTC-PERP", dec!(0.0008))).unwrap();
        cache.update_quote(sample_quote("L", "BTC-PERP"));
        cache.update_quote(sample_quote("S", "BTC-PERP"));

        let bus = Arc::new(TopicBus::default());
        let mut config = OpportunityConfig::default();
        config.auto_execute = true;
        config.auto_uos_threshold = 1;
        config.min_uos_score = 1;
        let engine = OpportunityEngine::new(cache, bus, config);

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

        assert_eq!(opportunity.gross_spread, dec!(0.0007));
        assert_eq!(opportunity.verdict, crate::models::BotAction::AutoTrade);
    }

    #[test]
    fn missing_quote_produces_no_opportunity() {
        let cache = Arc::new(MarketStateCache::new());
        cache.register_venue(VenueId::from("L"), VenueTier::Primary);
        cache.register_venue(VenueId::from("S"), VenueTier::Primary);
        cache.update_funding(sample_rate("L", "BTC-PERP", dec!(0.0001))).unwrap();
        cache.update_funding(sample_rate("S", "BTC-PERP", dec!(0.0008))).unwrap();

        let bus = Arc::new(TopicBus::default());
        let engine = OpportunityEngine::new(cache, bus, OpportunityConfig::default());

        let active_symbols = HashSet::new();
        let venue_credentials = HashMap::new();
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

        assert!(engine
            .recompute_pair(&Symbol::from("BTC-PERP"), &VenueId::from("L"), &VenueId::from("S"), &ctx)
            .is_none());
    }
}
