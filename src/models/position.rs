//! Position state machine, health substate, and spread history (§3).

use super::ids::{PositionId, Symbol, VenueId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Opening,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadTrend {
    Rising,
    Falling,
    Stable,
}

/// Reason a CRITICAL transition issued a close-request (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    SpreadFlipped,
    StopLoss,
    MaxHoldTime,
    SpreadBelowThreshold,
    DeltaCritical,
    LiquidationImminent,
    SpreadDeterioration,
    DegradedTimeout,
    UserRequested,
    AutoUnwind,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::SpreadFlipped => "spread-flipped",
            ExitReason::StopLoss => "stop-loss",
            ExitReason::MaxHoldTime => "max-hold-time",
            ExitReason::SpreadBelowThreshold => "spread-below-threshold",
            ExitReason::DeltaCritical => "delta-critical",
            ExitReason::LiquidationImminent => "liquidation-imminent",
            ExitReason::SpreadDeterioration => "spread-deterioration",
            ExitReason::DegradedTimeout => "degraded-timeout",
            ExitReason::UserRequested => "user-requested",
            ExitReason::AutoUnwind => "auto-unwind",
        }
    }
}

/// One sample of the rolling spread time-series (§4.5). Persisted verbatim
/// to the `positions.spread_snapshots` relation (§6) by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadSample {
    pub spread: Decimal,
    pub long_rate: Decimal,
    pub short_rate: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

pub const SPREAD_HISTORY_LEN: usize = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: Symbol,
    pub long_venue: VenueId,
    pub short_venue: VenueId,
    pub state: PositionState,
    pub health: HealthState,
    pub size_usd: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub entry_spread: Decimal,
    pub current_spread: Decimal,
    pub long_funding_rate: Decimal,
    pub short_funding_rate: Decimal,
    pub funding_received: Decimal,
    pub funding_paid: Decimal,
    pub funding_periods_collected: u32,
    pub unrealized_pnl: Decimal,
    /// |long-notional - short-notional| / (long-notional + short-notional).
    pub delta_exposure_pct: Decimal,
    pub leg_drift_pct: Decimal,
    pub price_correlation: f64,
    pub spread_history: VecDeque<SpreadSample>,
    pub spread_drawdown_pct: Decimal,
    pub spread_trend: SpreadTrend,
    pub time_to_next_funding_secs: i64,
    pub degraded_since: Option<DateTime<Utc>>,
    pub rebalance_count: u32,
    pub exit_reason: Option<ExitReason>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_rebalance_at: Option<DateTime<Utc>>,
    /// Per-leg liquidation inputs; absent means the liquidation rule is
    /// simply not evaluated (§9 open question), never treated as safe.
    pub long_mark_price: Option<Decimal>,
    pub long_liquidation_price: Option<Decimal>,
    pub short_mark_price: Option<Decimal>,
    pub short_liquidation_price: Option<Decimal>,
}

impl Position {
    pub fn new(
        id: PositionId,
        symbol: Symbol,
        long_venue: VenueId,
        short_venue: VenueId,
        size_usd: Decimal,
        entry_price: Decimal,
        entry_spread: Decimal,
        long_funding_rate: Decimal,
        short_funding_rate: Decimal,
    ) -> Self {
        Self {
            id,
            symbol,
            long_venue,
            short_venue,
            state: PositionState::Opening,
            health: HealthState::Healthy,
            size_usd,
            entry_price,
            current_price: entry_price,
            entry_spread,
            current_spread: entry_spread,
            long_funding_rate,
            short_funding_rate,
            funding_received: Decimal::ZERO,
            funding_paid: Decimal::ZERO,
            funding_periods_collected: 0,
            unrealized_pnl: Decimal::ZERO,
            delta_exposure_pct: Decimal::ZERO,
            leg_drift_pct: Decimal::ZERO,
            price_correlation: 1.0,
            spread_history: VecDeque::with_capacity(SPREAD_HISTORY_LEN),
            spread_drawdown_pct: Decimal::ZERO,
            spread_trend: SpreadTrend::Stable,
            time_to_next_funding_secs: 0,
            degraded_since: None,
            rebalance_count: 0,
            exit_reason: None,
            opened_at: Utc::now(),
            closed_at: None,
            last_rebalance_at: None,
            long_mark_price: None,
            long_liquidation_price: None,
            short_mark_price: None,
            short_liquidation_price: None,
        }
    }

    pub fn push_spread_sample(&mut self, sample: SpreadSample) {
        if self.spread_history.len() >= SPREAD_HISTORY_LEN {
            self.spread_history.pop_front();
        }
        self.spread_history.push_back(sample);
    }

    /// Liquidation distance as a fraction of mark price; `None` when either
    /// input is missing (the rule never forces a transition in that case).
    pub fn long_liquidation_distance(&self) -> Option<Decimal> {
        liquidation_distance(self.long_mark_price, self.long_liquidation_price)
    }

    pub fn short_liquidation_distance(&self) -> Option<Decimal> {
        liquidation_distance(self.short_mark_price, self.short_liquidation_price)
    }
}

fn liquidation_distance(mark: Option<Decimal>, liq: Option<Decimal>) -> Option<Decimal> {
    let (mark, liq) = (mark?, liq?);
    if mark.is_zero() {
        return None;
    }
    Some(((mark - liq) / mark).abs())
}
