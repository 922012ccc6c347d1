//! Health state machine (§4.5). Pure decision functions so the thresholds
//! are unit-testable independent of the periodic-loop plumbing that calls
//! them; mirrors how `risk/controller.rs` separates the drawdown math from
//! its own locking.

use crate::config::PositionConfig;
use crate::models::{ExitReason, HealthState, Position};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthDecision {
    pub state: HealthState,
    pub exit_reason: Option<ExitReason>,
}

/// Evaluate the five CRITICAL conditions, then the five DEGRADED
/// conditions, then the degraded-timeout escalation, in the order §4.5
/// lists them. `degraded_since` reflects the position's state *before*
/// this evaluation.
pub fn evaluate(position: &Position, config: &PositionConfig, now: DateTime<Utc>) -> HealthDecision {
    if let Some(reason) = critical_reason(position, config) {
        return HealthDecision { state: HealthState::Critical, exit_reason: Some(reason) };
    }

    if let Some(since) = position.degraded_since {
        let elapsed = (now - since).num_seconds();
        if elapsed >= config.degraded_timeout_secs && is_degraded(position, config) {
            return HealthDecision { state: HealthState::Critical, exit_reason: Some(ExitReason::DegradedTimeout) };
        }
    }

    if is_degraded(position, config) {
        return HealthDecision { state: HealthState::Degraded, exit_reason: None };
    }

    HealthDecision { state: HealthState::Healthy, exit_reason: None }
}

fn critical_reason(position: &Position, config: &PositionConfig) -> Option<ExitReason> {
    if position.current_spread <= Decimal::ZERO {
        return Some(ExitReason::SpreadFlipped);
    }
    let stop_loss_threshold = position.size_usd * config.stop_loss_pct;
    if -position.unrealized_pnl >= stop_loss_threshold {
        return Some(ExitReason::StopLoss);
    }
    if position.delta_exposure_pct > config.critical_delta_threshold {
        return Some(ExitReason::DeltaCritical);
    }
    if liquidation_critical(position, config) {
        return Some(ExitReason::LiquidationImminent);
    }
    if position.spread_drawdown_pct >= config.spread_drawdown_exit_pct
        && position.time_to_next_funding_secs >= config.min_time_to_funding_exit_secs
    {
        return Some(ExitReason::SpreadDeterioration);
    }
    None
}

fn is_degraded(position: &Position, config: &PositionConfig) -> bool {
    let entry_half = position.entry_spread * Decimal::new(5, 1);
    (position.current_spread > Decimal::ZERO && position.current_spread < config.min_spread_threshold)
        || position.current_spread < entry_half
        || position.funding_periods_collected >= config.max_hold_periods
        || position.delta_exposure_pct > config.max_delta_threshold
        || liquidation_degraded(position, config)
}

fn liquidation_critical(position: &Position, config: &PositionConfig) -> bool {
    [position.long_liquidation_distance(), position.short_liquidation_distance()]
        .into_iter()
        .flatten()
        .any(|d| d < config.liquidation_distance_critical)
}

fn liquidation_degraded(position: &Position, config: &PositionConfig) -> bool {
    [position.long_liquidation_distance(), position.short_liquidation_distance()]
        .into_iter()
        .flatten()
        .any(|d| d < config.liquidation_distance_degraded)
}

/// Reason string handed to the close-request published on a CRITICAL
/// transition (§4.5's closed enum of reasons).
pub fn exit_reason_str(reason: ExitReason) -> &'static str {
    reason.as_str()
}

/// Returns (max_hold_periods-aware) whether a position's degraded clock
/// should (re)start, given its previous and new health state.
pub fn degraded_clock_start(previous: HealthState, decision: &HealthDecision, previous_since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match (previous, decision.state) {
        (_, HealthState::Degraded) if previous != HealthState::Degraded => Some(now),
        (HealthState::Degraded, HealthState::Degraded) => previous_since,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionId, Symbol, VenueId};
    use rust_decimal_macros::dec;

    fn sample_position() -> Position {
        Position::new(
            PositionId::new(),
            Symbol::from("BTC-PERP"),
            VenueId::from("alpha"),
            VenueId::from("beta"),
            dec!(1000),
            dec!(50000),
            dec!(0.0007),
            dec!(0.0001),
            dec!(0.0008),
        )
    }

    #[test]
    fn negative_spread_is_critical_with_spread_flipped_reason() {
        let mut position = sample_position();
        position.current_spread = dec!(-0.0001);
        let decision = evaluate(&position, &PositionConfig::default(), Utc::now());
        assert_eq!(decision.state, HealthState::Critical);
        assert_eq!(decision.exit_reason, Some(ExitReason::SpreadFlipped));
    }

    #[test]
    fn stop_loss_breach_is_critical() {
        let mut position = sample_position();
        position.current_spread = dec!(0.0007);
        position.unrealized_pnl = -dec!(1000) * PositionConfig::default().stop_loss_pct - dec!(1);
        let decision = evaluate(&position, &PositionConfig::default(), Utc::now());
        assert_eq!(decision.exit_reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn spread_below_half_entry_is_degraded() {
        let mut position = sample_position();
        position.current_spread = position.entry_spread * dec!(0.4);
        let decision = evaluate(&position, &PositionConfig::default(), Utc::now());
        assert_eq!(decision.state, HealthState::Degraded);
    }

    #[test]
    fn long_degraded_period_escalates_to_critical_timeout() {
        let mut position = sample_position();
        position.current_spread = position.entry_spread * dec!(0.4);
        position.degraded_since = Some(Utc::now() - chrono::Duration::seconds(PositionConfig::default().degraded_timeout_secs + 1));
        let decision = evaluate(&position, &PositionConfig::default(), Utc::now());
        assert_eq!(decision.state, HealthState::Critical);
        assert_eq!(decision.exit_reason, Some(ExitReason::DegradedTimeout));
    }

    #[test]
    fn healthy_position_stays_healthy() {
        let position = sample_position();
        let decision = evaluate(&position, &PositionConfig::default(), Utc::now());
        assert_eq!(decision.state, HealthState::Healthy);
    }
}
