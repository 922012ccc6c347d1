//! Kelly / score-weighted position sizing and correlation penalty (§4.3).
//! The half-Kelly formula is merged from `risk.rs`'s `KellyCalculator`
//! (fractional cap, win-rate history) and `vault/kelly.rs`'s
//! `calculate_kelly_position` (edge-based sizing with an explicit
//! skip-reason when the edge doesn't clear the bar).

use crate::config::AllocationConfig;
use crate::error::CoreError;
use crate::models::Symbol;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Historical win/loss edge for a symbol (or the portfolio-wide fallback).
#[derive(Debug, Clone, Copy)]
pub struct EdgeStats {
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub win_rate: Decimal,
}

const MAX_KELLY_FRACTION_OF_CAPITAL: Decimal = dec!(0.25);

/// Half-Kelly fraction f = 0.5*(b*p - q)/b where b = avg_win/avg_loss.
/// `None` when avg_loss is zero (no meaningful odds ratio).
pub fn half_kelly_fraction(edge: &EdgeStats) -> Option<Decimal> {
    if edge.avg_loss <= Decimal::ZERO {
        return None;
    }
    let b = edge.avg_win / edge.avg_loss;
    let p = edge.win_rate;
    let q = Decimal::ONE - p;
    if b <= Decimal::ZERO {
        return None;
    }
    Some(dec!(0.5) * (b * p - q) / b)
}

/// Base amount under Kelly mode. Rejects (per §4.3 step 1) when the edge
/// is negative or below `min_kelly_edge`.
pub fn kelly_base_amount(
    edge: &EdgeStats,
    available_capital: Decimal,
    min_kelly_edge: Decimal,
) -> Result<Decimal, CoreError> {
    let f = half_kelly_fraction(edge)
        .ok_or_else(|| CoreError::validation("no usable Kelly edge (zero average loss)"))?;
    if f < min_kelly_edge {
        return Err(CoreError::validation(format!(
            "Kelly edge {} below minimum {}",
            f, min_kelly_edge
        )));
    }
    let capped_fraction = f.min(MAX_KELLY_FRACTION_OF_CAPITAL);
    Ok(available_capital * capped_fraction)
}

/// Base amount when Kelly mode is off: 10% of available capital scaled by
/// UOS score.
pub fn score_weighted_base_amount(
    available_capital: Decimal,
    uos_total: u8,
    score_weight_factor: Decimal,
) -> Decimal {
    let uos_fraction = Decimal::from(uos_total as i64) / dec!(100);
    let weight = dec!(0.5) + dec!(0.5) * uos_fraction * score_weight_factor;
    available_capital * dec!(0.10) * weight
}

fn base_asset(symbol: &Symbol) -> &str {
    symbol.0.split('-').next().unwrap_or(symbol.0.as_str())
}

fn is_btc_linked(symbol: &Symbol) -> bool {
    base_asset(symbol).eq_ignore_ascii_case("BTC")
}

/// Estimated portfolio correlation ρ between a candidate symbol and the
/// existing active book, per the rule ladder in §4.3 step 2 (most specific
/// match wins: identical symbol already active beats same-base-asset beats
/// both-BTC-linked beats the crypto-wide baseline).
pub fn estimate_correlation(candidate: &Symbol, active_symbols: &[Symbol]) -> Decimal {
    if active_symbols.is_empty() {
        return Decimal::ZERO;
    }
    let mut rho = Decimal::ZERO;
    for active in active_symbols {
        let candidate_rho = if active == candidate {
            dec!(1.0)
        } else if base_asset(active).eq_ignore_ascii_case(base_asset(candidate)) {
            dec!(0.8)
        } else if is_btc_linked(active) && is_btc_linked(candidate) {
            dec!(0.3)
        } else {
            dec!(0.3)
        };
        rho = rho.max(candidate_rho);
    }
    rho
}

/// Multiply `amount` down when ρ exceeds the configured threshold; floor
/// the reduction at 25% of the original amount.
pub fn apply_correlation_penalty(amount: Decimal, rho: Decimal, config: &AllocationConfig) -> Decimal {
    if rho <= config.max_portfolio_correlation {
        return amount;
    }
    let reduction = Decimal::ONE - (rho - config.max_portfolio_correlation) * config.correlation_size_penalty;
    amount * reduction.max(dec!(0.25))
}

/// Clamp to [min_allocation, min(max_allocation, available_capital)].
pub fn clamp_allocation(amount: Decimal, available_capital: Decimal, config: &AllocationConfig) -> Decimal {
    let ceiling = config.max_allocation_usd.min(available_capital);
    amount.max(config.min_allocation_usd).min(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_kelly_matches_hand_computation() {
        let edge = EdgeStats { avg_win: dec!(2.0), avg_loss: dec!(1.0), win_rate: dec!(0.6) };
        // b=2, p=0.6, q=0.4 -> (2*0.6-0.4)/2 = 0.4, half = 0.2
        let f = half_kelly_fraction(&edge).unwrap();
        assert_eq!(f, dec!(0.2));
    }

    #[test]
    fn kelly_rejects_below_minimum_edge() {
        let edge = EdgeStats { avg_win: dec!(1.01), avg_loss: dec!(1.0), win_rate: dec!(0.51) };
        let result = kelly_base_amount(&edge, dec!(10000), dec!(0.05));
        assert!(result.is_err());
    }

    #[test]
    fn correlation_picks_strongest_match() {
        let candidate = Symbol::from("BTC-PERP");
        let active = vec![Symbol::from("ETH-PERP"), Symbol::from("BTC-PERP")];
        assert_eq!(estimate_correlation(&candidate, &active), dec!(1.0));
    }

    #[test]
    fn correlation_penalty_floors_at_quarter() {
        let config = AllocationConfig::default();
        let penalized = apply_correlation_penalty(dec!(1000), dec!(0.99), &config);
        assert!(penalized >= dec!(250));
    }
}
