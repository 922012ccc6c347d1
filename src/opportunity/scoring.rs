//! UOS (Unified Opportunity Score) sub-score computation (§4.2). Four
//! sub-scores, each independently bounded, summed by `UosScore::total`.

use crate::models::SpreadTrend;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn clamp_unit(x: Decimal) -> Decimal {
    x.max(Decimal::ZERO).min(Decimal::ONE)
}

fn points(fraction: Decimal, max_points: u8) -> u8 {
    let scaled = clamp_unit(fraction) * Decimal::from(max_points as i64);
    scaled.to_u8().unwrap_or(0).min(max_points)
}

/// 20 pts scaled by APR vs. a 100%-APR ceiling, 10 pts scaled by spread
/// vs. the configured optimal spread.
pub fn return_score(annualized_apr: Decimal, gross_spread: Decimal, optimal_spread_pct: Decimal) -> u8 {
    let apr_component = points(annualized_apr / Decimal::ONE, 20);
    let spread_component = if optimal_spread_pct > Decimal::ZERO {
        points(gross_spread.abs() / optimal_spread_pct, 10)
    } else {
        0
    };
    (apr_component + spread_component).min(30)
}

/// 12 pts venue tier (both tier-1 full, one tier-1 half, neither none),
/// 10 pts 24h volume vs [min, max] band, 8 pts reciprocal spread stability.
#[allow(clippy::too_many_arguments)]
pub fn risk_score(
    both_tier1: bool,
    one_tier1: bool,
    volume_24h_usd: Decimal,
    min_volume_usd: Decimal,
    max_volume_usd: Decimal,
    spread_stddev: Decimal,
) -> u8 {
    let tier_component: u8 = if both_tier1 {
        12
    } else if one_tier1 {
        6
    } else {
        0
    };

    let volume_component = if max_volume_usd > min_volume_usd {
        let position = (volume_24h_usd - min_volume_usd) / (max_volume_usd - min_volume_usd);
        points(position, 10)
    } else {
        0
    };

    // Reciprocal of stddev: a flat spread (stddev ~ 0) scores the max; a
    // stddev at or above the "wide" baseline of 5bp scores 0.

    let wide_baseline = dec!(0.0005);
    let stability_component = if spread_stddev <= Decimal::ZERO {
        8
    } else {
        points(Decimal::ONE - (spread_stddev / wide_baseline).min(Decimal::ONE), 8)
    };

    (tier_component + volume_component + stability_component).min(30)
}

/// 12 pts inversely proportional to slippage, 8 pts inversely proportional
/// to fees, 5 pts from venue reliability class.
pub fn execution_score(slippage_pct: Decimal, total_fees_pct: Decimal, avg_reliability: f64) -> u8 {
    let slippage_component = points(Decimal::ONE - slippage_pct.min(Decimal::ONE), 12);
    let fees_component = points(Decimal::ONE - total_fees_pct.min(Decimal::ONE), 8);
    let reliability_component = {
        let r = Decimal::try_from(avg_reliability.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO);
        points(r, 5)
    };
    (slippage_component + fees_component + reliability_component).min(25)
}

/// 10 pts for entry in the 37.5-75% window of the funding interval; 5 pts
/// from spread-trend direction (stable=5, rising/falling=4, adverse=1).
pub fn timing_score(
    seconds_since_last_funding: i64,
    funding_interval_hours: u8,
    trend: SpreadTrend,
    adverse: bool,
) -> u8 {
    let interval_secs = (funding_interval_hours as i64).max(1) * 3600;
    let fraction = seconds_since_last_funding as f64 / interval_secs as f64;
    let window_component: u8 = if (0.375..=0.75).contains(&fraction) { 10 } else { 0 };

    let trend_component: u8 = if adverse {
        1
    } else {
        match trend {
            SpreadTrend::Stable => 5,
            SpreadTrend::Rising | SpreadTrend::Falling => 4,
        }
    };

    (window_component + trend_component).min(15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_score_caps_at_30() {
        let score = return_score(dec!(5.0), dec!(0.01), dec!(0.0005));
        assert_eq!(score, 30);
    }

    #[test]
    fn risk_score_zero_tier_and_out_of_band_volume_is_low() {
        let score = risk_score(false, false, dec!(100), dec!(1000000), dec!(1000000000), dec!(0.001));
        assert_eq!(score, 0);
    }

    #[test]
    fn execution_score_penalizes_high_slippage_and_fees() {
        let cheap = execution_score(dec!(0.0), dec!(0.0), 1.0);
        let expensive = execution_score(dec!(0.5), dec!(0.5), 0.2);
        assert!(cheap > expensive);
    }

    #[test]
    fn timing_score_rewards_optimal_window_and_stable_trend() {
        let score = timing_score(4 * 3600, 8, SpreadTrend::Stable, false);
        assert_eq!(score, 15);
        let bad = timing_score(0, 8, SpreadTrend::Falling, true);
        assert_eq!(bad, 1);
    }
}
