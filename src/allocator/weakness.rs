//! Weakness score and coin-cap unwind candidate selection (§4.3).

use crate::models::{Position, PositionId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Higher score = weaker (more deserving of an auto-unwind).
pub fn weakness_score(funding_pnl: Decimal, unrealized_pnl: Decimal, held_hours: f64, total_pnl: Decimal) -> Decimal {
    let funding_component = if funding_pnl < Decimal::ZERO {
        dec!(50) + funding_pnl.abs()
    } else {
        -funding_pnl.min(dec!(20))
    };

    let unrealized_component = if unrealized_pnl < Decimal::ZERO {
        dec!(30) + unrealized_pnl.abs()
    } else {
        -unrealized_pnl.min(dec!(15))
    };

    let staleness_component = if held_hours > 4.0 && total_pnl < Decimal::ZERO {
        Decimal::try_from(2.0 * held_hours).unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };

    funding_component + unrealized_component + staleness_component
}

pub fn weakness_score_for(position: &Position, now: chrono::DateTime<chrono::Utc>) -> Decimal {
    let held_hours = (now - position.opened_at).num_seconds() as f64 / 3600.0;
    let total_pnl = position.funding_received - position.funding_paid + position.unrealized_pnl;
    weakness_score(
        position.funding_received - position.funding_paid,
        position.unrealized_pnl,
        held_hours,
        total_pnl,
    )
}

/// Select the `excess` highest-weakness-scored positions for a close
/// request, highest score first.
pub fn select_unwind_candidates(mut scored: Vec<(PositionId, Decimal)>, excess: usize) -> Vec<PositionId> {
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().take(excess).map(|(id, _)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn losing_funding_and_unrealized_scores_highest() {
        let weak = weakness_score(dec!(-10), dec!(-20), 1.0, dec!(-30));
        let healthy = weakness_score(dec!(5), dec!(10), 1.0, dec!(15));
        assert!(weak > healthy);
    }

    #[test]
    fn selects_top_n_by_score() {
        let a = PositionId::new();
        let b = PositionId::new();
        let c = PositionId::new();
        let scored = vec![(a, dec!(10)), (b, dec!(90)), (c, dec!(50))];
        let selected = select_unwind_candidates(scored, 2);
        assert_eq!(selected, vec![b, c]);
    }
}
