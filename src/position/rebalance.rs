//! Rebalance decision (§4.5 "Rebalance decision").

use crate::config::PositionConfig;
use crate::models::Position;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const MIN_REBALANCE_INTERVAL_SECS: i64 = 300;
const MIN_TIME_TO_FUNDING_SECS: i64 = 1800;
const DRIFT_RISK_COST_FACTOR: Decimal = dec!(0.1);
const REBALANCE_COST_FACTOR: Decimal = dec!(0.001);
const REBALANCE_COST_MULTIPLE: Decimal = dec!(2);

pub fn should_rebalance(position: &Position, config: &PositionConfig, now: DateTime<Utc>) -> bool {
    if position.leg_drift_pct <= config.max_leg_drift_threshold {
        return false;
    }
    if let Some(last) = position.last_rebalance_at {
        if (now - last).num_seconds() <= MIN_REBALANCE_INTERVAL_SECS {
            return false;
        }
    }
    if position.time_to_next_funding_secs <= MIN_TIME_TO_FUNDING_SECS {
        return false;
    }
    let drift_risk_cost = position.size_usd * position.leg_drift_pct * DRIFT_RISK_COST_FACTOR;
    let rebalance_cost = position.size_usd * REBALANCE_COST_FACTOR;
    drift_risk_cost > rebalance_cost * REBALANCE_COST_MULTIPLE
}
