//! Partial-fill and leg-sync tracking (§4.4 "Partial fills and leg sync").
//! Polls both legs of a paired order every 5 seconds; generalized from the
//! teacher's `monitor.rs` position-poll loop into the fill-ratio/age state
//! machine the spec describes for a single paired order.

use crate::models::{Order, OrderState, Side};
use crate::venue::VenueAdapter;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, warn};

pub const POLL_INTERVAL_SECS: u64 = 5;
const HEDGE_ADJUSTMENT_AGE_SECS: i64 = 30;
const FORCE_CLOSE_AGE_SECS: i64 = 60;
const FILLED_THRESHOLD: Decimal = dec!(0.95);
const PARTIAL_HEDGE_THRESHOLD: Decimal = dec!(0.50);
const LEG_SYNC_TOLERANCE: Decimal = dec!(0.05);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegAction {
    /// Fill ratio has crossed the "done" threshold; stop polling.
    Settled,
    /// Still filling normally, no action required yet.
    Keep,
    /// Partially filled and stale: cancel the remainder and submit a
    /// smaller order sized to the hedge the other leg still needs.
    HedgeAdjust,
    /// Stale well past the hedge-adjustment window: cancel and reduce-only
    /// close whatever did fill, abandoning the leg.
    ForceClose,
}

/// Per-leg fill-ratio/age decision (§4.4 "Partial fills"). Pure so the
/// threshold logic is unit-testable without an adapter.
pub fn decide_leg_action(order: &Order, now: DateTime<Utc>) -> LegAction {
    if matches!(order.state, OrderState::Filled | OrderState::Cancelled | OrderState::Failed) {
        return LegAction::Settled;
    }
    let ratio = order.fill_ratio();
    if ratio >= FILLED_THRESHOLD {
        return LegAction::Settled;
    }
    let age = order.age(now).num_seconds();
    if ratio >= PARTIAL_HEDGE_THRESHOLD && age > HEDGE_ADJUSTMENT_AGE_SECS && age <= FORCE_CLOSE_AGE_SECS {
        return LegAction::HedgeAdjust;
    }
    if age > FORCE_CLOSE_AGE_SECS {
        return LegAction::ForceClose;
    }
    LegAction::Keep
}

/// Leg-sync ratio of §4.4: smaller fill over larger fill. A pair is in
/// sync when this is within `LEG_SYNC_TOLERANCE` of 1.0.
pub fn leg_sync_ratio(long: &Order, short: &Order) -> Decimal {
    let (a, b) = (long.filled_size, short.filled_size);
    let larger = a.max(b);
    if larger.is_zero() {
        return Decimal::ONE;
    }
    a.min(b) / larger
}

pub fn needs_sync_correction(long: &Order, short: &Order) -> bool {
    leg_sync_ratio(long, short) < (Decimal::ONE - LEG_SYNC_TOLERANCE)
}

/// Which leg is ahead and by how much base-asset size the correction order
/// on the larger leg should reduce by to bring the pair back in sync.
pub fn sync_correction(long: &Order, short: &Order) -> Option<(Side, Decimal)> {
    if !needs_sync_correction(long, short) {
        return None;
    }
    if long.filled_size > short.filled_size {
        Some((Side::Sell, long.filled_size - short.filled_size))
    } else {
        Some((Side::Buy, short.filled_size - long.filled_size))
    }
}

/// Act on one leg's fill-ratio/age decision. `HedgeAdjust` acts on the
/// *paired* leg (§4.4, §8 scenario 2): cancel it and resubmit it sized to
/// `this` leg's actual fill, downsizing the completed hedge to match the
/// stuck leg instead of topping the stuck leg up.
async fn apply_leg_action(
    this: &mut Order,
    this_adapter: &Arc<dyn VenueAdapter>,
    other: &mut Order,
    other_adapter: &Arc<dyn VenueAdapter>,
    now: DateTime<Utc>,
) {
    match decide_leg_action(this, now) {
        LegAction::Settled | LegAction::Keep => {}
        LegAction::HedgeAdjust => {
            warn!(order_id = %this.id, "partial fill stalled, re-hedging paired leg down to this leg's fill");
            match other_adapter.cancel_order(&other.symbol, &other.id.0.to_string()).await {
                Ok(_) => {
                    if this.filled_size > Decimal::ZERO {
                        let _ = other_adapter
                            .place_order(&other.symbol, other.side, this.filled_size, None, crate::models::OrderType::Market, true)
                            .await;
                    }
                }
                Err(err) => warn!(order_id = %other.id, %err, "failed to cancel paired leg for hedge adjustment"),
            }
            this.partial_fill_count += 1;
        }
        LegAction::ForceClose => {
            warn!(order_id = %this.id, "partial fill exceeded force-close age, reduce-only closing filled portion");
            if this.filled_size > Decimal::ZERO {
                let _ = this_adapter.place_order(&this.symbol, this.side.opposite(), this.filled_size, None, crate::models::OrderType::Market, true).await;
            }
            this.state = OrderState::Cancelled;
        }
    }
}

/// Poll both legs of a paired order once, applying whatever leg actions
/// and sync corrections are due. Returns true once both legs are settled.
pub async fn poll_once(
    long_adapter: &Arc<dyn VenueAdapter>,
    short_adapter: &Arc<dyn VenueAdapter>,
    long: &mut Order,
    short: &mut Order,
    now: DateTime<Utc>,
) -> bool {
    for (order, adapter) in [(&mut *long, long_adapter), (&mut *short, short_adapter)] {
        if let Ok(open_orders) = adapter.get_orders(&order.symbol).await {
            if let Some(live) = open_orders.iter().find(|o| o.paired_order_id == order.paired_order_id && o.side == order.side) {
                order.filled_size = live.filled_size;
                order.average_fill_price = live.average_fill_price;
                order.state = live.state;
            }
        }
    }

    apply_leg_action(long, long_adapter, short, short_adapter, now).await;
    apply_leg_action(short, short_adapter, long, long_adapter, now).await;

    if needs_sync_correction(long, short) {
        if let Some((side, amount)) = sync_correction(long, short) {
            let leg_is_long = long.filled_size > short.filled_size;
            let (adapter, symbol) = if leg_is_long { (long_adapter, long.symbol.clone()) } else { (short_adapter, short.symbol.clone()) };
            info!(%amount, "submitting leg-sync correction order");
            let _ = adapter.place_order(&symbol, side, amount, None, crate::models::OrderType::Market, true).await;
        }
    }

    matches!(decide_leg_action(long, now), LegAction::Settled) && matches!(decide_leg_action(short, now), LegAction::Settled)
}
