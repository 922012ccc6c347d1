//! Order model (§3). Single-writer rule: only the partial-fill loop may
//! transition PARTIAL -> FILLED/CANCELLED once the submission call has
//! returned (§9 open question).

use super::ids::{OrderId, Symbol, VenueId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Pending,
    Submitted,
    Partial,
    Filled,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub venue: VenueId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub size: Decimal,
    pub requested_price: Option<Decimal>,
    pub expected_price: Decimal,
    pub filled_size: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub trading_fee: Decimal,
    pub actual_slippage_pct: Option<Decimal>,
    pub fill_time_ms: Option<u64>,
    pub paired_order_id: Option<OrderId>,
    pub partial_fill_count: u32,
    pub error: Option<String>,
    pub state: OrderState,
    pub reduce_only: bool,
    pub submitted_at: DateTime<Utc>,
}

impl Order {
    pub fn fill_ratio(&self) -> Decimal {
        if self.size.is_zero() {
            return Decimal::ZERO;
        }
        (self.filled_size / self.size).min(Decimal::ONE)
    }

    /// Slippage signed per side: buy => (fill-expected)/expected,
    /// sell => (expected-fill)/expected (§4.4).
    pub fn compute_slippage(&self) -> Option<Decimal> {
        let fill = self.average_fill_price?;
        if self.expected_price.is_zero() {
            return None;
        }
        let raw = match self.side {
            Side::Buy => fill - self.expected_price,
            Side::Sell => self.expected_price - fill,
        };
        Some(raw / self.expected_price)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.submitted_at
    }
}
