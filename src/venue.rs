//! Venue adapter contract (§6). Individual venue REST/WS clients are out
//! of scope (§1) — this crate depends only on the capability surface every
//! adapter must offer, retried at most twice with backoff by the adapter
//! itself; the core issues a single logical call per spec.

use crate::models::{FundingRate, Order, OrderType, Quote, Side, Symbol, VenueId};
use async_trait::async_trait;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct LiquiditySnapshot {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub bid_depth_usd: Decimal,
    pub ask_depth_usd: Decimal,
}

#[derive(Debug, Clone)]
pub struct VenuePosition {
    pub symbol: Symbol,
    pub side: Side,
    pub size: Decimal,
    pub mark_price: Decimal,
    pub liquidation_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct Ticker {
    pub last: Decimal,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub fee: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct CancelResult {
    pub success: bool,
}

/// Minimal capability set every venue adapter exposes (§6). `Order` here is
/// the core's own model used to describe the request; adapters translate
/// it to whatever wire format the venue speaks.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue_id(&self) -> VenueId;

    async fn get_funding_rates(&self) -> anyhow::Result<Vec<FundingRate>>;
    async fn get_prices(&self) -> anyhow::Result<Vec<Quote>>;
    async fn get_liquidity(&self) -> anyhow::Result<Vec<LiquiditySnapshot>>;
    async fn get_positions(&self) -> anyhow::Result<Vec<VenuePosition>>;
    async fn get_orders(&self, symbol: &Symbol) -> anyhow::Result<Vec<Order>>;
    async fn get_ticker(&self, symbol: &Symbol) -> anyhow::Result<Ticker>;
    async fn get_min_order_size(&self, symbol: &Symbol) -> anyhow::Result<Decimal>;

    async fn place_order(
        &self,
        symbol: &Symbol,
        side: Side,
        size: Decimal,
        price: Option<Decimal>,
        order_type: OrderType,
        reduce_only: bool,
    ) -> anyhow::Result<PlaceOrderResult>;

    async fn cancel_order(&self, symbol: &Symbol, exchange_order_id: &str)
        -> anyhow::Result<CancelResult>;

    fn has_credentials(&self) -> bool;
}
