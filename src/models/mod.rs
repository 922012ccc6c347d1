//! Data model (§3). Every monetary amount is `rust_decimal::Decimal`; every
//! identifier is a UUID newtype; every timestamp is `chrono::DateTime<Utc>`.

pub mod allocation;
pub mod ids;
pub mod market;
pub mod opportunity;
pub mod order;
pub mod position;
pub mod risk;

pub use allocation::{Allocation, AllocationState};
pub use ids::{AllocationId, EventId, OpportunityId, OrderId, PositionId, Symbol, VenueId};
pub use market::{FundingRate, Quote, RateSource, VenueHealth, VenueTier};
pub use opportunity::{BotAction, Opportunity, UosScore};
pub use order::{Order, OrderState, OrderType, Side};
pub use position::{ExitReason, HealthState, Position, PositionState, SpreadSample, SpreadTrend};
pub use risk::{RiskMode, RiskSnapshot, VolatilityRegime};
