//! Market data model: FundingRate, Quote, VenueHealth (§3).

use super::ids::{Symbol, VenueId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Source tag distinguishing a venue's own feed from a secondary aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateSource {
    Primary,
    Aggregator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub venue: VenueId,
    pub symbol: Symbol,
    /// Signed fraction per funding interval, e.g. 0.0001 = 1bp.
    pub current_rate: Decimal,
    pub predicted_next_rate: Option<Decimal>,
    pub next_funding_time: DateTime<Utc>,
    pub funding_interval_hours: u8,
    pub source: RateSource,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub mark: Option<Decimal>,
    pub bid_depth_usd: Decimal,
    pub ask_depth_usd: Decimal,
    pub open_interest_usd: Decimal,
    pub volume_24h_usd: Decimal,
    pub last_update: DateTime<Utc>,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// Priority tier: 1 = primary exchange, 2 = secondary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VenueTier {
    Primary = 1,
    Secondary = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueHealth {
    pub venue: VenueId,
    pub healthy: bool,
    pub reason: String,
    /// EWMA of (1 - error rate) over the trailing K requests, in [0,1].
    pub reliability_score: f64,
    pub request_count: u64,
    pub error_count: u64,
    pub tier: VenueTier,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl VenueHealth {
    pub fn new(venue: VenueId, tier: VenueTier) -> Self {
        Self {
            venue,
            healthy: true,
            reason: "ok".to_string(),
            reliability_score: 1.0,
            request_count: 0,
            error_count: 0,
            tier,
            last_error_time: None,
        }
    }
}
