//! Opportunity model and UOS/Bot-Action types (§3, §4.2).

use super::ids::{OpportunityId, Symbol, VenueId};
use super::market::Quote;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UosScore {
    pub return_score: u8,
    pub risk_score: u8,
    pub execution_score: u8,
    pub timing_score: u8,
}

impl UosScore {
    pub fn total(&self) -> u8 {
        (self.return_score + self.risk_score + self.execution_score + self.timing_score).min(100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotAction {
    Blocked,
    Waiting,
    ManualOnly,
    AutoTrade,
}

impl BotAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotAction::Blocked => "BLOCKED",
            BotAction::Waiting => "WAITING",
            BotAction::ManualOnly => "MANUAL_ONLY",
            BotAction::AutoTrade => "AUTO_TRADE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub symbol: Symbol,
    pub long_venue: VenueId,
    pub short_venue: VenueId,
    /// short-rate minus long-rate, per funding interval.
    pub gross_spread: Decimal,
    pub annualized_apr: Decimal,
    pub estimated_net_apr: Decimal,
    pub uos: UosScore,
    pub verdict: BotAction,
    /// Human-readable explanations of every rule evaluated for the verdict.
    pub verdict_details: Vec<String>,
    pub long_quote: Quote,
    pub short_quote: Quote,
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn uos_total(&self) -> u8 {
        self.uos.total()
    }
}
