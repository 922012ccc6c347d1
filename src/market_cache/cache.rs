//! Validated readers/writers over per-(venue,symbol) market state.
//! Grounded on `risk.rs`'s `DrawdownMonitor` running-state/reclassify shape,
//! generalized here from equity drawdown to per-venue reliability decay.

use crate::models::{FundingRate, Quote, VenueHealth, VenueId, VenueTier};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::warn;

/// |rate| must not exceed this per interval (configurable in production;
/// fixed here as the spec's stated typical bound).
const MAX_FUNDING_RATE: Decimal = dec!(0.01);

/// A jump larger than this multiple of the trailing value is rejected as
/// an anomaly rather than applied.
const JUMP_ANOMALY_MULTIPLE: Decimal = dec!(10);

/// Reliability EWMA smoothing factor: weight given to the newest sample.
const RELIABILITY_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectedUpdate {
    pub bounds_violation: bool,
    pub anomaly: bool,
}

type Key = (VenueId, crate::models::Symbol);

pub struct MarketStateCache {
    funding: RwLock<HashMap<Key, FundingRate>>,
    quotes: RwLock<HashMap<Key, Quote>>,
    health: RwLock<HashMap<VenueId, VenueHealth>>,
}

impl MarketStateCache {
    pub fn new() -> Self {
        Self {
            funding: RwLock::new(HashMap::new()),
            quotes: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_venue(&self, venue: VenueId, tier: VenueTier) {
        self.health
            .write()
            .entry(venue.clone())
            .or_insert_with(|| VenueHealth::new(venue, tier));
    }

    /// Validated funding-rate write: bounds + jump-anomaly checked against
    /// the trailing value for the same key (§4.1). Violators are rejected
    /// and the venue's error counter is incremented.
    pub fn update_funding(&self, rate: FundingRate) -> Result<(), RejectedUpdate> {
        let key = (rate.venue.clone(), rate.symbol.clone());
        let bounds_violation = rate.current_rate.abs() > MAX_FUNDING_RATE;

        let anomaly = {
            let funding = self.funding.read();
            match funding.get(&key) {
                Some(prev) if !prev.current_rate.is_zero() => {
                    let jump = (rate.current_rate - prev.current_rate).abs();
                    jump > prev.current_rate.abs() * JUMP_ANOMALY_MULTIPLE
                }
                _ => false,
            }
        };

        if bounds_violation || anomaly {
            self.record_error(&rate.venue, "funding rate validation failed");
            warn!(
                venue = %rate.venue,
                symbol = %rate.symbol,
                bounds_violation,
                anomaly,
                "rejected funding rate update"
            );
            return Err(RejectedUpdate { bounds_violation, anomaly });
        }

        self.funding.write().insert(key, rate.clone());
        self.record_success(&rate.venue);
        Ok(())
    }

    pub fn update_quote(&self, quote: Quote) {
        let key = (quote.venue.clone(), quote.symbol.clone());
        self.record_success(&quote.venue);
        self.quotes.write().insert(key, quote);
    }

    pub fn funding_rate(&self, venue: &VenueId, symbol: &crate::models::Symbol) -> Option<FundingRate> {
        self.funding.read().get(&(venue.clone(), symbol.clone())).cloned()
    }

    pub fn quote(&self, venue: &VenueId, symbol: &crate::models::Symbol) -> Option<Quote> {
        self.quotes.read().get(&(venue.clone(), symbol.clone())).cloned()
    }

    pub fn venue_health(&self, venue: &VenueId) -> Option<VenueHealth> {
        self.health.read().get(venue).cloned()
    }

    pub fn all_venue_health(&self) -> Vec<VenueHealth> {
        self.health.read().values().cloned().collect()
    }

    /// Symbols known on a venue (union of funding + quote keys).
    pub fn symbols_on_venue(&self, venue: &VenueId) -> Vec<crate::models::Symbol> {
        let mut symbols: Vec<_> = self
            .funding
            .read()
            .keys()
            .filter(|(v, _)| v == venue)
            .map(|(_, s)| s.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    fn record_success(&self, venue: &VenueId) {
        let mut health = self.health.write();
        if let Some(entry) = health.get_mut(venue) {
            entry.request_count += 1;
            entry.reliability_score =
                entry.reliability_score * (1.0 - RELIABILITY_ALPHA) + RELIABILITY_ALPHA;
        }
    }

    fn record_error(&self, venue: &VenueId, reason: &str) {
        let mut health = self.health.write();
        if let Some(entry) = health.get_mut(venue) {
            entry.request_count += 1;
            entry.error_count += 1;
            entry.reliability_score = entry.reliability_score * (1.0 - RELIABILITY_ALPHA);
            entry.last_error_time = Some(chrono::Utc::now());
            if entry.reliability_score < 0.3 {
                entry.healthy = false;
                entry.reason = reason.to_string();
            }
        }
    }
}

impl Default for MarketStateCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RateSource, Symbol};
    use chrono::Utc;

    fn sample_rate(venue: &str, rate: Decimal) -> FundingRate {
        FundingRate {
            venue: VenueId::from(venue),
            symbol: Symbol::from("BTC-PERP"),
            current_rate: rate,
            predicted_next_rate: None,
            next_funding_time: Utc::now(),
            funding_interval_hours: 8,
            source: RateSource::Primary,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn rejects_rate_exceeding_bounds() {
        let cache = MarketStateCache::new();
        cache.register_venue(VenueId::from("alpha"), VenueTier::Primary);
        let result = cache.update_funding(sample_rate("alpha", dec!(0.02)));
        assert!(result.is_err());
        assert!(cache.funding_rate(&VenueId::from("alpha"), &Symbol::from("BTC-PERP")).is_none());
    }

    #[test]
    fn rejects_anomalous_jump() {
        let cache = MarketStateCache::new();
        cache.register_venue(VenueId::from("alpha"), VenueTier::Primary);
        cache.update_funding(sample_rate("alpha", dec!(0.0001))).unwrap();
        let result = cache.update_funding(sample_rate("alpha", dec!(0.005)));
        assert!(result.is_err());
    }

    #[test]
    fn accepts_valid_update_and_decays_reliability_on_error() {
        let cache = MarketStateCache::new();
        cache.register_venue(VenueId::from("alpha"), VenueTier::Primary);
        cache.update_funding(sample_rate("alpha", dec!(0.0001))).unwrap();
        let before = cache.venue_health(&VenueId::from("alpha")).unwrap().reliability_score;
        let _ = cache.update_funding(sample_rate("alpha", dec!(0.02)));
        let after = cache.venue_health(&VenueId::from("alpha")).unwrap().reliability_score;
        assert!(after < before);
    }
}
