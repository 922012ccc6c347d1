//! RiskController: exposure accounting, trade pre-approval, drawdown,
//! volatility regime, circuit breaker, advisory stress tests (§4.6, E6).
//! The drawdown/circuit-breaker state machine is grounded on `risk.rs`'s
//! `DrawdownMonitor` (peak/throttle tracking), generalized from a single
//! bankroll to multi-venue/multi-symbol exposure accounting.

use super::var::VarCvarCalculator;
use crate::config::RiskConfig;
use crate::models::{RiskMode, RiskSnapshot, Symbol, VenueId, VolatilityRegime};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct TradeApproval {
    pub approved: bool,
    pub max_allowed_size: Decimal,
    pub reason: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct StressResult {
    pub shocked_var_95: f64,
    pub shocked_exposure: Decimal,
    pub would_trip_circuit_breaker: bool,
}

pub enum StressScenario {
    /// Every open funding rate flips sign and doubles in magnitude.
    FundingRateShock,
    /// One venue's exposure is treated as a complete loss.
    VenueOutage { venue_capital_fraction: f64 },
    /// All positions draw down together by the given fraction.
    CorrelatedDrawdown { fraction: f64 },
}

struct EffectiveLimits {
    max_position_size_usd: Decimal,
    max_position_pct: Decimal,
    max_gross_exposure_pct: Decimal,
}

pub struct RiskController {
    base: RiskConfig,
    snapshot: RwLock<RiskSnapshot>,
    var_calc: RwLock<VarCvarCalculator>,
    limits: RwLock<EffectiveLimits>,
    previous_mode_before_breaker: RwLock<Option<RiskMode>>,
}

impl RiskController {
    pub fn new(initial_capital: Decimal, config: RiskConfig) -> Self {
        let limits = EffectiveLimits {
            max_position_size_usd: config.max_position_size_usd,
            max_position_pct: config.max_position_pct,
            max_gross_exposure_pct: config.max_gross_exposure_pct,
        };
        Self {
            base: config,
            snapshot: RwLock::new(RiskSnapshot::new(initial_capital)),
            var_calc: RwLock::new(VarCvarCalculator::new()),
            limits: RwLock::new(limits),
            previous_mode_before_breaker: RwLock::new(None),
        }
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        self.snapshot.read().clone()
    }

    /// validate_trade(...) of §4.6. Checks run in order; the first failing
    /// hard check rejects, with the per-asset check demoted to warning.
    pub fn validate_trade(
        &self,
        size_usd: Decimal,
        long_venue: &VenueId,
        short_venue: &VenueId,
        symbol: &Symbol,
    ) -> TradeApproval {
        let snapshot = self.snapshot.read();
        let limits = self.limits.read();
        let mut warnings = Vec::new();

        if snapshot.circuit_breaker_active {
            return TradeApproval {
                approved: false,
                max_allowed_size: Decimal::ZERO,
                reason: "circuit breaker active".to_string(),
                warnings,
            };
        }
        if snapshot.risk_mode == RiskMode::Emergency {
            return TradeApproval {
                approved: false,
                max_allowed_size: Decimal::ZERO,
                reason: "risk mode is EMERGENCY".to_string(),
                warnings,
            };
        }
        if size_usd > limits.max_position_size_usd {
            return TradeApproval {
                approved: false,
                max_allowed_size: limits.max_position_size_usd,
                reason: format!(
                    "size {} exceeds max_position_size_usd {}",
                    size_usd, limits.max_position_size_usd
                ),
                warnings,
            };
        }
        let max_by_pct = snapshot.total_capital * limits.max_position_pct;
        if size_usd > max_by_pct {
            return TradeApproval {
                approved: false,
                max_allowed_size: max_by_pct,
                reason: format!("size {} exceeds max_position_pct cap {}", size_usd, max_by_pct),
                warnings,
            };
        }
        let gross_cap = snapshot.total_capital * limits.max_gross_exposure_pct;
        let remaining_gross = (gross_cap - snapshot.total_exposure).max(Decimal::ZERO);
        if snapshot.total_exposure + size_usd > gross_cap {
            return TradeApproval {
                approved: false,
                max_allowed_size: remaining_gross,
                reason: "would exceed max_gross_exposure_pct".to_string(),
                warnings,
            };
        }
        let venue_cap = snapshot.total_capital * self.base.max_venue_exposure_pct;
        let mut remaining_venue = Decimal::MAX;
        for venue in [long_venue, short_venue] {
            let current = snapshot.per_venue_exposure.get(venue).copied().unwrap_or(Decimal::ZERO);
            let remaining = (venue_cap - current).max(Decimal::ZERO);
            remaining_venue = remaining_venue.min(remaining);
            if current + size_usd > venue_cap {
                return TradeApproval {
                    approved: false,
                    max_allowed_size: remaining,
                    reason: format!("would exceed max_venue_exposure_pct for {}", venue),
                    warnings,
                };
            }
        }
        let asset_cap = snapshot.total_capital * self.base.max_asset_exposure_pct;
        let current_symbol = snapshot.per_symbol_exposure.get(symbol).copied().unwrap_or(Decimal::ZERO);
        if current_symbol + size_usd > asset_cap {
            warnings.push(format!("would exceed max_asset_exposure_pct for {}", symbol));
        }

        let max_allowed_size = remaining_gross.min(remaining_venue).min(max_by_pct).min(limits.max_position_size_usd);

        TradeApproval { approved: true, max_allowed_size, reason: "approved".to_string(), warnings }
    }

    /// Called on every position event to recompute exposure accounting.
    pub fn apply_exposure_delta(
        &self,
        long_venue: &VenueId,
        short_venue: &VenueId,
        symbol: &Symbol,
        delta_usd: Decimal,
    ) {
        let mut snapshot = self.snapshot.write();
        snapshot.total_exposure = (snapshot.total_exposure + delta_usd).max(Decimal::ZERO);
        for venue in [long_venue, short_venue] {
            let entry = snapshot.per_venue_exposure.entry(venue.clone()).or_insert(Decimal::ZERO);
            *entry = (*entry + delta_usd).max(Decimal::ZERO);
        }
        let entry = snapshot.per_symbol_exposure.entry(symbol.clone()).or_insert(Decimal::ZERO);
        *entry = (*entry + delta_usd).max(Decimal::ZERO);
    }

    /// Record an equity observation: updates peak (monotone, §3 invariant),
    /// drawdown, and trips the breaker at max_drawdown_pct (§4.6).
    pub fn record_equity(&self, equity: Decimal) -> bool {
        let mut snapshot = self.snapshot.write();
        if equity > snapshot.peak_equity {
            snapshot.peak_equity = equity;
        }
        let drawdown = if snapshot.peak_equity > Decimal::ZERO {
            ((snapshot.peak_equity - equity) / snapshot.peak_equity).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        snapshot.current_drawdown_pct = drawdown;

        let warn_threshold = self.base.max_drawdown_pct * Decimal::new(75, 2);
        let breached_warning = drawdown >= warn_threshold;
        let breached_max = drawdown >= self.base.max_drawdown_pct;

        if breached_max && !snapshot.circuit_breaker_active {
            self.activate_circuit_breaker_locked(&mut snapshot, "max drawdown breached");
        }
        breached_warning
    }

    /// Record a 5-minute P&L-as-fraction-of-exposure observation (§4.6).
    pub fn record_pnl_sample(&self, pct_return: f64) {
        let mut calc = self.var_calc.write();
        calc.record_return(pct_return);
        let var_95 = calc.var(0.95);
        let var_99 = calc.var(0.99);
        let cvar_95 = calc.cvar(0.95);
        let cvar_99 = calc.cvar(0.99);
        let volatility = calc.volatility();
        drop(calc);

        let mut snapshot = self.snapshot.write();
        let exposure = snapshot.total_exposure;
        snapshot.var_95 = Decimal::try_from(var_95).unwrap_or(Decimal::ZERO) * exposure;
        snapshot.var_99 = Decimal::try_from(var_99).unwrap_or(Decimal::ZERO) * exposure;
        snapshot.cvar_95 = Decimal::try_from(cvar_95).unwrap_or(Decimal::ZERO) * exposure;
        snapshot.cvar_99 = Decimal::try_from(cvar_99).unwrap_or(Decimal::ZERO) * exposure;
        snapshot.volatility_estimate = volatility;

        self.apply_volatility_regime(&mut snapshot, volatility);
    }

    /// Volatility-regime adaptation (§4.6). Base limits are captured once
    /// at construction; this only ever scales from `self.base`.
    fn apply_volatility_regime(&self, snapshot: &mut RiskSnapshot, volatility: f64) {
        let high = self.base.high_volatility_threshold.to_f64().unwrap_or(0.03);
        let low = self.base.low_volatility_threshold.to_f64().unwrap_or(0.01);

        let (regime, pos_scale, pct_scale, gross_scale): (VolatilityRegime, Decimal, Decimal, Decimal) =
            if volatility >= high {
                (VolatilityRegime::High, Decimal::new(5, 1), Decimal::new(5, 1), Decimal::new(6, 1))
            } else if volatility <= low {
                (VolatilityRegime::Low, Decimal::new(12, 1), Decimal::new(11, 1), Decimal::ONE)
            } else {
                (VolatilityRegime::Normal, Decimal::ONE, Decimal::ONE, Decimal::ONE)
            };

        snapshot.volatility_regime = regime;
        let mut limits = self.limits.write();
        limits.max_position_size_usd = self.base.max_position_size_usd * pos_scale;
        limits.max_position_pct = self.base.max_position_pct * pct_scale;
        limits.max_gross_exposure_pct = self.base.max_gross_exposure_pct * gross_scale;
    }

    fn activate_circuit_breaker_locked(&self, snapshot: &mut RiskSnapshot, _reason: &str) {
        let mut previous = self.previous_mode_before_breaker.write();
        if previous.is_none() {
            *previous = Some(snapshot.risk_mode);
        }
        snapshot.circuit_breaker_active = true;
        snapshot.risk_mode = RiskMode::Emergency;
    }

    pub fn activate_circuit_breaker(&self, reason: &str) {
        let mut snapshot = self.snapshot.write();
        self.activate_circuit_breaker_locked(&mut snapshot, reason);
    }

    /// Manual reset: clears the breaker and restores the prior mode (§4.6).
    pub fn reset_circuit_breaker(&self) {
        let mut snapshot = self.snapshot.write();
        snapshot.circuit_breaker_active = false;
        let mut previous = self.previous_mode_before_breaker.write();
        if let Some(mode) = previous.take() {
            snapshot.risk_mode = mode;
        }
    }

    pub fn set_mode(&self, mode: RiskMode) {
        self.snapshot.write().risk_mode = mode;
    }

    /// Advisory stress test (E6): re-evaluates current exposure under a
    /// hypothetical shock. Never gates trades on its own.
    pub fn run_stress_test(&self, scenario: StressScenario) -> StressResult {
        let snapshot = self.snapshot.read();
        let base_var = self.var_calc.read().var(0.95);

        let (shocked_var_95, shocked_exposure) = match scenario {
            StressScenario::FundingRateShock => (base_var * 2.0, snapshot.total_exposure),
            StressScenario::VenueOutage { venue_capital_fraction } => {
                let loss = snapshot.total_exposure
                    * Decimal::try_from(venue_capital_fraction).unwrap_or(Decimal::ZERO);
                (base_var.max(venue_capital_fraction), snapshot.total_exposure - loss)
            }
            StressScenario::CorrelatedDrawdown { fraction } => {
                let shocked = snapshot.total_exposure
                    * (Decimal::ONE - Decimal::try_from(fraction).unwrap_or(Decimal::ZERO));
                (base_var + fraction, shocked)
            }
        };

        let shocked_equity = snapshot.peak_equity - (snapshot.total_exposure - shocked_exposure).abs();
        let shocked_drawdown = if snapshot.peak_equity > Decimal::ZERO {
            ((snapshot.peak_equity - shocked_equity) / snapshot.peak_equity).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        StressResult {
            shocked_var_95,
            shocked_exposure,
            would_trip_circuit_breaker: shocked_drawdown >= self.base.max_drawdown_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn controller() -> RiskController {
        RiskController::new(dec!(100000), RiskConfig::default())
    }

    #[test]
    fn approves_small_trade_within_limits() {
        let c = controller();
        let approval = c.validate_trade(dec!(1000), &VenueId::from("a"), &VenueId::from("b"), &Symbol::from("BTC-PERP"));
        assert!(approval.approved);
    }

    #[test]
    fn rejects_when_circuit_breaker_active() {
        let c = controller();
        c.activate_circuit_breaker("test");
        let approval = c.validate_trade(dec!(100), &VenueId::from("a"), &VenueId::from("b"), &Symbol::from("BTC-PERP"));
        assert!(!approval.approved);
    }

    #[test]
    fn drawdown_at_max_trips_breaker_and_peak_is_monotone() {
        let c = controller();
        c.record_equity(dec!(120000));
        assert_eq!(c.snapshot().peak_equity, dec!(120000));
        let breached = c.record_equity(dec!(120000) * (Decimal::ONE - RiskConfig::default().max_drawdown_pct));
        assert!(breached);
        assert!(c.snapshot().circuit_breaker_active);
        // peak never decreases even after a drawdown
        assert_eq!(c.snapshot().peak_equity, dec!(120000));
    }

    #[test]
    fn reset_restores_previous_mode() {
        let c = controller();
        c.set_mode(RiskMode::Conservative);
        c.activate_circuit_breaker("test");
        assert_eq!(c.snapshot().risk_mode, RiskMode::Emergency);
        c.reset_circuit_breaker();
        assert_eq!(c.snapshot().risk_mode, RiskMode::Conservative);
        assert!(!c.snapshot().circuit_breaker_active);
    }
}
