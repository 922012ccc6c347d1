//! RiskSnapshot and risk-mode model (§3).

use super::ids::{Symbol, VenueId};
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskMode {
    Discovery,
    Conservative,
    Standard,
    Aggressive,
    Emergency,
}

#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub total_capital: Decimal,
    pub total_exposure: Decimal,
    pub per_venue_exposure: HashMap<VenueId, Decimal>,
    pub per_symbol_exposure: HashMap<Symbol, Decimal>,
    pub current_drawdown_pct: Decimal,
    pub peak_equity: Decimal,
    pub var_95: Decimal,
    pub var_99: Decimal,
    pub cvar_95: Decimal,
    pub cvar_99: Decimal,
    pub volatility_estimate: f64,
    pub volatility_regime: VolatilityRegime,
    pub circuit_breaker_active: bool,
    pub risk_mode: RiskMode,
}

impl RiskSnapshot {
    pub fn new(total_capital: Decimal) -> Self {
        Self {
            total_capital,
            total_exposure: Decimal::ZERO,
            per_venue_exposure: HashMap::new(),
            per_symbol_exposure: HashMap::new(),
            current_drawdown_pct: Decimal::ZERO,
            peak_equity: total_capital,
            var_95: Decimal::ZERO,
            var_99: Decimal::ZERO,
            cvar_95: Decimal::ZERO,
            cvar_99: Decimal::ZERO,
            volatility_estimate: 0.0,
            volatility_regime: VolatilityRegime::Normal,
            circuit_breaker_active: false,
            risk_mode: RiskMode::Discovery,
        }
    }

    pub fn available_capital(&self) -> Decimal {
        (self.total_capital - self.total_exposure).max(Decimal::ZERO)
    }
}
