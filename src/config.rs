//! Runtime configuration.
//! Mission: one env-driven surface per spec §6, re-read on `config.updated`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct OpportunityConfig {
    pub min_uos_score: u8,
    pub high_quality_threshold: u8,
    pub min_spread_pct: Decimal,
    pub min_net_apr_pct: Decimal,
    pub auto_execute: bool,
    pub auto_uos_threshold: u8,
    pub optimal_spread_pct: Decimal,
    pub min_24h_volume_usd: Decimal,
    pub max_24h_volume_usd: Decimal,
}

impl Default for OpportunityConfig {
    fn default() -> Self {
        Self {
            min_uos_score: env_or("MIN_UOS_SCORE", 60),
            high_quality_threshold: env_or("HIGH_QUALITY_UOS_THRESHOLD", 80),
            min_spread_pct: dec!(0.0001),
            min_net_apr_pct: dec!(0.05),
            auto_execute: env_bool("AUTO_EXECUTE", false),
            auto_uos_threshold: env_or("AUTO_UOS_THRESHOLD", 75),
            optimal_spread_pct: dec!(0.0005),
            min_24h_volume_usd: dec!(1000000),
            max_24h_volume_usd: dec!(1000000000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AllocationConfig {
    pub min_allocation_usd: Decimal,
    pub max_allocation_usd: Decimal,
    pub allocation_interval_secs: u64,
    pub max_concurrent_coins: usize,
    pub score_weight_factor: Decimal,
    pub use_kelly_criterion: bool,
    pub kelly_fraction: Decimal,
    pub min_kelly_edge: Decimal,
    pub max_portfolio_correlation: Decimal,
    pub correlation_size_penalty: Decimal,
    pub coin_cap_enforcement_interval_secs: u64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            min_allocation_usd: dec!(100),
            max_allocation_usd: env_or("MAX_ALLOCATION_USD", dec!(5000)),
            allocation_interval_secs: env_or("ALLOCATION_INTERVAL_SECS", 30),
            max_concurrent_coins: env_or("MAX_CONCURRENT_COINS", 10),
            score_weight_factor: dec!(1.0),
            use_kelly_criterion: env_bool("USE_KELLY_CRITERION", true),
            kelly_fraction: dec!(0.5),
            min_kelly_edge: dec!(0.01),
            max_portfolio_correlation: dec!(0.7),
            correlation_size_penalty: dec!(1.0),
            coin_cap_enforcement_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PositionConfig {
    pub min_spread_threshold: Decimal,
    pub stop_loss_pct: Decimal,
    pub max_hold_periods: u32,
    pub degraded_timeout_secs: i64,
    pub spread_drawdown_exit_pct: Decimal,
    pub min_time_to_funding_exit_secs: i64,
    pub max_delta_threshold: Decimal,
    pub max_leg_drift_threshold: Decimal,
    pub critical_delta_threshold: Decimal,
    pub liquidation_distance_degraded: Decimal,
    pub liquidation_distance_critical: Decimal,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            min_spread_threshold: dec!(0.0001),
            stop_loss_pct: env_or("STOP_LOSS_PCT", dec!(0.05)),
            max_hold_periods: env_or("MAX_HOLD_PERIODS", 90),
            degraded_timeout_secs: env_or("DEGRADED_TIMEOUT_SECONDS", 1800),
            spread_drawdown_exit_pct: dec!(0.50),
            min_time_to_funding_exit_secs: 1800,
            max_delta_threshold: dec!(0.10),
            max_leg_drift_threshold: dec!(0.05),
            critical_delta_threshold: dec!(0.25),
            liquidation_distance_degraded: dec!(0.10),
            liquidation_distance_critical: dec!(0.05),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_position_size_usd: Decimal,
    pub max_position_pct: Decimal,
    pub max_gross_exposure_pct: Decimal,
    pub max_net_exposure_pct: Decimal,
    pub max_venue_exposure_pct: Decimal,
    pub max_asset_exposure_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub max_var_pct: Decimal,
    pub max_margin_utilization_pct: Decimal,
    pub high_volatility_threshold: Decimal,
    pub low_volatility_threshold: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_usd: env_or("MAX_POSITION_SIZE_USD", dec!(10000)),
            max_position_pct: dec!(0.10),
            max_gross_exposure_pct: dec!(0.80),
            max_net_exposure_pct: dec!(0.50),
            max_venue_exposure_pct: dec!(0.40),
            max_asset_exposure_pct: dec!(0.25),
            max_drawdown_pct: env_or("MAX_DRAWDOWN_PCT", dec!(0.20)),
            max_var_pct: dec!(0.10),
            max_margin_utilization_pct: dec!(0.70),
            high_volatility_threshold: dec!(0.03),
            low_volatility_threshold: dec!(0.01),
        }
    }
}

/// Top-level configuration, one sub-struct per component per spec §6.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub opportunity: OpportunityConfig,
    pub allocation: AllocationConfig,
    pub position: PositionConfig,
    pub risk: RiskConfig,
    pub database_path: String,
    pub initial_capital_usd: Decimal,
}

impl Config {
    /// Load from the environment, falling back to defaults. Re-invoked on
    /// `config.updated` bus events to pick up live edits to
    /// `config.system_settings` / `config.risk_limits`.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "./funding_arb_core.db".to_string());
        let initial_capital_usd: Decimal = env::var("INITIAL_CAPITAL_USD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(dec!(100000));

        Ok(Self {
            opportunity: OpportunityConfig::default(),
            allocation: AllocationConfig::default(),
            position: PositionConfig::default(),
            risk: RiskConfig::default(),
            database_path,
            initial_capital_usd,
        })
    }
}
