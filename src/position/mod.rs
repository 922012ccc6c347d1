//! C5 Position Manager (§4.5). Exclusively writes every `Position` field
//! save for its Order linkage, which C4 owns.

mod forecast;
mod health;
mod manager;
mod rebalance;

pub use forecast::{ForecastResult, MeanReversionSignal, SeasonalityResult, SpreadForecaster};
pub use health::{degraded_clock_start, evaluate, exit_reason_str, HealthDecision};
pub use manager::PositionManager;
pub use rebalance::should_rebalance;
