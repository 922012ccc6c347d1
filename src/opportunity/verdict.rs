//! Bot-Action verdict gating (§4.2): five priority-ordered rules, first
//! failure wins, default AUTO_TRADE. Every rule's outcome is recorded as a
//! human-readable detail regardless of which one ultimately decided.

use crate::models::{BotAction, Symbol};
use rust_decimal::Decimal;

pub struct VerdictContext<'a> {
    pub system_running: bool,
    pub circuit_breaker_active: bool,
    pub risk_mode_blocks_trading: bool,
    pub long_has_credentials: bool,
    pub short_has_credentials: bool,
    pub symbol_blacklisted: bool,
    pub uos_total: u8,
    pub min_uos_score: u8,
    pub gross_spread: Decimal,
    pub min_spread_pct: Decimal,
    pub estimated_net_apr: Decimal,
    pub min_net_apr_pct: Decimal,
    pub auto_execute: bool,
    pub auto_uos_threshold: u8,
    pub active_coin_count: usize,
    pub max_concurrent_coins: usize,
    pub symbol_already_active: bool,
    pub available_capital: Decimal,
    pub min_allocation_usd: Decimal,
    pub symbol: &'a Symbol,
}

pub struct VerdictOutcome {
    pub action: BotAction,
    pub details: Vec<String>,
}

pub fn evaluate(ctx: &VerdictContext) -> VerdictOutcome {
    let mut details = Vec::new();
    let mut decided: Option<BotAction> = None;

    let rule1_ok = ctx.system_running && !ctx.circuit_breaker_active && !ctx.risk_mode_blocks_trading;
    details.push(format!("system-running-and-tradeable: {}", rule1_ok));
    if !rule1_ok && decided.is_none() {
        decided = Some(BotAction::Blocked);
    }

    let rule2_ok = ctx.long_has_credentials && ctx.short_has_credentials && !ctx.symbol_blacklisted;
    details.push(format!("credentials-and-not-blacklisted: {}", rule2_ok));
    if !rule2_ok && decided.is_none() {
        decided = Some(BotAction::Blocked);
    }

    let rule3_ok = ctx.uos_total >= ctx.min_uos_score
        && ctx.gross_spread >= ctx.min_spread_pct
        && ctx.estimated_net_apr >= ctx.min_net_apr_pct;
    details.push(format!(
        "uos/spread/apr above minimums (uos={}, spread={}, net_apr={}): {}",
        ctx.uos_total, ctx.gross_spread, ctx.estimated_net_apr, rule3_ok
    ));
    if !rule3_ok && decided.is_none() {
        decided = Some(BotAction::Blocked);
    }

    let rule4_ok = ctx.auto_execute && ctx.uos_total >= ctx.auto_uos_threshold;
    details.push(format!("auto-execute-eligible: {}", rule4_ok));
    if !rule4_ok && decided.is_none() {
        decided = Some(BotAction::ManualOnly);
    }

    let rule5_ok = ctx.active_coin_count < ctx.max_concurrent_coins
        && !ctx.symbol_already_active
        && ctx.available_capital >= ctx.min_allocation_usd;
    details.push(format!(
        "coin-cap/capital-available for {}: {}",
        ctx.symbol, rule5_ok
    ));
    if !rule5_ok && decided.is_none() {
        decided = Some(BotAction::Waiting);
    }

    VerdictOutcome { action: decided.unwrap_or(BotAction::AutoTrade), details }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn baseline_ctx(symbol: &Symbol) -> VerdictContext<'_> {
        VerdictContext {
            system_running: true,
            circuit_breaker_active: false,
            risk_mode_blocks_trading: false,
            long_has_credentials: true,
            short_has_credentials: true,
            symbol_blacklisted: false,
            uos_total: 80,
            min_uos_score: 60,
            gross_spread: dec!(0.0007),
            min_spread_pct: dec!(0.0001),
            estimated_net_apr: dec!(0.15),
            min_net_apr_pct: dec!(0.05),
            auto_execute: true,
            auto_uos_threshold: 75,
            active_coin_count: 2,
            max_concurrent_coins: 10,
            symbol_already_active: false,
            available_capital: dec!(8000),
            min_allocation_usd: dec!(100),
            symbol,
        }
    }

    #[test]
    fn all_rules_pass_yields_auto_trade() {
        let symbol = Symbol::from("BTC-PERP");
        let ctx = baseline_ctx(&symbol);
        let outcome = evaluate(&ctx);
        assert_eq!(outcome.action, BotAction::AutoTrade);
    }

    #[test]
    fn circuit_breaker_blocks_regardless_of_other_rules() {
        let symbol = Symbol::from("BTC-PERP");
        let mut ctx = baseline_ctx(&symbol);
        ctx.circuit_breaker_active = true;
        let outcome = evaluate(&ctx);
        assert_eq!(outcome.action, BotAction::Blocked);
    }

    #[test]
    fn low_uos_blocks_before_auto_execute_check() {
        let symbol = Symbol::from("BTC-PERP");
        let mut ctx = baseline_ctx(&symbol);
        ctx.uos_total = 50;
        let outcome = evaluate(&ctx);
        assert_eq!(outcome.action, BotAction::Blocked);
    }

    #[test]
    fn manual_approval_when_auto_execute_off() {
        let symbol = Symbol::from("BTC-PERP");
        let mut ctx = baseline_ctx(&symbol);
        ctx.auto_execute = false;
        let outcome = evaluate(&ctx);
        assert_eq!(outcome.action, BotAction::ManualOnly);
    }

    #[test]
    fn waiting_when_coin_cap_reached() {
        let symbol = Symbol::from("BTC-PERP");
        let mut ctx = baseline_ctx(&symbol);
        ctx.active_coin_count = 10;
        let outcome = evaluate(&ctx);
        assert_eq!(outcome.action, BotAction::Waiting);
    }
}
