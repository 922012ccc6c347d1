//! Fee and slippage estimation for a paired long/short funding trade.
//! Generalized from `arbitrage/fees.rs`'s `FeeCalculator` (buy-leg fee +
//! sell-leg fee + gas) to the four-fee-event (open+close × two legs) shape
//! a perpetual funding trade incurs, with slippage read from book depth
//! instead of a flat buffer constant.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, Copy)]
pub struct FeeEstimate {
    pub total_fees_pct: Decimal,
    pub slippage_pct: Decimal,
}

/// Both legs are opened and closed once: 4 taker fee events total.
pub fn estimate_total_fees_pct(long_taker_fee_pct: Decimal, short_taker_fee_pct: Decimal) -> Decimal {
    (long_taker_fee_pct + short_taker_fee_pct) * Decimal::TWO
}

/// Crude linear-impact slippage model: size as a fraction of available
/// book depth, capped at 100%. Depth of zero is treated as maximal slippage.
pub fn estimate_slippage_pct(size_usd: Decimal, long_depth_usd: Decimal, short_depth_usd: Decimal) -> Decimal {
    let worse_depth = long_depth_usd.min(short_depth_usd);
    if worse_depth <= Decimal::ZERO {
        return dec!(1.0);
    }
    (size_usd / worse_depth).min(dec!(1.0))
}

pub fn estimate(
    size_usd: Decimal,
    long_taker_fee_pct: Decimal,
    short_taker_fee_pct: Decimal,
    long_depth_usd: Decimal,
    short_depth_usd: Decimal,
) -> FeeEstimate {
    FeeEstimate {
        total_fees_pct: estimate_total_fees_pct(long_taker_fee_pct, short_taker_fee_pct),
        slippage_pct: estimate_slippage_pct(size_usd, long_depth_usd, short_depth_usd),
    }
}
