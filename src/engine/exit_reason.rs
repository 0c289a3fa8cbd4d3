//! Heuristic exit classification.
//!
//! The thresholds are approximations, not ground truth. A lot is a take-profit when
//! it captured most of its best run-up with a meaningful gain, a stop-loss when it
//! realised most of its worst drawdown with a meaningful loss, and manual when the
//! result stays inside a small band.

use rust_decimal_macros::dec;

use crate::domain::{Decimal, ExitReason};

/// Share of the maximum run-up captured at exit to count as taking profit.
pub const TAKE_PROFIT_CAPTURE_RATIO: Decimal = Decimal::from_inner(dec!(0.9));
/// Share of the maximum drawdown realised at exit to count as a stop.
pub const STOP_LOSS_CAPTURE_RATIO: Decimal = Decimal::from_inner(dec!(0.9));
/// Minimum realised gain, in percent, for a take-profit.
pub const TAKE_PROFIT_MIN_PNL_PERCENT: Decimal = Decimal::from_inner(dec!(5));
/// Realised loss, in percent, below which a lot can be a stop-loss.
pub const STOP_LOSS_MAX_PNL_PERCENT: Decimal = Decimal::from_inner(dec!(-5));
/// Results within this absolute percent band are manual exits.
pub const MANUAL_PNL_BAND_PERCENT: Decimal = Decimal::from_inner(dec!(10));

/// Inputs to the classifier, all in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInputs {
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub realized_pnl_percent: Decimal,
    pub max_profit_percent: Option<Decimal>,
    pub max_drawdown_percent: Option<Decimal>,
}

/// `numerator / denominator`, or zero when the denominator is missing or zero.
fn guarded_ratio(numerator: Decimal, denominator: Option<Decimal>) -> Decimal {
    denominator
        .filter(|d| !d.is_zero())
        .and_then(|d| numerator.checked_div(d))
        .unwrap_or_else(Decimal::zero)
}

pub fn classify_exit(inputs: &ExitInputs) -> ExitReason {
    let move_percent = (inputs.exit_price - inputs.entry_price)
        .percent_of(inputs.entry_price)
        .unwrap_or_else(Decimal::zero);
    let exit_profit_percent = move_percent.positive_part();
    let exit_loss_percent = (-move_percent).positive_part();

    let exit_profit_ratio = guarded_ratio(exit_profit_percent, inputs.max_profit_percent);
    let exit_loss_ratio = guarded_ratio(exit_loss_percent, inputs.max_drawdown_percent);
    let pnl = inputs.realized_pnl_percent;

    if exit_profit_ratio > TAKE_PROFIT_CAPTURE_RATIO && pnl > TAKE_PROFIT_MIN_PNL_PERCENT {
        ExitReason::TakeProfit
    } else if exit_loss_ratio > STOP_LOSS_CAPTURE_RATIO && pnl < STOP_LOSS_MAX_PNL_PERCENT {
        ExitReason::StopLoss
    } else if pnl.abs() < MANUAL_PNL_BAND_PERCENT {
        ExitReason::Manual
    } else {
        ExitReason::Unknown
    }
}
