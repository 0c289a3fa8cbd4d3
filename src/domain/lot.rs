//! Closed lots and open positions produced by the lot matcher.
//!
//! Analytics are grouped into small optional-field records. The matcher leaves them
//! empty; each enrichment step fills in exactly its own record.

use crate::domain::{Decimal, TimeMs, TokenId, Trade, WalletId};
use serde::{Deserialize, Serialize};

/// Heuristic classification of why a lot was closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Manual,
    #[default]
    Unknown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Manual => "manual",
            ExitReason::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<ExitReason> {
        match s {
            "take_profit" => Some(ExitReason::TakeProfit),
            "stop_loss" => Some(ExitReason::StopLoss),
            "manual" => Some(ExitReason::Manual),
            "unknown" => Some(ExitReason::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotTiming {
    pub hold_time_minutes: Option<i64>,
    pub entry_hour_of_day: Option<u32>,
    pub entry_day_of_week: Option<u32>,
    pub exit_hour_of_day: Option<u32>,
    pub exit_day_of_week: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketContext {
    pub entry_market_cap: Option<Decimal>,
    pub exit_market_cap: Option<Decimal>,
    pub entry_liquidity: Option<Decimal>,
    pub exit_liquidity: Option<Decimal>,
    pub entry_volume_24h: Option<Decimal>,
    pub exit_volume_24h: Option<Decimal>,
    pub token_age_at_entry_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitAnalysis {
    pub exit_reason: ExitReason,
    pub max_profit_percent: Option<Decimal>,
    pub max_drawdown_percent: Option<Decimal>,
    pub time_to_max_profit_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcaPattern {
    pub dca_entry_count: Option<u32>,
    pub dca_time_span_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReentryPattern {
    pub reentry_time_minutes: Option<i64>,
    pub reentry_price_change_percent: Option<Decimal>,
    pub previous_cycle_pnl: Option<Decimal>,
}

/// One FIFO match between a consumed buy-lot fragment and a portion of a sell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedLot {
    pub wallet_id: WalletId,
    pub token_id: TokenId,
    /// None when the sell had no known originating buy.
    pub buy_trade_id: Option<String>,
    pub sell_trade_id: String,
    pub sequence_number: i64,

    pub size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub cost_basis: Decimal,
    pub proceeds: Decimal,
    pub realized_pnl: Decimal,
    pub realized_pnl_percent: Decimal,
    pub realized_pnl_usd: Option<Decimal>,

    pub entry_time: TimeMs,
    pub exit_time: TimeMs,

    #[serde(flatten)]
    pub timing: LotTiming,
    #[serde(flatten)]
    pub market: MarketContext,
    #[serde(flatten)]
    pub exit: ExitAnalysis,
    #[serde(flatten)]
    pub dca: DcaPattern,
    #[serde(flatten)]
    pub reentry: ReentryPattern,

    pub is_pre_history: bool,
    pub cost_known: bool,
}

impl ClosedLot {
    /// Build a realized lot for `size` units of `sell`, entered at `entry_price`.
    ///
    /// Analytics records start empty and the sequence number is assigned by the
    /// matcher. Returns None when cost basis or proceeds are out of range; a USD
    /// value that overflows is left unknown.
    pub fn realized(
        sell: &Trade,
        buy_trade_id: Option<String>,
        size: Decimal,
        entry_price: Decimal,
        entry_time: TimeMs,
    ) -> Option<Self> {
        let cost_basis = size.checked_mul(entry_price)?;
        let proceeds = size.checked_mul(sell.unit_cost)?;
        let realized_pnl = proceeds - cost_basis;
        let realized_pnl_percent = realized_pnl
            .percent_of(cost_basis)
            .unwrap_or_else(Decimal::zero);
        let realized_pnl_usd = sell.base_usd_rate.and_then(|rate| realized_pnl.checked_mul(rate));

        Some(ClosedLot {
            wallet_id: sell.wallet_id.clone(),
            token_id: sell.token_id.clone(),
            cost_known: buy_trade_id.is_some(),
            buy_trade_id,
            sell_trade_id: sell.id.clone(),
            sequence_number: 0,
            size,
            entry_price,
            exit_price: sell.unit_cost,
            cost_basis,
            proceeds,
            realized_pnl,
            realized_pnl_percent,
            realized_pnl_usd,
            entry_time,
            exit_time: sell.timestamp,
            timing: LotTiming::default(),
            market: MarketContext::default(),
            exit: ExitAnalysis::default(),
            dca: DcaPattern::default(),
            reentry: ReentryPattern::default(),
            is_pre_history: false,
        })
    }

    pub fn with_pre_history(mut self, is_pre_history: bool) -> Self {
        self.is_pre_history = is_pre_history;
        self
    }
}

/// Residual, unmatched buy inventory for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPosition {
    pub wallet_id: WalletId,
    pub token_id: TokenId,
    pub remaining_quantity: Decimal,
    /// Quantity-weighted average unit cost of the remaining fragments.
    pub average_cost: Decimal,
    /// Origin time of the oldest remaining fragment.
    pub opened_at: TimeMs,
}
