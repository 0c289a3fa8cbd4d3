//! Trade type representing a single valued buy/sell event.

use crate::domain::{Decimal, Side, TimeMs, TokenId, WalletId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A valued trade: quantity and unit cost are already expressed in the common
/// base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Stable unique identifier for this trade.
    pub id: String,
    pub wallet_id: WalletId,
    pub token_id: TokenId,
    pub side: Side,
    /// Token quantity.
    pub quantity: Decimal,
    /// Base currency per token unit.
    pub unit_cost: Decimal,
    pub timestamp: TimeMs,
    /// Ingestion sequence, used as the tie-breaker for equal timestamps.
    pub sequence_hint: i64,
    /// USD per base unit at execution time, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_usd_rate: Option<Decimal>,
}

impl Trade {
    /// Create a new Trade.
    ///
    /// The id is `tx:<signature>` when the upstream signature is known, otherwise a
    /// hash of the deterministic fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: TimeMs,
        wallet_id: WalletId,
        token_id: TokenId,
        side: Side,
        quantity: Decimal,
        unit_cost: Decimal,
        sequence_hint: i64,
        signature: Option<&str>,
    ) -> Self {
        let id = Self::compute_trade_id(
            &wallet_id,
            &token_id,
            timestamp,
            side,
            &quantity,
            &unit_cost,
            sequence_hint,
            signature,
        );
        Trade {
            id,
            wallet_id,
            token_id,
            side,
            quantity,
            unit_cost,
            timestamp,
            sequence_hint,
            base_usd_rate: None,
        }
    }

    /// Set the USD rate of the base currency at execution.
    pub fn with_usd_rate(mut self, rate: Decimal) -> Self {
        self.base_usd_rate = Some(rate);
        self
    }

    /// Generate a stable unique id for this trade.
    ///
    /// Priority: signature (if present) > hash of deterministic fields.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_trade_id(
        wallet_id: &WalletId,
        token_id: &TokenId,
        timestamp: TimeMs,
        side: Side,
        quantity: &Decimal,
        unit_cost: &Decimal,
        sequence_hint: i64,
        signature: Option<&str>,
    ) -> String {
        if let Some(sig) = signature {
            return format!("tx:{}", sig);
        }

        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(wallet_id.as_str());
        hasher.update(token_id.as_str());
        hasher.update(timestamp.as_ms().to_le_bytes());
        hasher.update(side.as_str());
        hasher.update(quantity.to_canonical_string());
        hasher.update(unit_cost.to_canonical_string());
        hasher.update(sequence_hint.to_le_bytes());
        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }

    /// Base currency value of the whole trade, None when out of range.
    pub fn notional(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_cost)
    }

    /// Check the trade can take part in matching.
    ///
    /// # Errors
    /// Returns the first rule the trade violates.
    pub fn validate(&self) -> Result<(), TradeRejection> {
        if self.quantity.is_negative() {
            return Err(TradeRejection::NegativeQuantity(self.quantity));
        }
        if self.unit_cost.is_negative() {
            return Err(TradeRejection::NegativeUnitCost(self.unit_cost));
        }
        if self.quantity.is_zero() && self.side != Side::Void {
            return Err(TradeRejection::ZeroQuantity);
        }
        if self.notional().is_none() {
            return Err(TradeRejection::ValueOutOfRange {
                quantity: self.quantity,
                unit_cost: self.unit_cost,
            });
        }
        Ok(())
    }
}

/// Why a trade was excluded from matching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeRejection {
    #[error("negative quantity {0}")]
    NegativeQuantity(Decimal),
    #[error("negative unit cost {0}")]
    NegativeUnitCost(Decimal),
    #[error("zero quantity")]
    ZeroQuantity,
    #[error("unparseable {field}: {value:?}")]
    Unparseable { field: &'static str, value: String },
    #[error("unknown side {0:?}")]
    UnknownSide(String),
    #[error("value out of range: {quantity} x {unit_cost}")]
    ValueOutOfRange { quantity: Decimal, unit_cost: Decimal },
}

/// A rejected trade, keyed by trade id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeDiagnostic {
    pub trade_id: String,
    pub token_id: Option<TokenId>,
    pub reason: TradeRejection,
}

impl TradeDiagnostic {
    pub fn new(trade_id: impl Into<String>, token_id: Option<TokenId>, reason: TradeRejection) -> Self {
        Self {
            trade_id: trade_id.into(),
            token_id,
            reason,
        }
    }
}

impl std::fmt::Display for TradeDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trade {} rejected: {}", self.trade_id, self.reason)
    }
}

/// Trades returned by a source together with rows it could not decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeBatch {
    pub trades: Vec<Trade>,
    pub rejected: Vec<TradeDiagnostic>,
}

impl TradeBatch {
    pub fn new(trades: Vec<Trade>) -> Self {
        Self {
            trades,
            rejected: Vec::new(),
        }
    }
}
