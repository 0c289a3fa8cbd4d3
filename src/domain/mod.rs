//! Domain types and determinism layer for the lot ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, WalletId, TokenId, Side
//! - Trade input type with validation diagnostics
//! - ClosedLot / OpenPosition outputs with structured analytics records
//! - Stable trade ordering key helper for deterministic processing

pub mod decimal;
pub mod lot;
pub mod ordering;
pub mod primitives;
pub mod trade;

pub use decimal::Decimal;
pub use lot::{
    ClosedLot, DcaPattern, ExitAnalysis, ExitReason, LotTiming, MarketContext, OpenPosition,
    ReentryPattern,
};
pub use ordering::{sort_trades_deterministic, TradeOrderingKey};
pub use primitives::{Side, TimeMs, TokenId, WalletId};
pub use trade::{Trade, TradeBatch, TradeDiagnostic, TradeRejection};
