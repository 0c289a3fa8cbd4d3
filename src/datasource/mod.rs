//! Collaborator interfaces consumed by the recompute pipeline.
//!
//! Trades and tracking starts normally come from the local repository; market
//! snapshots and price history come from an external market-data service.

use crate::domain::{Decimal, TimeMs, TokenId, TradeBatch, WalletId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod cached;
pub mod http;
pub mod mock;

pub use cached::CachedMarketData;
pub use http::HttpMarketDataSource;
pub use mock::MockDataSource;

/// Source of valued trades for a wallet.
#[async_trait]
pub trait TradeSource: Send + Sync + fmt::Debug {
    /// List a wallet's trades, optionally restricted to one token.
    ///
    /// Rows that cannot be turned into a `Trade` are returned in
    /// `TradeBatch::rejected` instead of failing the call.
    async fn list_trades(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
    ) -> Result<TradeBatch, DataSourceError>;

    /// Distinct tokens the wallet has trades for, sorted.
    async fn list_tokens(&self, wallet: &WalletId) -> Result<Vec<TokenId>, DataSourceError>;
}

/// Point in time from which a wallet's history is considered complete.
#[async_trait]
pub trait TrackingStartSource: Send + Sync + fmt::Debug {
    async fn get_tracking_start(&self, wallet: &WalletId)
        -> Result<Option<TimeMs>, DataSourceError>;
}

/// Token market state around a point in time.
#[async_trait]
pub trait MarketSnapshotProvider: Send + Sync + fmt::Debug {
    /// Snapshot nearest to `at`, or None when the provider has no data.
    async fn get_snapshot(
        &self,
        token: &TokenId,
        at: TimeMs,
    ) -> Result<Option<MarketSnapshot>, DataSourceError>;
}

/// Historical spot prices for a token.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync + fmt::Debug {
    /// Samples in `[start, end]`. May be empty.
    async fn get_price_series(
        &self,
        token: &TokenId,
        start: TimeMs,
        end: TimeMs,
    ) -> Result<Vec<PricePoint>, DataSourceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    #[serde(default)]
    pub market_cap: Option<Decimal>,
    #[serde(default)]
    pub liquidity: Option<Decimal>,
    #[serde(default)]
    pub volume_24h: Option<Decimal>,
    /// Token creation time, when the provider knows it.
    #[serde(default, rename = "createdAtMs")]
    pub token_created_at: Option<TimeMs>,
}

/// One spot price sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    #[serde(rename = "timeMs")]
    pub time: TimeMs,
    pub price: Decimal,
}

impl PricePoint {
    pub fn new(time: TimeMs, price: Decimal) -> Self {
        Self { time, price }
    }
}

/// Error type for data source operations.
#[derive(Debug, Clone)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    /// Rate limit exceeded (caller should implement backoff)
    RateLimited,
    /// Backing store failure
    Storage(String),
    /// Other error
    Other(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::Storage(msg) => write!(f, "Storage error: {}", msg),
            DataSourceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for DataSourceError {}

impl From<sqlx::Error> for DataSourceError {
    fn from(err: sqlx::Error) -> Self {
        DataSourceError::Storage(err.to_string())
    }
}
