pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod recompute;

pub use config::Config;
pub use datasource::{
    CachedMarketData, DataSourceError, HttpMarketDataSource, MarketSnapshot,
    MarketSnapshotProvider, MockDataSource, PriceHistoryProvider, PricePoint, TradeSource,
};
pub use db::{init_db, Repository};
pub use domain::{
    ClosedLot, Decimal, ExitReason, OpenPosition, Side, TimeMs, TokenId, Trade, WalletId,
};
pub use error::RecomputeError;
pub use recompute::{RecomputeOutcome, Recomputer};
