//! Mock data source for testing without a database or network calls.

use super::{
    DataSourceError, MarketSnapshot, MarketSnapshotProvider, PriceHistoryProvider, PricePoint,
    TrackingStartSource, TradeSource,
};
use crate::domain::{TimeMs, TokenId, Trade, TradeBatch, WalletId};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock data source that returns predefined test data.
///
/// Implements every collaborator trait so a single value can back a whole
/// recompute in tests.
#[derive(Debug, Clone, Default)]
pub struct MockDataSource {
    trades: Vec<Trade>,
    tracking_starts: HashMap<WalletId, TimeMs>,
    snapshots: Vec<(TokenId, TimeMs, MarketSnapshot)>,
    prices: HashMap<TokenId, Vec<PricePoint>>,
    lookup_latency: Option<Duration>,
    lookup_error: Option<DataSourceError>,
    trade_error: Option<DataSourceError>,
    lookups: Arc<AtomicUsize>,
}

impl MockDataSource {
    /// Create a new mock data source with empty data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trade to the mock data source.
    pub fn with_trade(mut self, trade: Trade) -> Self {
        self.trades.push(trade);
        self
    }

    /// Add multiple trades to the mock data source.
    pub fn with_trades(mut self, trades: Vec<Trade>) -> Self {
        self.trades.extend(trades);
        self
    }

    pub fn with_tracking_start(mut self, wallet: WalletId, start: TimeMs) -> Self {
        self.tracking_starts.insert(wallet, start);
        self
    }

    /// Register a snapshot valid from `at` until the next snapshot of the token.
    pub fn with_snapshot(mut self, token: TokenId, at: TimeMs, snapshot: MarketSnapshot) -> Self {
        self.snapshots.push((token, at, snapshot));
        self
    }

    pub fn with_prices(mut self, token: TokenId, points: Vec<PricePoint>) -> Self {
        self.prices.entry(token).or_default().extend(points);
        self
    }

    /// Delay every market and price lookup.
    pub fn with_lookup_latency(mut self, latency: Duration) -> Self {
        self.lookup_latency = Some(latency);
        self
    }

    /// Fail every market and price lookup.
    pub fn with_lookup_error(mut self, err: DataSourceError) -> Self {
        self.lookup_error = Some(err);
        self
    }

    /// Fail every trade listing.
    pub fn with_trade_error(mut self, err: DataSourceError) -> Self {
        self.trade_error = Some(err);
        self
    }

    /// Number of market and price lookups served so far, across clones.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    async fn lookup_preamble(&self) -> Result<(), DataSourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.lookup_latency {
            tokio::time::sleep(latency).await;
        }
        match &self.lookup_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TradeSource for MockDataSource {
    async fn list_trades(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
    ) -> Result<TradeBatch, DataSourceError> {
        if let Some(err) = &self.trade_error {
            return Err(err.clone());
        }

        Ok(TradeBatch::new(
            self.trades
                .iter()
                .filter(|t| &t.wallet_id == wallet && token.map_or(true, |tk| tk == &t.token_id))
                .cloned()
                .collect(),
        ))
    }

    async fn list_tokens(&self, wallet: &WalletId) -> Result<Vec<TokenId>, DataSourceError> {
        if let Some(err) = &self.trade_error {
            return Err(err.clone());
        }

        let tokens: BTreeSet<TokenId> = self
            .trades
            .iter()
            .filter(|t| &t.wallet_id == wallet)
            .map(|t| t.token_id.clone())
            .collect();
        Ok(tokens.into_iter().collect())
    }
}

#[async_trait]
impl TrackingStartSource for MockDataSource {
    async fn get_tracking_start(
        &self,
        wallet: &WalletId,
    ) -> Result<Option<TimeMs>, DataSourceError> {
        Ok(self.tracking_starts.get(wallet).copied())
    }
}

#[async_trait]
impl MarketSnapshotProvider for MockDataSource {
    async fn get_snapshot(
        &self,
        token: &TokenId,
        at: TimeMs,
    ) -> Result<Option<MarketSnapshot>, DataSourceError> {
        self.lookup_preamble().await?;

        Ok(self
            .snapshots
            .iter()
            .filter(|(tk, time, _)| tk == token && *time <= at)
            .max_by_key(|(_, time, _)| *time)
            .map(|(_, _, snapshot)| snapshot.clone()))
    }
}

#[async_trait]
impl PriceHistoryProvider for MockDataSource {
    async fn get_price_series(
        &self,
        token: &TokenId,
        start: TimeMs,
        end: TimeMs,
    ) -> Result<Vec<PricePoint>, DataSourceError> {
        self.lookup_preamble().await?;

        Ok(self
            .prices
            .get(token)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.time >= start && p.time <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}
