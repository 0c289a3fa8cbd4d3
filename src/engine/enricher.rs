//! Lot enrichment: timing, market context, price path, exit reason and patterns.
//!
//! External lookups are bounded by a timeout. A failed or timed-out lookup leaves
//! only the fields it would have filled empty; the lot itself is always returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::datasource::{
    DataSourceError, MarketSnapshot, MarketSnapshotProvider, PriceHistoryProvider, PricePoint,
};
use crate::domain::{ClosedLot, ExitAnalysis, LotTiming, MarketContext, TimeMs, TokenId};
use crate::engine::exit_reason::{classify_exit, ExitInputs};
use crate::engine::patterns::{apply_dca_patterns, apply_reentry_patterns};
use crate::engine::price_path::price_path_metrics;

/// Default per-lookup bound.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Provider(#[from] DataSourceError),
}

/// Counts of degraded lookups in one enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub lookup_timeouts: usize,
    pub lookup_failures: usize,
}

impl EnrichmentReport {
    fn record<T>(&mut self, lot: &ClosedLot, lookup: &'static str, result: Result<T, LookupError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                match err {
                    LookupError::Timeout(_) => self.lookup_timeouts += 1,
                    LookupError::Provider(_) => self.lookup_failures += 1,
                }
                warn!(
                    wallet = %lot.wallet_id,
                    token = %lot.token_id,
                    sequence = lot.sequence_number,
                    lookup,
                    error = %err,
                    "Lookup degraded; leaving fields empty"
                );
                None
            }
        }
    }

    pub fn degraded(&self) -> usize {
        self.lookup_timeouts + self.lookup_failures
    }
}

/// Attaches analytics to freshly matched lots.
#[derive(Debug, Clone)]
pub struct LotEnricher {
    market: Option<Arc<dyn MarketSnapshotProvider>>,
    prices: Option<Arc<dyn PriceHistoryProvider>>,
    lookup_timeout: Duration,
}

impl Default for LotEnricher {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_TIMEOUT)
    }
}

impl LotEnricher {
    /// Enricher without external providers: market fields stay empty and the price
    /// path uses entry and exit only.
    pub fn new(lookup_timeout: Duration) -> Self {
        Self {
            market: None,
            prices: None,
            lookup_timeout,
        }
    }

    pub fn with_market(mut self, provider: Arc<dyn MarketSnapshotProvider>) -> Self {
        self.market = Some(provider);
        self
    }

    pub fn with_prices(mut self, provider: Arc<dyn PriceHistoryProvider>) -> Self {
        self.prices = Some(provider);
        self
    }

    /// Enrich a batch of lots. Output order matches input order.
    pub async fn enrich(&self, mut lots: Vec<ClosedLot>) -> (Vec<ClosedLot>, EnrichmentReport) {
        let mut report = EnrichmentReport::default();

        for lot in lots.iter_mut() {
            lot.timing = timing(lot);

            let (entry_snapshot, exit_snapshot, samples) = tokio::join!(
                self.snapshot(&lot.token_id, lot.entry_time),
                self.snapshot(&lot.token_id, lot.exit_time),
                self.price_samples(&lot.token_id, lot.entry_time, lot.exit_time),
            );

            let entry_snapshot = report.record(lot, "entry_snapshot", entry_snapshot).flatten();
            let exit_snapshot = report.record(lot, "exit_snapshot", exit_snapshot).flatten();
            lot.market = market_context(lot.entry_time, entry_snapshot, exit_snapshot);

            let samples = report.record(lot, "price_series", samples).unwrap_or_default();
            lot.exit = exit_analysis(lot, &samples);
        }

        apply_dca_patterns(&mut lots);
        apply_reentry_patterns(&mut lots);

        debug!(
            lots = lots.len(),
            timeouts = report.lookup_timeouts,
            failures = report.lookup_failures,
            "Enrichment finished"
        );
        (lots, report)
    }

    async fn bounded<T>(
        &self,
        lookup: impl Future<Output = Result<T, DataSourceError>>,
    ) -> Result<T, LookupError> {
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(result) => result.map_err(LookupError::from),
            Err(_) => Err(LookupError::Timeout(self.lookup_timeout)),
        }
    }

    async fn snapshot(&self, token: &TokenId, at: TimeMs) -> Result<Option<MarketSnapshot>, LookupError> {
        match &self.market {
            Some(provider) => self.bounded(provider.get_snapshot(token, at)).await,
            None => Ok(None),
        }
    }

    async fn price_samples(
        &self,
        token: &TokenId,
        start: TimeMs,
        end: TimeMs,
    ) -> Result<Vec<PricePoint>, LookupError> {
        match &self.prices {
            Some(provider) => self.bounded(provider.get_price_series(token, start, end)).await,
            None => Ok(Vec::new()),
        }
    }
}

fn timing(lot: &ClosedLot) -> LotTiming {
    LotTiming {
        hold_time_minutes: Some(lot.entry_time.minutes_until(lot.exit_time)),
        entry_hour_of_day: lot.entry_time.hour_of_day(),
        entry_day_of_week: lot.entry_time.day_of_week(),
        exit_hour_of_day: lot.exit_time.hour_of_day(),
        exit_day_of_week: lot.exit_time.day_of_week(),
    }
}

fn market_context(
    entry_time: TimeMs,
    entry: Option<MarketSnapshot>,
    exit: Option<MarketSnapshot>,
) -> MarketContext {
    let created_at = entry
        .as_ref()
        .and_then(|s| s.token_created_at)
        .or_else(|| exit.as_ref().and_then(|s| s.token_created_at));
    let entry = entry.unwrap_or_default();
    let exit = exit.unwrap_or_default();

    MarketContext {
        entry_market_cap: entry.market_cap,
        exit_market_cap: exit.market_cap,
        entry_liquidity: entry.liquidity,
        exit_liquidity: exit.liquidity,
        entry_volume_24h: entry.volume_24h,
        exit_volume_24h: exit.volume_24h,
        token_age_at_entry_minutes: created_at.map(|created| created.minutes_until(entry_time)),
    }
}

fn exit_analysis(lot: &ClosedLot, samples: &[PricePoint]) -> ExitAnalysis {
    let metrics = price_path_metrics(
        PricePoint::new(lot.entry_time, lot.entry_price),
        PricePoint::new(lot.exit_time, lot.exit_price),
        samples,
    );

    let exit_reason = classify_exit(&ExitInputs {
        entry_price: lot.entry_price,
        exit_price: lot.exit_price,
        realized_pnl_percent: lot.realized_pnl_percent,
        max_profit_percent: metrics.max_profit_percent,
        max_drawdown_percent: metrics.max_drawdown_percent,
    });

    ExitAnalysis {
        exit_reason,
        max_profit_percent: metrics.max_profit_percent,
        max_drawdown_percent: metrics.max_drawdown_percent,
        time_to_max_profit_minutes: metrics.time_to_max_profit_minutes,
    }
}
