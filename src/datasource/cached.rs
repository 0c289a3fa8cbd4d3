//! TTL cache in front of a market-data provider.

use super::{
    DataSourceError, MarketSnapshot, MarketSnapshotProvider, PriceHistoryProvider, PricePoint,
};
use crate::domain::{TimeMs, TokenId};
use async_trait::async_trait;
use moka::future::Cache;
use std::fmt;
use std::time::Duration;

/// Snapshot lookups are keyed to the minute.
const SNAPSHOT_BUCKET_MS: i64 = 60_000;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
enum CacheKey {
    Snapshot { token: TokenId, minute: i64 },
    Prices { token: TokenId, from_ms: i64, to_ms: i64 },
}

#[derive(Debug, Clone)]
enum CacheValue {
    Snapshot(Option<MarketSnapshot>),
    Prices(Vec<PricePoint>),
}

/// Wraps a provider with a moka TTL cache. Only successful lookups are cached.
#[derive(Clone)]
pub struct CachedMarketData<P> {
    inner: P,
    cache: Cache<CacheKey, CacheValue>,
}

impl<P> CachedMarketData<P> {
    pub fn new(inner: P, ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: fmt::Debug> fmt::Debug for CachedMarketData<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedMarketData")
            .field("inner", &self.inner)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl<P: MarketSnapshotProvider> MarketSnapshotProvider for CachedMarketData<P> {
    async fn get_snapshot(
        &self,
        token: &TokenId,
        at: TimeMs,
    ) -> Result<Option<MarketSnapshot>, DataSourceError> {
        let minute = at.as_ms().div_euclid(SNAPSHOT_BUCKET_MS);
        let key = CacheKey::Snapshot {
            token: token.clone(),
            minute,
        };

        if let Some(CacheValue::Snapshot(cached)) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let bucket_start = TimeMs::new(minute * SNAPSHOT_BUCKET_MS);
        let snapshot = self.inner.get_snapshot(token, bucket_start).await?;
        self.cache
            .insert(key, CacheValue::Snapshot(snapshot.clone()))
            .await;
        Ok(snapshot)
    }
}

#[async_trait]
impl<P: PriceHistoryProvider> PriceHistoryProvider for CachedMarketData<P> {
    async fn get_price_series(
        &self,
        token: &TokenId,
        start: TimeMs,
        end: TimeMs,
    ) -> Result<Vec<PricePoint>, DataSourceError> {
        let key = CacheKey::Prices {
            token: token.clone(),
            from_ms: start.as_ms(),
            to_ms: end.as_ms(),
        };

        if let Some(CacheValue::Prices(cached)) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let points = self.inner.get_price_series(token, start, end).await?;
        self.cache.insert(key, CacheValue::Prices(points.clone())).await;
        Ok(points)
    }
}
