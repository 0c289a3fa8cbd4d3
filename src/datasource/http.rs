//! HTTP market-data client.

use super::{
    DataSourceError, MarketSnapshot, MarketSnapshotProvider, PriceHistoryProvider, PricePoint,
};
use crate::domain::{TimeMs, TokenId};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Market snapshots and price history served by a JSON HTTP service.
///
/// * `GET {base}/tokens/{token}/snapshot?at={ms}`
/// * `GET {base}/tokens/{token}/prices?from={ms}&to={ms}`
///
/// 404 means the service has no data for the token.
#[derive(Debug, Clone)]
pub struct HttpMarketDataSource {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl HttpMarketDataSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Bound the total time spent retrying one request.
    pub fn with_max_retry_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    fn token_url(&self, token: &TokenId, resource: &str) -> String {
        format!("{}/tokens/{}/{}", self.base_url, token, resource)
    }

    /// GET with retry. Returns `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, i64)],
    ) -> Result<Option<T>, DataSourceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl MarketSnapshotProvider for HttpMarketDataSource {
    async fn get_snapshot(
        &self,
        token: &TokenId,
        at: TimeMs,
    ) -> Result<Option<MarketSnapshot>, DataSourceError> {
        debug!(token = %token, at_ms = at.as_ms(), "Fetching market snapshot");

        let url = self.token_url(token, "snapshot");
        self.get_json(&url, &[("at", at.as_ms())]).await
    }
}

#[async_trait]
impl PriceHistoryProvider for HttpMarketDataSource {
    async fn get_price_series(
        &self,
        token: &TokenId,
        start: TimeMs,
        end: TimeMs,
    ) -> Result<Vec<PricePoint>, DataSourceError> {
        debug!(
            token = %token,
            from_ms = start.as_ms(),
            to_ms = end.as_ms(),
            "Fetching price series"
        );

        let url = self.token_url(token, "prices");
        let points: Option<Vec<PricePoint>> = self
            .get_json(&url, &[("from", start.as_ms()), ("to", end.as_ms())])
            .await?;
        Ok(points.unwrap_or_default())
    }
}
