//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `trades.rs` - Trade ingestion and trade-source reads
//! - `lots.rs` - Closed lot and open position replace/read operations

mod lots;
mod trades;

use crate::datasource::{DataSourceError, TrackingStartSource, TradeSource};
use crate::domain::{Decimal, TimeMs, TokenId, TradeBatch, WalletId};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Wallet tracking
    // =========================================================================

    /// Record the point from which a wallet's trade history is complete.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn set_tracking_start(
        &self,
        wallet: &WalletId,
        start: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO wallet_tracking (wallet_id, tracking_start_ms, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(wallet_id) DO UPDATE SET
                tracking_start_ms = excluded.tracking_start_ms,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(wallet.as_str())
        .bind(start.as_ms())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn tracking_start(&self, wallet: &WalletId) -> Result<Option<TimeMs>, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT tracking_start_ms FROM wallet_tracking WHERE wallet_id = ?")
                .bind(wallet.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(ms,)| TimeMs::new(ms)))
    }
}

/// Decode a stored decimal, falling back to zero with a warning.
fn decimal_or_default(value: &str, column: &'static str, wallet: &str) -> Decimal {
    Decimal::from_str(value).unwrap_or_else(|e| {
        warn!(wallet = %wallet, column, value = %value, error = %e, "Failed to parse stored decimal, using default");
        Decimal::default()
    })
}

/// Decode a nullable stored decimal; unparseable values become None.
fn optional_decimal(value: Option<String>, column: &'static str, wallet: &str) -> Option<Decimal> {
    let value = value?;
    match Decimal::from_str(&value) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(wallet = %wallet, column, value = %value, error = %e, "Failed to parse stored decimal, dropping value");
            None
        }
    }
}

#[async_trait]
impl TradeSource for Repository {
    async fn list_trades(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
    ) -> Result<TradeBatch, DataSourceError> {
        Ok(self.query_trades(wallet, token).await?)
    }

    async fn list_tokens(&self, wallet: &WalletId) -> Result<Vec<TokenId>, DataSourceError> {
        Ok(self.query_trade_tokens(wallet).await?)
    }
}

#[async_trait]
impl TrackingStartSource for Repository {
    async fn get_tracking_start(
        &self,
        wallet: &WalletId,
    ) -> Result<Option<TimeMs>, DataSourceError> {
        Ok(self.tracking_start(wallet).await?)
    }
}
