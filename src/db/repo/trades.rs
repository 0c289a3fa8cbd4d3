//! Trade operations for the repository.

use crate::domain::{
    Decimal, Side, TimeMs, TokenId, Trade, TradeBatch, TradeDiagnostic, TradeRejection, WalletId,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

use super::{optional_decimal, Repository};

const INSERT_TRADE_SQL: &str = r#"
    INSERT INTO trades (
        trade_id, wallet_id, token_id, side, quantity, unit_cost,
        time_ms, sequence_hint, base_usd_rate, created_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(trade_id) DO NOTHING
"#;

impl Repository {
    /// Insert a trade idempotently.
    ///
    /// Returns false when a trade with the same id already exists.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_trade(&self, trade: &Trade) -> Result<bool, sqlx::Error> {
        let result = bind_trade(sqlx::query(INSERT_TRADE_SQL), trade, chrono::Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert multiple trades in a single transaction.
    ///
    /// Returns the number of newly inserted trades (excludes duplicates).
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_trades_batch(&self, trades: &[Trade]) -> Result<usize, sqlx::Error> {
        if trades.is_empty() {
            return Ok(0);
        }

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for trade in trades {
            let result = bind_trade(sqlx::query(INSERT_TRADE_SQL), trade, created_at)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Query a wallet's trades, optionally for one token, in matching order.
    ///
    /// Rows that do not decode into a trade are reported in `rejected`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_trades(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
    ) -> Result<TradeBatch, sqlx::Error> {
        let rows = match token {
            Some(token) => {
                sqlx::query(
                    r#"
                    SELECT trade_id, wallet_id, token_id, side, quantity, unit_cost,
                           time_ms, sequence_hint, base_usd_rate
                    FROM trades
                    WHERE wallet_id = ? AND token_id = ?
                    ORDER BY time_ms ASC, sequence_hint ASC, trade_id ASC
                    "#,
                )
                .bind(wallet.as_str())
                .bind(token.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT trade_id, wallet_id, token_id, side, quantity, unit_cost,
                           time_ms, sequence_hint, base_usd_rate
                    FROM trades
                    WHERE wallet_id = ?
                    ORDER BY token_id ASC, time_ms ASC, sequence_hint ASC, trade_id ASC
                    "#,
                )
                .bind(wallet.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut batch = TradeBatch::default();
        for row in &rows {
            match decode_trade(row) {
                Ok(trade) => batch.trades.push(trade),
                Err(diagnostic) => {
                    warn!(
                        wallet = %wallet,
                        trade_id = %diagnostic.trade_id,
                        error = %diagnostic.reason,
                        "Stored trade could not be decoded"
                    );
                    batch.rejected.push(diagnostic);
                }
            }
        }

        Ok(batch)
    }

    /// Distinct tokens with at least one trade for the wallet.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_trade_tokens(&self, wallet: &WalletId) -> Result<Vec<TokenId>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT token_id FROM trades WHERE wallet_id = ? ORDER BY token_id ASC",
        )
        .bind(wallet.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(token,)| TokenId::new(token)).collect())
    }
}

fn bind_trade<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    trade: &'q Trade,
    created_at: i64,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(trade.id.as_str())
        .bind(trade.wallet_id.as_str())
        .bind(trade.token_id.as_str())
        .bind(trade.side.as_str())
        .bind(trade.quantity.to_canonical_string())
        .bind(trade.unit_cost.to_canonical_string())
        .bind(trade.timestamp.as_ms())
        .bind(trade.sequence_hint)
        .bind(trade.base_usd_rate.map(|d| d.to_canonical_string()))
        .bind(created_at)
}

fn decode_trade(row: &SqliteRow) -> Result<Trade, TradeDiagnostic> {
    let trade_id: String = row.get("trade_id");
    let wallet_id: String = row.get("wallet_id");
    let token_id = TokenId::new(row.get::<String, _>("token_id"));

    let reject = |reason: TradeRejection| {
        TradeDiagnostic::new(trade_id.clone(), Some(token_id.clone()), reason)
    };

    let side_str: String = row.get("side");
    let side = Side::parse(&side_str).ok_or_else(|| reject(TradeRejection::UnknownSide(side_str.clone())))?;

    let quantity = parse_field(row, "quantity").map_err(&reject)?;
    let unit_cost = parse_field(row, "unit_cost").map_err(&reject)?;
    let base_usd_rate = optional_decimal(row.get("base_usd_rate"), "base_usd_rate", &wallet_id);

    Ok(Trade {
        id: trade_id.clone(),
        wallet_id: WalletId::new(wallet_id),
        token_id: token_id.clone(),
        side,
        quantity,
        unit_cost,
        timestamp: TimeMs::new(row.get("time_ms")),
        sequence_hint: row.get("sequence_hint"),
        base_usd_rate,
    })
}

fn parse_field(row: &SqliteRow, field: &'static str) -> Result<Decimal, TradeRejection> {
    let value: String = row.get(field);
    Decimal::from_str(&value).map_err(|_| TradeRejection::Unparseable { field, value })
}
