//! Closed lot and open position operations for the repository.

use crate::db::store::{LotScope, PositionStore};
use crate::domain::{
    ClosedLot, DcaPattern, ExitAnalysis, ExitReason, LotTiming, MarketContext, OpenPosition,
    ReentryPattern, TimeMs, TokenId, WalletId,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::{decimal_or_default, optional_decimal, Repository};

const CLOSED_LOT_COLUMNS: &str = r#"
    wallet_id, token_id, sequence_number, buy_trade_id, sell_trade_id,
    size, entry_price, exit_price, cost_basis, proceeds,
    realized_pnl, realized_pnl_percent, realized_pnl_usd,
    entry_time_ms, exit_time_ms,
    hold_time_minutes, entry_hour_of_day, entry_day_of_week, exit_hour_of_day, exit_day_of_week,
    entry_market_cap, exit_market_cap, entry_liquidity, exit_liquidity,
    entry_volume_24h, exit_volume_24h, token_age_at_entry_minutes,
    exit_reason, max_profit_percent, max_drawdown_percent, time_to_max_profit_minutes,
    dca_entry_count, dca_time_span_minutes,
    reentry_time_minutes, reentry_price_change_percent, previous_cycle_pnl,
    is_pre_history, cost_known
"#;

impl Repository {
    /// Closed lots for a wallet, optionally one token, ordered by token then sequence.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_closed_lots(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
    ) -> Result<Vec<ClosedLot>, sqlx::Error> {
        let mut sql = format!("SELECT {} FROM closed_lots WHERE wallet_id = ?", CLOSED_LOT_COLUMNS);
        if token.is_some() {
            sql.push_str(" AND token_id = ?");
        }
        sql.push_str(" ORDER BY token_id ASC, sequence_number ASC");

        let mut query = sqlx::query(&sql).bind(wallet.as_str());
        if let Some(token) = token {
            query = query.bind(token.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(decode_closed_lot).collect())
    }

    /// Open positions for a wallet, optionally one token, ordered by token.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_open_positions(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
    ) -> Result<Vec<OpenPosition>, sqlx::Error> {
        let mut sql = String::from(
            r#"
            SELECT wallet_id, token_id, remaining_quantity, average_cost, opened_at_ms
            FROM open_positions
            WHERE wallet_id = ?
            "#,
        );
        if token.is_some() {
            sql.push_str(" AND token_id = ?");
        }
        sql.push_str(" ORDER BY token_id ASC");

        let mut query = sqlx::query(&sql).bind(wallet.as_str());
        if let Some(token) = token {
            query = query.bind(token.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let wallet_id: String = row.get("wallet_id");
                let remaining: String = row.get("remaining_quantity");
                let average: String = row.get("average_cost");
                OpenPosition {
                    remaining_quantity: decimal_or_default(&remaining, "remaining_quantity", &wallet_id),
                    average_cost: decimal_or_default(&average, "average_cost", &wallet_id),
                    token_id: TokenId::new(row.get::<String, _>("token_id")),
                    opened_at: TimeMs::new(row.get("opened_at_ms")),
                    wallet_id: WalletId::new(wallet_id),
                }
            })
            .collect())
    }
}

#[async_trait]
impl PositionStore for Repository {
    async fn replace_closed_lots(
        &self,
        scope: &LotScope,
        lots: &[ClosedLot],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = delete_closed_lots(&mut *tx, scope).await?;
        insert_closed_lots(&mut *tx, lots).await?;
        tx.commit().await?;

        debug!(scope = %scope, deleted, inserted = lots.len(), "Replaced closed lots");
        Ok(())
    }

    async fn replace_open_positions(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
        positions: &[OpenPosition],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = delete_open_positions(&mut *tx, wallet, token).await?;
        for position in positions {
            insert_open_position(&mut *tx, position).await?;
        }
        tx.commit().await?;

        debug!(
            wallet = %wallet,
            deleted,
            inserted = positions.len(),
            "Replaced open positions"
        );
        Ok(())
    }

    async fn replace_token_scope(
        &self,
        wallet: &WalletId,
        token: &TokenId,
        lots: &[ClosedLot],
        position: Option<&OpenPosition>,
    ) -> Result<(), sqlx::Error> {
        let scope = LotScope::token(wallet.clone(), token.clone());

        let mut tx = self.pool.begin().await?;
        delete_closed_lots(&mut *tx, &scope).await?;
        insert_closed_lots(&mut *tx, lots).await?;
        delete_open_positions(&mut *tx, wallet, Some(token)).await?;
        if let Some(position) = position {
            insert_open_position(&mut *tx, position).await?;
        }
        tx.commit().await?;

        debug!(
            wallet = %wallet,
            token = %token,
            lots = lots.len(),
            open = position.is_some(),
            "Replaced token scope"
        );
        Ok(())
    }

    async fn persisted_tokens(&self, wallet: &WalletId) -> Result<Vec<TokenId>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT token_id FROM closed_lots WHERE wallet_id = ?
            UNION
            SELECT token_id FROM open_positions WHERE wallet_id = ?
            ORDER BY token_id ASC
            "#,
        )
        .bind(wallet.as_str())
        .bind(wallet.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(token,)| TokenId::new(token)).collect())
    }
}

async fn delete_closed_lots(conn: &mut SqliteConnection, scope: &LotScope) -> Result<u64, sqlx::Error> {
    let mut sql = String::from("DELETE FROM closed_lots WHERE wallet_id = ?");
    if scope.token_id.is_some() {
        sql.push_str(" AND token_id = ?");
    }
    if scope.from_sequence.is_some() {
        sql.push_str(" AND sequence_number >= ?");
    }

    let mut query = sqlx::query(&sql).bind(scope.wallet_id.as_str());
    if let Some(token) = &scope.token_id {
        query = query.bind(token.as_str());
    }
    if let Some(seq) = scope.from_sequence {
        query = query.bind(seq);
    }

    Ok(query.execute(&mut *conn).await?.rows_affected())
}

async fn insert_closed_lots(conn: &mut SqliteConnection, lots: &[ClosedLot]) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO closed_lots ({}) VALUES ({})",
        CLOSED_LOT_COLUMNS,
        vec!["?"; 38].join(", ")
    );

    for lot in lots {
        sqlx::query(&sql)
            .bind(lot.wallet_id.as_str())
            .bind(lot.token_id.as_str())
            .bind(lot.sequence_number)
            .bind(lot.buy_trade_id.as_deref())
            .bind(lot.sell_trade_id.as_str())
            .bind(lot.size.to_canonical_string())
            .bind(lot.entry_price.to_canonical_string())
            .bind(lot.exit_price.to_canonical_string())
            .bind(lot.cost_basis.to_canonical_string())
            .bind(lot.proceeds.to_canonical_string())
            .bind(lot.realized_pnl.to_canonical_string())
            .bind(lot.realized_pnl_percent.to_canonical_string())
            .bind(lot.realized_pnl_usd.map(|d| d.to_canonical_string()))
            .bind(lot.entry_time.as_ms())
            .bind(lot.exit_time.as_ms())
            .bind(lot.timing.hold_time_minutes)
            .bind(lot.timing.entry_hour_of_day.map(i64::from))
            .bind(lot.timing.entry_day_of_week.map(i64::from))
            .bind(lot.timing.exit_hour_of_day.map(i64::from))
            .bind(lot.timing.exit_day_of_week.map(i64::from))
            .bind(lot.market.entry_market_cap.map(|d| d.to_canonical_string()))
            .bind(lot.market.exit_market_cap.map(|d| d.to_canonical_string()))
            .bind(lot.market.entry_liquidity.map(|d| d.to_canonical_string()))
            .bind(lot.market.exit_liquidity.map(|d| d.to_canonical_string()))
            .bind(lot.market.entry_volume_24h.map(|d| d.to_canonical_string()))
            .bind(lot.market.exit_volume_24h.map(|d| d.to_canonical_string()))
            .bind(lot.market.token_age_at_entry_minutes)
            .bind(lot.exit.exit_reason.as_str())
            .bind(lot.exit.max_profit_percent.map(|d| d.to_canonical_string()))
            .bind(lot.exit.max_drawdown_percent.map(|d| d.to_canonical_string()))
            .bind(lot.exit.time_to_max_profit_minutes)
            .bind(lot.dca.dca_entry_count.map(i64::from))
            .bind(lot.dca.dca_time_span_minutes)
            .bind(lot.reentry.reentry_time_minutes)
            .bind(lot.reentry.reentry_price_change_percent.map(|d| d.to_canonical_string()))
            .bind(lot.reentry.previous_cycle_pnl.map(|d| d.to_canonical_string()))
            .bind(lot.is_pre_history)
            .bind(lot.cost_known)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

async fn delete_open_positions(
    conn: &mut SqliteConnection,
    wallet: &WalletId,
    token: Option<&TokenId>,
) -> Result<u64, sqlx::Error> {
    let result = match token {
        Some(token) => {
            sqlx::query("DELETE FROM open_positions WHERE wallet_id = ? AND token_id = ?")
                .bind(wallet.as_str())
                .bind(token.as_str())
                .execute(&mut *conn)
                .await?
        }
        None => {
            sqlx::query("DELETE FROM open_positions WHERE wallet_id = ?")
                .bind(wallet.as_str())
                .execute(&mut *conn)
                .await?
        }
    };
    Ok(result.rows_affected())
}

async fn insert_open_position(
    conn: &mut SqliteConnection,
    position: &OpenPosition,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO open_positions (
            wallet_id, token_id, remaining_quantity, average_cost, opened_at_ms
        ) VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(position.wallet_id.as_str())
    .bind(position.token_id.as_str())
    .bind(position.remaining_quantity.to_canonical_string())
    .bind(position.average_cost.to_canonical_string())
    .bind(position.opened_at.as_ms())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn small_int(row: &SqliteRow, column: &str) -> Option<u32> {
    row.get::<Option<i64>, _>(column)
        .and_then(|v| u32::try_from(v).ok())
}

fn decode_closed_lot(row: &SqliteRow) -> ClosedLot {
    let wallet: String = row.get("wallet_id");
    let w = wallet.as_str();
    let dec = |column: &'static str| decimal_or_default(&row.get::<String, _>(column), column, w);
    let opt_dec = |column: &'static str| optional_decimal(row.get(column), column, w);

    let exit_reason: String = row.get("exit_reason");

    ClosedLot {
        wallet_id: WalletId::new(wallet.clone()),
        token_id: TokenId::new(row.get::<String, _>("token_id")),
        buy_trade_id: row.get("buy_trade_id"),
        sell_trade_id: row.get("sell_trade_id"),
        sequence_number: row.get("sequence_number"),
        size: dec("size"),
        entry_price: dec("entry_price"),
        exit_price: dec("exit_price"),
        cost_basis: dec("cost_basis"),
        proceeds: dec("proceeds"),
        realized_pnl: dec("realized_pnl"),
        realized_pnl_percent: dec("realized_pnl_percent"),
        realized_pnl_usd: opt_dec("realized_pnl_usd"),
        entry_time: TimeMs::new(row.get("entry_time_ms")),
        exit_time: TimeMs::new(row.get("exit_time_ms")),
        timing: LotTiming {
            hold_time_minutes: row.get("hold_time_minutes"),
            entry_hour_of_day: small_int(row, "entry_hour_of_day"),
            entry_day_of_week: small_int(row, "entry_day_of_week"),
            exit_hour_of_day: small_int(row, "exit_hour_of_day"),
            exit_day_of_week: small_int(row, "exit_day_of_week"),
        },
        market: MarketContext {
            entry_market_cap: opt_dec("entry_market_cap"),
            exit_market_cap: opt_dec("exit_market_cap"),
            entry_liquidity: opt_dec("entry_liquidity"),
            exit_liquidity: opt_dec("exit_liquidity"),
            entry_volume_24h: opt_dec("entry_volume_24h"),
            exit_volume_24h: opt_dec("exit_volume_24h"),
            token_age_at_entry_minutes: row.get("token_age_at_entry_minutes"),
        },
        exit: ExitAnalysis {
            exit_reason: ExitReason::parse(&exit_reason).unwrap_or_default(),
            max_profit_percent: opt_dec("max_profit_percent"),
            max_drawdown_percent: opt_dec("max_drawdown_percent"),
            time_to_max_profit_minutes: row.get("time_to_max_profit_minutes"),
        },
        dca: DcaPattern {
            dca_entry_count: small_int(row, "dca_entry_count"),
            dca_time_span_minutes: row.get("dca_time_span_minutes"),
        },
        reentry: ReentryPattern {
            reentry_time_minutes: row.get("reentry_time_minutes"),
            reentry_price_change_percent: opt_dec("reentry_price_change_percent"),
            previous_cycle_pnl: opt_dec("previous_cycle_pnl"),
        },
        is_pre_history: row.get("is_pre_history"),
        cost_known: row.get("cost_known"),
    }
}
