use std::sync::Arc;
use std::time::Duration;

use lotledger::datasource::{MarketSnapshot, MockDataSource, PricePoint};
use lotledger::db::init_db;
use lotledger::engine::LotEnricher;
use lotledger::{Decimal, Recomputer, Repository, Side, TimeMs, TokenId, Trade, WalletId};
use tempfile::TempDir;
use tokio_test::assert_ok;

const MIN: i64 = 60_000;
// 2024-01-08 09:00 UTC, a Monday.
const T0: i64 = 1_704_704_400_000;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn trade(token: &str, side: Side, qty: &str, px: &str, minute: i64, seq: i64) -> Trade {
    Trade::new(
        TimeMs::new(T0 + minute * MIN),
        WalletId::new("W1"),
        TokenId::new(token),
        side,
        d(qty),
        d(px),
        seq,
        None,
    )
}

async fn setup_repo() -> (Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    (Arc::new(Repository::new(pool)), temp_dir)
}

fn wallet() -> WalletId {
    WalletId::new("W1")
}

#[tokio::test]
async fn test_recompute_persists_lots_and_positions() {
    let (repo, _temp) = setup_repo().await;
    assert_ok!(
        repo.insert_trades_batch(&[
            trade("AAA", Side::Buy, "100", "1", 0, 1),
            trade("AAA", Side::Buy, "50", "1.5", 10, 2),
            trade("AAA", Side::Sell, "120", "2", 70, 3),
        ])
        .await
    );
    let recomputer = Recomputer::from_repository(repo.clone());

    let outcome = assert_ok!(recomputer.recompute_positions(&wallet(), None).await);
    assert!(outcome.is_complete());
    assert_eq!(outcome.closed_lots.len(), 2);

    let lots = assert_ok!(repo.query_closed_lots(&wallet(), None).await);
    assert_eq!(lots, outcome.closed_lots);
    assert_eq!(lots[0].realized_pnl, d("100"));
    assert_eq!(lots[1].realized_pnl, d("10"));
    assert_eq!(lots[0].timing.hold_time_minutes, Some(70));
    assert_eq!(lots[1].timing.hold_time_minutes, Some(60));
    assert_eq!(lots[0].timing.entry_hour_of_day, Some(9));
    assert_eq!(lots[0].timing.entry_day_of_week, Some(1));
    // One sell over two distinct buys: each buy counted once, span shared.
    assert_eq!(lots[0].dca.dca_entry_count, Some(1));
    assert_eq!(lots[1].dca.dca_entry_count, Some(1));
    assert_eq!(lots[0].dca.dca_time_span_minutes, Some(10));
    assert_eq!(lots[1].dca.dca_time_span_minutes, Some(10));
    // Both fragments were entered before the sell, so neither is a re-entry.
    assert_eq!(lots[1].reentry.reentry_time_minutes, None);

    let positions = assert_ok!(repo.query_open_positions(&wallet(), None).await);
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].remaining_quantity, d("30"));
    assert_eq!(positions[0].average_cost, d("1.5"));
}

#[tokio::test]
async fn test_recompute_is_idempotent() {
    let (repo, _temp) = setup_repo().await;
    assert_ok!(
        repo.insert_trades_batch(&[
            trade("AAA", Side::Buy, "3", "1", 0, 1),
            trade("AAA", Side::Sell, "1", "2", 5, 2),
            trade("AAA", Side::Buy, "2", "1.1", 9, 3),
            trade("AAA", Side::Sell, "3", "0.8", 20, 4),
            trade("BBB", Side::Buy, "9", "0.1", 1, 5),
        ])
        .await
    );
    let recomputer = Recomputer::from_repository(repo.clone());

    assert_ok!(recomputer.recompute_positions(&wallet(), None).await);
    let lots_first = assert_ok!(repo.query_closed_lots(&wallet(), None).await);
    let positions_first = assert_ok!(repo.query_open_positions(&wallet(), None).await);

    assert_ok!(recomputer.recompute_positions(&wallet(), None).await);
    let lots_second = assert_ok!(repo.query_closed_lots(&wallet(), None).await);
    let positions_second = assert_ok!(repo.query_open_positions(&wallet(), None).await);

    assert_eq!(lots_first, lots_second);
    assert_eq!(positions_first, positions_second);
    assert_eq!(lots_first.len(), 3);
}

#[tokio::test]
async fn test_token_scoped_recompute_leaves_other_tokens() {
    let (repo, _temp) = setup_repo().await;
    assert_ok!(
        repo.insert_trades_batch(&[
            trade("AAA", Side::Buy, "1", "1", 0, 1),
            trade("BBB", Side::Buy, "1", "1", 0, 2),
        ])
        .await
    );
    let recomputer = Recomputer::from_repository(repo.clone());

    let aaa = TokenId::new("AAA");
    let outcome = assert_ok!(recomputer.recompute_positions(&wallet(), Some(&aaa)).await);
    assert_eq!(outcome.open_positions.len(), 1);

    let positions = assert_ok!(repo.query_open_positions(&wallet(), None).await);
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].token_id, aaa);
}

#[tokio::test]
async fn test_fully_closed_position_is_removed() {
    let (repo, _temp) = setup_repo().await;
    assert_ok!(repo.insert_trade(&trade("AAA", Side::Buy, "10", "1", 0, 1)).await);
    let recomputer = Recomputer::from_repository(repo.clone());

    assert_ok!(recomputer.recompute_positions(&wallet(), None).await);
    assert_eq!(assert_ok!(repo.query_open_positions(&wallet(), None).await).len(), 1);

    assert_ok!(repo.insert_trade(&trade("AAA", Side::Sell, "10", "1.2", 30, 2)).await);
    assert_ok!(recomputer.recompute_positions(&wallet(), None).await);

    assert!(assert_ok!(repo.query_open_positions(&wallet(), None).await).is_empty());
    let lots = assert_ok!(repo.query_closed_lots(&wallet(), None).await);
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].realized_pnl, d("2"));
}

#[tokio::test]
async fn test_tracking_start_flags_pre_history_lots() {
    let (repo, _temp) = setup_repo().await;
    assert_ok!(
        repo.insert_trades_batch(&[
            trade("AAA", Side::Buy, "1", "1", 0, 1),
            trade("AAA", Side::Sell, "3", "2", 60, 2),
        ])
        .await
    );
    assert_ok!(repo.set_tracking_start(&wallet(), TimeMs::new(T0 + 30 * MIN)).await);
    let recomputer = Recomputer::from_repository(repo.clone());

    assert_ok!(recomputer.recompute_positions(&wallet(), None).await);

    let lots = assert_ok!(repo.query_closed_lots(&wallet(), None).await);
    assert_eq!(lots.len(), 2);
    assert!(lots[0].is_pre_history);
    assert!(lots[0].cost_known);
    assert!(lots[1].is_pre_history);
    assert!(!lots[1].cost_known);
    assert_eq!(lots[1].buy_trade_id, None);
    assert_eq!(lots[1].entry_time, TimeMs::new(T0 + 30 * MIN));
}

#[tokio::test]
async fn test_market_context_is_persisted() {
    let (repo, _temp) = setup_repo().await;
    assert_ok!(
        repo.insert_trades_batch(&[
            trade("AAA", Side::Buy, "10", "1", 0, 1),
            trade("AAA", Side::Sell, "10", "1.5", 120, 2),
        ])
        .await
    );

    let market = Arc::new(
        MockDataSource::new()
            .with_snapshot(
                TokenId::new("AAA"),
                TimeMs::new(T0 - MIN),
                MarketSnapshot {
                    market_cap: Some(d("1000000")),
                    liquidity: Some(d("25000")),
                    volume_24h: None,
                    token_created_at: Some(TimeMs::new(T0 - 90 * MIN)),
                },
            )
            .with_prices(
                TokenId::new("AAA"),
                vec![
                    PricePoint::new(TimeMs::new(T0 + 30 * MIN), d("0.9")),
                    PricePoint::new(TimeMs::new(T0 + 90 * MIN), d("2")),
                ],
            ),
    );
    let enricher = LotEnricher::new(Duration::from_secs(1))
        .with_market(market.clone())
        .with_prices(market);
    let recomputer = Recomputer::from_repository(repo.clone()).with_enricher(enricher);

    let outcome = assert_ok!(recomputer.recompute_positions(&wallet(), None).await);
    assert_eq!(outcome.enrichment.degraded(), 0);

    let lots = assert_ok!(repo.query_closed_lots(&wallet(), None).await);
    let lot = &lots[0];
    assert_eq!(lot.market.entry_market_cap, Some(d("1000000")));
    assert_eq!(lot.market.exit_liquidity, Some(d("25000")));
    assert_eq!(lot.market.token_age_at_entry_minutes, Some(90));
    assert_eq!(lot.exit.max_profit_percent, Some(d("100")));
    assert_eq!(lot.exit.time_to_max_profit_minutes, Some(90));
}

#[tokio::test]
async fn test_slow_provider_degrades_without_failing() {
    let (repo, _temp) = setup_repo().await;
    assert_ok!(
        repo.insert_trades_batch(&[
            trade("AAA", Side::Buy, "1", "1", 0, 1),
            trade("AAA", Side::Sell, "1", "1.1", 5, 2),
        ])
        .await
    );
    let slow = Arc::new(MockDataSource::new().with_lookup_latency(Duration::from_secs(5)));
    let enricher = LotEnricher::new(Duration::from_millis(20))
        .with_market(slow.clone())
        .with_prices(slow);
    let recomputer = Recomputer::from_repository(repo.clone()).with_enricher(enricher);

    let outcome = assert_ok!(recomputer.recompute_positions(&wallet(), None).await);

    assert_eq!(outcome.enrichment.lookup_timeouts, 3);
    let lots = assert_ok!(repo.query_closed_lots(&wallet(), None).await);
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].market.entry_market_cap, None);
    assert_eq!(lots[0].timing.hold_time_minutes, Some(5));
}

#[tokio::test]
async fn test_split_buy_is_counted_once() {
    let (repo, _temp) = setup_repo().await;
    assert_ok!(
        repo.insert_trades_batch(&[
            trade("AAA", Side::Buy, "10", "1", 0, 1),
            trade("AAA", Side::Buy, "10", "2", 10, 2),
            trade("AAA", Side::Sell, "15", "3", 20, 3),
            trade("AAA", Side::Sell, "5", "3", 30, 4),
        ])
        .await
    );
    let recomputer = Recomputer::from_repository(repo.clone());

    assert_ok!(recomputer.recompute_positions(&wallet(), None).await);

    let lots = assert_ok!(repo.query_closed_lots(&wallet(), None).await);
    assert_eq!(lots.len(), 3);
    let counts: Vec<Option<u32>> = lots.iter().map(|l| l.dca.dca_entry_count).collect();
    assert_eq!(counts, vec![Some(1), Some(1), Some(0)]);
    assert!(lots.iter().all(|l| l.reentry.reentry_time_minutes.is_none()));
}
