//! Serialized field names of the persisted records.
//!
//! Downstream consumers read these records as JSON; renames here are breaking.

use lotledger::engine::{LotMatcher, MatchConfig};
use lotledger::{Decimal, Side, TimeMs, TokenId, Trade, WalletId};
use serde_json::Value;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn trade(side: Side, qty: &str, px: &str, time_ms: i64, seq: i64) -> Trade {
    Trade::new(
        TimeMs::new(time_ms),
        WalletId::new("W"),
        TokenId::new("T"),
        side,
        d(qty),
        d(px),
        seq,
        Some(&format!("sig{}", seq)),
    )
}

fn sample_output() -> lotledger::engine::MatchOutput {
    LotMatcher::new(WalletId::new("W"), TokenId::new("T"), MatchConfig::default()).run(&[
        trade(Side::Buy, "4", "1", 1_000, 1),
        trade(Side::Sell, "1", "2", 61_000, 2),
    ])
}

#[test]
fn test_closed_lot_field_names() {
    let out = sample_output();
    let json = serde_json::to_value(&out.closed_lots[0]).unwrap();
    let obj = json.as_object().unwrap();

    for key in [
        "walletId",
        "tokenId",
        "buyTradeId",
        "sellTradeId",
        "sequenceNumber",
        "size",
        "entryPrice",
        "exitPrice",
        "costBasis",
        "proceeds",
        "realizedPnl",
        "realizedPnlPercent",
        "realizedPnlUsd",
        "entryTime",
        "exitTime",
        "holdTimeMinutes",
        "entryHourOfDay",
        "entryDayOfWeek",
        "exitHourOfDay",
        "exitDayOfWeek",
        "entryMarketCap",
        "exitMarketCap",
        "entryLiquidity",
        "exitLiquidity",
        "tokenAgeAtEntryMinutes",
        "exitReason",
        "maxProfitPercent",
        "maxDrawdownPercent",
        "timeToMaxProfitMinutes",
        "dcaEntryCount",
        "dcaTimeSpanMinutes",
        "reentryTimeMinutes",
        "reentryPriceChangePercent",
        "previousCyclePnl",
        "isPreHistory",
        "costKnown",
    ] {
        assert!(obj.contains_key(key), "missing field {key}");
    }

    assert_eq!(obj["sellTradeId"], Value::String("tx:sig2".to_string()));
    assert_eq!(obj["exitReason"], Value::String("unknown".to_string()));
    assert_eq!(obj["entryTime"], Value::from(1_000));
    assert_eq!(obj["isPreHistory"], Value::Bool(false));
    assert!(obj["holdTimeMinutes"].is_null());
}

#[test]
fn test_open_position_field_names() {
    let out = sample_output();
    let json = serde_json::to_value(out.open_position.as_ref().unwrap()).unwrap();
    let obj = json.as_object().unwrap();

    let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        vec!["averageCost", "openedAt", "remainingQuantity", "tokenId", "walletId"]
    );
    assert_eq!(obj["openedAt"], Value::from(1_000));
}

#[test]
fn test_serialization_is_deterministic() {
    let first = serde_json::to_string(&sample_output().closed_lots).unwrap();
    let second = serde_json::to_string(&sample_output().closed_lots).unwrap();
    assert_eq!(first, second);
}
