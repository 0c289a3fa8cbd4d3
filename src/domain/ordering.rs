//! Stable trade ordering for deterministic processing.

use crate::domain::Trade;

/// Stable ordering key for trades.
///
/// Ensures deterministic ordering of trades with the same timestamp.
/// Ordering: timestamp -> sequence_hint -> trade id. Wallet-reported order is never
/// consulted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TradeOrderingKey {
    /// Time in milliseconds (primary sort).
    pub time_ms: i64,
    /// Ingestion sequence (secondary sort).
    pub sequence_hint: i64,
    /// Trade id (fallback sort).
    pub trade_id: String,
}

impl TradeOrderingKey {
    /// Create an ordering key from a Trade.
    pub fn from_trade(trade: &Trade) -> Self {
        TradeOrderingKey {
            time_ms: trade.timestamp.as_ms(),
            sequence_hint: trade.sequence_hint,
            trade_id: trade.id.clone(),
        }
    }

    /// Returns true if trade_a should come before trade_b.
    pub fn should_come_before(trade_a: &Trade, trade_b: &Trade) -> bool {
        Self::from_trade(trade_a) < Self::from_trade(trade_b)
    }
}

/// Sort trades deterministically.
pub fn sort_trades_deterministic(trades: &mut [Trade]) {
    trades.sort_by_cached_key(TradeOrderingKey::from_trade);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decimal, Side, TimeMs, TokenId, WalletId};

    fn make_trade(time_ms: i64, sequence_hint: i64, sig: &str) -> Trade {
        Trade::new(
            TimeMs::new(time_ms),
            WalletId::new("W"),
            TokenId::new("T"),
            Side::Buy,
            Decimal::from(1),
            Decimal::from(1),
            sequence_hint,
            Some(sig),
        )
    }

    #[test]
    fn test_trade_ordering_by_time() {
        let a = make_trade(1000, 9, "a");
        let b = make_trade(2000, 1, "b");

        assert!(TradeOrderingKey::should_come_before(&a, &b));
        assert!(!TradeOrderingKey::should_come_before(&b, &a));
    }

    #[test]
    fn test_trade_ordering_same_time_by_sequence() {
        let a = make_trade(1000, 1, "z");
        let b = make_trade(1000, 2, "a");

        assert!(TradeOrderingKey::should_come_before(&a, &b));
    }

    #[test]
    fn test_sort_trades_ignores_input_order() {
        let mut forward = vec![
            make_trade(2000, 1, "c"),
            make_trade(1000, 5, "b"),
            make_trade(1000, 3, "a"),
        ];
        let mut reversed: Vec<Trade> = forward.iter().rev().cloned().collect();

        sort_trades_deterministic(&mut forward);
        sort_trades_deterministic(&mut reversed);

        let ids: Vec<&str> = forward.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["tx:a", "tx:b", "tx:c"]);
        assert_eq!(forward, reversed);
    }
}
