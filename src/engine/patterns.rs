//! Accumulation (DCA) and re-entry patterns across a token's closed lots.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{ClosedLot, DcaPattern, ReentryPattern, TimeMs, TokenId, WalletId};

type ScopeKey = (WalletId, TokenId);

/// Lot indices per (wallet, token), ordered by sequence number.
fn indices_by_scope(lots: &[ClosedLot]) -> BTreeMap<ScopeKey, Vec<usize>> {
    let mut scopes: BTreeMap<ScopeKey, Vec<usize>> = BTreeMap::new();
    for (index, lot) in lots.iter().enumerate() {
        scopes
            .entry((lot.wallet_id.clone(), lot.token_id.clone()))
            .or_default()
            .push(index);
    }
    for indices in scopes.values_mut() {
        indices.sort_by_key(|&i| lots[i].sequence_number);
    }
    scopes
}

/// Fill `dca` on every lot.
///
/// Each originating buy is counted once, on the first lot (by sequence number) that
/// consumes it; later fragments of the same buy and pre-history lots count 0. Summed
/// over a scope, `dca_entry_count` is the number of distinct buys consumed. The span
/// covers the distinct buys consumed by the lot's sell.
pub fn apply_dca_patterns(lots: &mut [ClosedLot]) {
    let mut spans: BTreeMap<(ScopeKey, String), BTreeSet<TimeMs>> = BTreeMap::new();
    for lot in lots.iter().filter(|l| l.buy_trade_id.is_some()) {
        spans
            .entry((
                (lot.wallet_id.clone(), lot.token_id.clone()),
                lot.sell_trade_id.clone(),
            ))
            .or_default()
            .insert(lot.entry_time);
    }

    for (scope, indices) in indices_by_scope(lots) {
        let mut counted: BTreeSet<String> = BTreeSet::new();
        for index in indices {
            let lot = &mut lots[index];
            let first_fragment = match &lot.buy_trade_id {
                Some(buy_id) => counted.insert(buy_id.clone()),
                None => false,
            };
            let span = spans
                .get(&(scope.clone(), lot.sell_trade_id.clone()))
                .and_then(|times| Some(times.first()?.minutes_until(*times.last()?)));

            lot.dca = DcaPattern {
                dca_entry_count: Some(u32::from(first_fragment)),
                dca_time_span_minutes: span,
            };
        }
    }
}

/// Fill `reentry` relative to the previous cycle of the same (wallet, token).
///
/// The previous cycle is the latest earlier lot that exited strictly before this lot
/// was entered. Fragments of the same buy or sell overlap in time and never pair up;
/// a lot with no such predecessor keeps all re-entry fields empty.
pub fn apply_reentry_patterns(lots: &mut [ClosedLot]) {
    for indices in indices_by_scope(lots).into_values() {
        for (position, &index) in indices.iter().enumerate() {
            // Exit times are non-decreasing in sequence order.
            let earlier = &indices[..position];
            let entry_time = lots[index].entry_time;
            let before = earlier.partition_point(|&i| lots[i].exit_time < entry_time);

            let pattern = match before.checked_sub(1).map(|p| &lots[earlier[p]]) {
                Some(prev) => {
                    let current = &lots[index];
                    ReentryPattern {
                        reentry_time_minutes: Some(prev.exit_time.minutes_until(current.entry_time)),
                        reentry_price_change_percent: (current.entry_price - prev.exit_price)
                            .percent_of(prev.exit_price),
                        previous_cycle_pnl: Some(prev.realized_pnl),
                    }
                }
                None => ReentryPattern::default(),
            };
            lots[index].reentry = pattern;
        }
    }
}
