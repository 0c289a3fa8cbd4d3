use std::collections::{BTreeMap, VecDeque};

use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::domain::{
    sort_trades_deterministic, ClosedLot, Decimal, OpenPosition, Side, TimeMs, TokenId, Trade,
    TradeDiagnostic, TradeRejection, WalletId,
};

/// Default dust threshold: quantities at or below this are treated as zero.
pub const DEFAULT_DUST_EPSILON: Decimal = Decimal::from_inner(dec!(0.000001));

/// Matching parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConfig {
    pub dust_epsilon: Decimal,
    /// Inventory originating before this point is flagged as pre-history.
    pub tracking_start: Option<TimeMs>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            dust_epsilon: DEFAULT_DUST_EPSILON,
            tracking_start: None,
        }
    }
}

/// Unconsumed buy inventory waiting in the FIFO queue.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenLot {
    remaining_quantity: Decimal,
    unit_cost: Decimal,
    origin_trade_id: String,
    origin_timestamp: TimeMs,
}

/// Output of matching one (wallet, token) trade list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutput {
    pub closed_lots: Vec<ClosedLot>,
    pub open_position: Option<OpenPosition>,
    pub diagnostics: Vec<TradeDiagnostic>,
}

/// FIFO matcher for a single (wallet, token) scope.
///
/// Owns its queue for the duration of one run; nothing is shared between runs.
pub struct LotMatcher {
    wallet_id: WalletId,
    token_id: TokenId,
    config: MatchConfig,
    queue: VecDeque<OpenLot>,
    /// Running totals of queued inventory, kept in range by rejecting buys.
    queued_quantity: Decimal,
    queued_cost: Decimal,
    next_sequence: i64,
    /// Price used as the estimated entry for sells with no known inventory.
    fallback_entry_price: Decimal,

    // Outputs accumulated during processing.
    closed_lots: Vec<ClosedLot>,
    diagnostics: Vec<TradeDiagnostic>,
}

impl LotMatcher {
    pub fn new(wallet_id: WalletId, token_id: TokenId, config: MatchConfig) -> Self {
        Self {
            wallet_id,
            token_id,
            config,
            queue: VecDeque::new(),
            queued_quantity: Decimal::zero(),
            queued_cost: Decimal::zero(),
            next_sequence: 1,
            fallback_entry_price: Decimal::zero(),
            closed_lots: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Set the entry price estimate used for pre-history sells.
    pub fn with_fallback_entry_price(mut self, price: Decimal) -> Self {
        self.fallback_entry_price = price;
        self
    }

    /// Match an entire trade list for this scope.
    ///
    /// Trades are sorted by (timestamp, sequence_hint, id) first; trades for any other
    /// wallet or token are ignored.
    pub fn run(mut self, trades: &[Trade]) -> MatchOutput {
        let mut scoped: Vec<Trade> = trades
            .iter()
            .filter(|t| t.wallet_id == self.wallet_id && t.token_id == self.token_id)
            .cloned()
            .collect();
        sort_trades_deterministic(&mut scoped);

        if let Some(price) = earliest_known_price(&scoped) {
            self.fallback_entry_price = price;
        }

        for trade in &scoped {
            self.process_trade(trade);
        }
        self.into_outputs()
    }

    /// Process a single trade, updating the queue and emitting closed lots.
    ///
    /// Callers must feed trades in ascending (timestamp, sequence_hint) order.
    pub fn process_trade(&mut self, trade: &Trade) {
        if trade.side == Side::Void {
            debug!(trade_id = %trade.id, "Void trade excluded from matching");
            return;
        }

        if let Err(reason) = trade.validate() {
            self.reject(trade, reason);
            return;
        }

        if trade.side.is_acquisition() {
            self.handle_acquisition(trade);
        } else {
            self.handle_disposal(trade);
        }
    }

    fn reject(&mut self, trade: &Trade, reason: TradeRejection) {
        warn!(
            wallet = %self.wallet_id,
            token = %self.token_id,
            trade_id = %trade.id,
            error = %reason,
            "Skipping malformed trade"
        );
        self.diagnostics.push(TradeDiagnostic::new(
            trade.id.clone(),
            Some(trade.token_id.clone()),
            reason,
        ));
    }

    fn out_of_range(trade: &Trade) -> TradeRejection {
        TradeRejection::ValueOutOfRange {
            quantity: trade.quantity,
            unit_cost: trade.unit_cost,
        }
    }

    /// Push a new lot onto the back of the queue.
    ///
    /// A buy that would push the queued quantity or cost out of range is rejected.
    fn handle_acquisition(&mut self, trade: &Trade) {
        if trade.quantity.is_dust(self.config.dust_epsilon) {
            debug!(trade_id = %trade.id, quantity = %trade.quantity, "Ignoring dust buy");
            return;
        }

        let totals = trade.notional().and_then(|cost| {
            Some((
                self.queued_quantity.checked_add(trade.quantity)?,
                self.queued_cost.checked_add(cost)?,
            ))
        });
        let Some((queued_quantity, queued_cost)) = totals else {
            self.reject(trade, Self::out_of_range(trade));
            return;
        };
        self.queued_quantity = queued_quantity;
        self.queued_cost = queued_cost;

        self.queue.push_back(OpenLot {
            remaining_quantity: trade.quantity,
            unit_cost: trade.unit_cost,
            origin_trade_id: trade.id.clone(),
            origin_timestamp: trade.timestamp,
        });
    }

    /// Consume from the front of the queue until the sell is satisfied.
    fn handle_disposal(&mut self, trade: &Trade) {
        let epsilon = self.config.dust_epsilon;
        let mut unmatched = trade.quantity;

        while !unmatched.is_dust(epsilon) {
            let Some(front) = self.queue.front_mut() else {
                break;
            };

            let take = front.remaining_quantity.min(unmatched);
            // Both products are bounded by notionals already checked on entry.
            let lot = ClosedLot::realized(
                trade,
                Some(front.origin_trade_id.clone()),
                take,
                front.unit_cost,
                front.origin_timestamp,
            )
            .map(|lot| lot.with_pre_history(predates(self.config.tracking_start, front.origin_timestamp)));

            front.remaining_quantity -= take;
            unmatched -= take;
            self.queued_quantity -= take;
            self.queued_cost -= lot.as_ref().map_or_else(Decimal::zero, |l| l.cost_basis);
            if front.remaining_quantity.is_dust(epsilon) {
                let residual = front.remaining_quantity;
                self.queued_quantity -= residual;
                self.queued_cost -= residual
                    .checked_mul(front.unit_cost)
                    .unwrap_or_else(Decimal::zero);
                self.queue.pop_front();
            }

            match lot {
                Some(lot) => self.emit(lot),
                None => self.reject(trade, Self::out_of_range(trade)),
            }
        }

        if !unmatched.is_dust(epsilon) {
            self.handle_pre_history_remainder(trade, unmatched);
        } else if !unmatched.is_zero() {
            debug!(trade_id = %trade.id, remainder = %unmatched, "Dropping dust sell remainder");
        }
    }

    /// The sell exceeded all known inventory: emit one flagged lot for the remainder.
    fn handle_pre_history_remainder(&mut self, trade: &Trade, unmatched: Decimal) {
        let entry_time = match self.config.tracking_start {
            Some(start) if start <= trade.timestamp => start,
            _ => trade.timestamp,
        };

        warn!(
            wallet = %self.wallet_id,
            token = %self.token_id,
            trade_id = %trade.id,
            quantity = %unmatched,
            estimated_entry = %self.fallback_entry_price,
            "Sell exceeds known inventory; emitting pre-history lot with unknown cost"
        );

        match ClosedLot::realized(trade, None, unmatched, self.fallback_entry_price, entry_time) {
            Some(lot) => self.emit(lot.with_pre_history(true)),
            None => self.reject(trade, Self::out_of_range(trade)),
        }
    }

    fn emit(&mut self, mut lot: ClosedLot) {
        lot.sequence_number = self.next_sequence;
        self.next_sequence += 1;
        self.closed_lots.push(lot);
    }

    /// Residual inventory collapsed into a single open position.
    fn open_position(&self) -> Option<OpenPosition> {
        let remaining = self
            .queue
            .iter()
            .try_fold(Decimal::zero(), |acc, l| acc.checked_add(l.remaining_quantity))?;
        if remaining.is_dust(self.config.dust_epsilon) {
            return None;
        }

        let total_cost = self.queue.iter().try_fold(Decimal::zero(), |acc, l| {
            acc.checked_add(l.remaining_quantity.checked_mul(l.unit_cost)?)
        })?;
        let opened_at = self.queue.front()?.origin_timestamp;

        Some(OpenPosition {
            wallet_id: self.wallet_id.clone(),
            token_id: self.token_id.clone(),
            remaining_quantity: remaining,
            average_cost: total_cost.checked_div(remaining).unwrap_or_else(Decimal::zero),
            opened_at,
        })
    }

    /// Get the accumulated outputs.
    pub fn into_outputs(self) -> MatchOutput {
        let open_position = self.open_position();
        MatchOutput {
            closed_lots: self.closed_lots,
            open_position,
            diagnostics: self.diagnostics,
        }
    }
}

fn predates(tracking_start: Option<TimeMs>, origin: TimeMs) -> bool {
    tracking_start.map_or(false, |start| origin < start)
}

/// Unit cost of the earliest valid, non-void trade in an already sorted list.
fn earliest_known_price(sorted: &[Trade]) -> Option<Decimal> {
    sorted
        .iter()
        .find(|t| t.validate().is_ok() && (t.side.is_acquisition() || t.side.is_disposal()))
        .map(|t| t.unit_cost)
}

/// Output of matching every token in a wallet's trade list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletMatch {
    /// Per-token outputs keyed by token id.
    pub tokens: BTreeMap<TokenId, MatchOutput>,
}

impl WalletMatch {
    pub fn closed_lots(&self) -> impl Iterator<Item = &ClosedLot> {
        self.tokens.values().flat_map(|o| o.closed_lots.iter())
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &OpenPosition> {
        self.tokens.values().filter_map(|o| o.open_position.as_ref())
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &TradeDiagnostic> {
        self.tokens.values().flat_map(|o| o.diagnostics.iter())
    }
}

/// Match one wallet's trades, optionally restricted to a single token.
///
/// Each token gets its own freshly constructed matcher; token order is by id so the
/// output is reproducible.
pub fn match_wallet_trades(
    wallet_id: &WalletId,
    trades: &[Trade],
    token: Option<&TokenId>,
    config: &MatchConfig,
) -> WalletMatch {
    let mut by_token: BTreeMap<TokenId, Vec<Trade>> = BTreeMap::new();
    for trade in trades.iter().filter(|t| &t.wallet_id == wallet_id) {
        if token.map_or(true, |tk| tk == &trade.token_id) {
            by_token
                .entry(trade.token_id.clone())
                .or_default()
                .push(trade.clone());
        }
    }

    let tokens = by_token
        .into_iter()
        .map(|(token_id, token_trades)| {
            let matcher = LotMatcher::new(wallet_id.clone(), token_id.clone(), config.clone());
            (token_id, matcher.run(&token_trades))
        })
        .collect();

    WalletMatch { tokens }
}
