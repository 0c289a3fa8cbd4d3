//! Idempotent recomputation of a wallet's closed lots and open positions.
//!
//! Every run rebuilds the FIFO queues from the full persisted trade history and
//! replaces the stored rows of each (wallet, token) scope in one transaction.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::datasource::{TrackingStartSource, TradeSource};
use crate::db::{PositionStore, Repository};
use crate::domain::{ClosedLot, Decimal, OpenPosition, TokenId, TradeDiagnostic, WalletId};
use crate::engine::{
    match_wallet_trades, EnrichmentReport, LotEnricher, MatchConfig, DEFAULT_DUST_EPSILON,
};
use crate::error::RecomputeError;

/// Default bound on one recompute scope.
pub const DEFAULT_SCOPE_TIMEOUT: Duration = Duration::from_secs(120);

/// A token scope whose results could not be persisted.
#[derive(Debug)]
pub struct TokenFailure {
    pub token_id: TokenId,
    pub error: RecomputeError,
}

/// Result of one `recompute_positions` call.
#[derive(Debug, Default)]
pub struct RecomputeOutcome {
    /// Persisted closed lots, ordered by token then sequence number.
    pub closed_lots: Vec<ClosedLot>,
    pub open_positions: Vec<OpenPosition>,
    /// Trades skipped as malformed, from the source and from the matcher.
    pub diagnostics: Vec<TradeDiagnostic>,
    pub token_failures: Vec<TokenFailure>,
    pub enrichment: EnrichmentReport,
    /// Scopes cleared because their token no longer has trades.
    pub stale_scopes_cleared: usize,
}

impl RecomputeOutcome {
    pub fn is_complete(&self) -> bool {
        self.token_failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Recomputer {
    trades: Arc<dyn TradeSource>,
    tracking: Arc<dyn TrackingStartSource>,
    store: Arc<dyn PositionStore>,
    enricher: LotEnricher,
    dust_epsilon: Decimal,
    scope_timeout: Duration,
}

impl Recomputer {
    pub fn new(
        trades: Arc<dyn TradeSource>,
        tracking: Arc<dyn TrackingStartSource>,
        store: Arc<dyn PositionStore>,
    ) -> Self {
        Self {
            trades,
            tracking,
            store,
            enricher: LotEnricher::default(),
            dust_epsilon: DEFAULT_DUST_EPSILON,
            scope_timeout: DEFAULT_SCOPE_TIMEOUT,
        }
    }

    /// Trades, tracking starts and output all backed by one repository.
    pub fn from_repository(repo: Arc<Repository>) -> Self {
        Self::new(repo.clone(), repo.clone(), repo)
    }

    pub fn with_enricher(mut self, enricher: LotEnricher) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_dust_epsilon(mut self, dust_epsilon: Decimal) -> Self {
        self.dust_epsilon = dust_epsilon;
        self
    }

    pub fn with_scope_timeout(mut self, scope_timeout: Duration) -> Self {
        self.scope_timeout = scope_timeout;
        self
    }

    /// Recompute closed lots and open positions for a wallet, or one of its tokens.
    ///
    /// Safe to re-invoke: identical trade history yields identical rows. A token
    /// whose write fails is rolled back and reported in `token_failures` while the
    /// remaining tokens proceed.
    ///
    /// # Errors
    /// `Source` when trades or the tracking start cannot be read, `ScopeTimeout`
    /// when the whole call exceeds the scope timeout.
    pub async fn recompute_positions(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
    ) -> Result<RecomputeOutcome, RecomputeError> {
        match tokio::time::timeout(self.scope_timeout, self.run(wallet, token)).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.scope_timeout.as_millis() as u64;
                warn!(
                    wallet = %wallet,
                    token = ?token.map(|t| t.as_str()),
                    timeout_ms,
                    "Recompute scope timed out"
                );
                Err(RecomputeError::ScopeTimeout {
                    wallet: wallet.clone(),
                    token: token.cloned(),
                    timeout_ms,
                })
            }
        }
    }

    /// Every token with trades or persisted output for the wallet.
    ///
    /// # Errors
    /// `Source` when the trade source cannot list tokens.
    pub async fn scope_tokens(&self, wallet: &WalletId) -> Result<Vec<TokenId>, RecomputeError> {
        let mut tokens: BTreeSet<TokenId> = self
            .trades
            .list_tokens(wallet)
            .await
            .map_err(|source| RecomputeError::Source {
                wallet: wallet.clone(),
                source,
            })?
            .into_iter()
            .collect();

        match self.store.persisted_tokens(wallet).await {
            Ok(persisted) => tokens.extend(persisted),
            Err(e) => warn!(wallet = %wallet, error = %e, "Could not list persisted tokens"),
        }

        Ok(tokens.into_iter().collect())
    }

    async fn run(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
    ) -> Result<RecomputeOutcome, RecomputeError> {
        let source_error = |source| RecomputeError::Source {
            wallet: wallet.clone(),
            source,
        };

        let batch = self.trades.list_trades(wallet, token).await.map_err(source_error)?;
        let tracking_start = self
            .tracking
            .get_tracking_start(wallet)
            .await
            .map_err(source_error)?;

        let config = MatchConfig {
            dust_epsilon: self.dust_epsilon,
            tracking_start,
        };
        let matched = match_wallet_trades(wallet, &batch.trades, token, &config);

        let mut outcome = RecomputeOutcome {
            diagnostics: batch.rejected,
            ..RecomputeOutcome::default()
        };

        for (token_id, output) in matched.tokens {
            outcome.diagnostics.extend(output.diagnostics);

            let (lots, report) = self.enricher.enrich(output.closed_lots).await;
            outcome.enrichment.lookup_timeouts += report.lookup_timeouts;
            outcome.enrichment.lookup_failures += report.lookup_failures;

            match self
                .store
                .replace_token_scope(wallet, &token_id, &lots, output.open_position.as_ref())
                .await
            {
                Ok(()) => {
                    outcome.closed_lots.extend(lots);
                    outcome.open_positions.extend(output.open_position);
                }
                Err(source) => self.record_failure(&mut outcome, wallet, token_id, source),
            }
        }

        for stale in self.stale_tokens(wallet, token, &outcome).await {
            match self.store.replace_token_scope(wallet, &stale, &[], None).await {
                Ok(()) => outcome.stale_scopes_cleared += 1,
                Err(source) => self.record_failure(&mut outcome, wallet, stale, source),
            }
        }

        info!(
            wallet = %wallet,
            token = ?token.map(|t| t.as_str()),
            closed_lots = outcome.closed_lots.len(),
            open_positions = outcome.open_positions.len(),
            diagnostics = outcome.diagnostics.len(),
            token_failures = outcome.token_failures.len(),
            stale_cleared = outcome.stale_scopes_cleared,
            "Recompute finished"
        );
        Ok(outcome)
    }

    /// Persisted scopes that this run produced nothing for.
    async fn stale_tokens(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
        outcome: &RecomputeOutcome,
    ) -> Vec<TokenId> {
        let touched: BTreeSet<&TokenId> = outcome
            .closed_lots
            .iter()
            .map(|l| &l.token_id)
            .chain(outcome.open_positions.iter().map(|p| &p.token_id))
            .chain(outcome.token_failures.iter().map(|f| &f.token_id))
            .collect();

        let persisted = match self.store.persisted_tokens(wallet).await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(wallet = %wallet, error = %e, "Skipping stale scope cleanup");
                return Vec::new();
            }
        };

        persisted
            .into_iter()
            .filter(|t| token.map_or(true, |only| only == t))
            .filter(|t| !touched.contains(t))
            .collect()
    }

    fn record_failure(
        &self,
        outcome: &mut RecomputeOutcome,
        wallet: &WalletId,
        token_id: TokenId,
        source: sqlx::Error,
    ) {
        warn!(
            wallet = %wallet,
            token = %token_id,
            error = %source,
            "Token scope rolled back"
        );
        outcome.token_failures.push(TokenFailure {
            error: RecomputeError::PersistenceConflict {
                wallet: wallet.clone(),
                token: token_id.clone(),
                source,
            },
            token_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{DataSourceError, MockDataSource};
    use crate::db::LotScope;
    use crate::domain::{Side, TimeMs, Trade};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store; writes for tokens in `failing` return an error.
    #[derive(Debug, Default)]
    struct MemoryStore {
        lots: Mutex<HashMap<TokenId, Vec<ClosedLot>>>,
        positions: Mutex<HashMap<TokenId, OpenPosition>>,
        failing: Vec<TokenId>,
    }

    #[async_trait]
    impl PositionStore for MemoryStore {
        async fn replace_closed_lots(&self, _scope: &LotScope, _lots: &[ClosedLot]) -> Result<(), sqlx::Error> {
            unimplemented!("not used by the recomputer")
        }

        async fn replace_open_positions(
            &self,
            _wallet: &WalletId,
            _token: Option<&TokenId>,
            _positions: &[OpenPosition],
        ) -> Result<(), sqlx::Error> {
            unimplemented!("not used by the recomputer")
        }

        async fn replace_token_scope(
            &self,
            _wallet: &WalletId,
            token: &TokenId,
            lots: &[ClosedLot],
            position: Option<&OpenPosition>,
        ) -> Result<(), sqlx::Error> {
            if self.failing.contains(token) {
                return Err(sqlx::Error::PoolTimedOut);
            }
            let mut stored_lots = self.lots.lock().unwrap();
            let mut stored_positions = self.positions.lock().unwrap();
            if lots.is_empty() {
                stored_lots.remove(token);
            } else {
                stored_lots.insert(token.clone(), lots.to_vec());
            }
            match position {
                Some(p) => stored_positions.insert(token.clone(), p.clone()),
                None => stored_positions.remove(token),
            };
            Ok(())
        }

        async fn persisted_tokens(&self, _wallet: &WalletId) -> Result<Vec<TokenId>, sqlx::Error> {
            let mut tokens: BTreeSet<TokenId> = self.lots.lock().unwrap().keys().cloned().collect();
            tokens.extend(self.positions.lock().unwrap().keys().cloned());
            Ok(tokens.into_iter().collect())
        }
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn trade(token: &str, side: Side, qty: &str, px: &str, time_ms: i64) -> Trade {
        Trade::new(
            TimeMs::new(time_ms),
            WalletId::new("W"),
            TokenId::new(token),
            side,
            d(qty),
            d(px),
            time_ms,
            None,
        )
    }

    fn recomputer(source: MockDataSource, store: Arc<MemoryStore>) -> Recomputer {
        let source = Arc::new(source);
        Recomputer::new(source.clone(), source, store)
    }

    #[tokio::test]
    async fn test_failed_token_does_not_block_others() {
        let source = MockDataSource::new().with_trades(vec![
            trade("AAA", Side::Buy, "10", "1", 0),
            trade("AAA", Side::Sell, "4", "2", 1),
            trade("BBB", Side::Buy, "5", "1", 0),
        ]);
        let store = Arc::new(MemoryStore {
            failing: vec![TokenId::new("AAA")],
            ..MemoryStore::default()
        });

        let outcome = recomputer(source, store.clone())
            .recompute_positions(&WalletId::new("W"), None)
            .await
            .unwrap();

        assert!(!outcome.is_complete());
        assert_eq!(outcome.token_failures.len(), 1);
        assert_eq!(outcome.token_failures[0].token_id, TokenId::new("AAA"));
        assert!(matches!(
            outcome.token_failures[0].error,
            RecomputeError::PersistenceConflict { .. }
        ));
        assert!(outcome.closed_lots.is_empty());
        assert_eq!(outcome.open_positions.len(), 1);
        assert!(store.positions.lock().unwrap().contains_key(&TokenId::new("BBB")));
    }

    #[tokio::test]
    async fn test_source_error_fails_scope() {
        let source = MockDataSource::new().with_trade_error(DataSourceError::Other("down".to_string()));
        let result = recomputer(source, Arc::new(MemoryStore::default()))
            .recompute_positions(&WalletId::new("W"), None)
            .await;

        assert!(matches!(result, Err(RecomputeError::Source { .. })));
    }

    #[tokio::test]
    async fn test_scope_timeout_is_typed() {
        let source = Arc::new(
            MockDataSource::new()
                .with_trades(vec![trade("AAA", Side::Buy, "1", "1", 0), trade("AAA", Side::Sell, "1", "2", 1)])
                .with_lookup_latency(Duration::from_secs(5)),
        );
        let enricher = LotEnricher::new(Duration::from_secs(10)).with_market(source.clone());
        let recomputer = Recomputer::new(source.clone(), source, Arc::new(MemoryStore::default()))
            .with_enricher(enricher)
            .with_scope_timeout(Duration::from_millis(30));

        let err = recomputer
            .recompute_positions(&WalletId::new("W"), None)
            .await
            .unwrap_err();
        assert!(err.is_wallet_timeout());

        let err = recomputer
            .recompute_positions(&WalletId::new("W"), Some(&TokenId::new("AAA")))
            .await
            .unwrap_err();
        assert!(matches!(err, RecomputeError::ScopeTimeout { token: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_stale_scopes_cleared_on_wallet_run() {
        let store = Arc::new(MemoryStore::default());
        store.positions.lock().unwrap().insert(
            TokenId::new("GONE"),
            OpenPosition {
                wallet_id: WalletId::new("W"),
                token_id: TokenId::new("GONE"),
                remaining_quantity: d("1"),
                average_cost: d("1"),
                opened_at: TimeMs::new(0),
            },
        );
        let source = MockDataSource::new().with_trade(trade("AAA", Side::Buy, "1", "1", 0));

        let recomputer = recomputer(source, store.clone());
        let scoped = recomputer
            .recompute_positions(&WalletId::new("W"), Some(&TokenId::new("AAA")))
            .await
            .unwrap();
        assert_eq!(scoped.stale_scopes_cleared, 0);
        assert!(store.positions.lock().unwrap().contains_key(&TokenId::new("GONE")));

        let full = recomputer
            .recompute_positions(&WalletId::new("W"), None)
            .await
            .unwrap();
        assert_eq!(full.stale_scopes_cleared, 1);
        assert!(!store.positions.lock().unwrap().contains_key(&TokenId::new("GONE")));

        let tokens = recomputer.scope_tokens(&WalletId::new("W")).await.unwrap();
        assert_eq!(tokens, vec![TokenId::new("AAA")]);
    }

    #[tokio::test]
    async fn test_rejected_trades_reported() {
        let source = MockDataSource::new().with_trades(vec![
            trade("AAA", Side::Buy, "-1", "1", 0),
            trade("AAA", Side::Buy, "2", "1", 1),
        ]);

        let outcome = recomputer(source, Arc::new(MemoryStore::default()))
            .recompute_positions(&WalletId::new("W"), None)
            .await
            .unwrap();

        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.open_positions[0].remaining_quantity, d("2"));
    }
}
