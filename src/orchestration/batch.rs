//! Multi-wallet batch recompute.
//!
//! Wallets run in waves of bounded size with a pause between waves. A wallet
//! whose full-scope run times out is retried one token at a time.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::domain::WalletId;
use crate::error::RecomputeError;
use crate::recompute::{RecomputeOutcome, Recomputer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Wallets recomputed concurrently in one wave.
    pub concurrency: usize,
    /// Pause between waves.
    pub inter_wave_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            inter_wave_delay: Duration::from_millis(250),
        }
    }
}

/// Per-wallet result of a batch.
#[derive(Debug)]
pub struct WalletReport {
    pub wallet_id: WalletId,
    pub closed_lots: usize,
    pub open_positions: usize,
    pub diagnostics: usize,
    pub lookups_degraded: usize,
    /// Token scopes that failed, including per-token retries.
    pub token_failures: usize,
    pub retried_per_token: bool,
    /// Set when the wallet as a whole could not be recomputed.
    pub error: Option<RecomputeError>,
}

impl WalletReport {
    fn empty(wallet_id: WalletId) -> Self {
        Self {
            wallet_id,
            closed_lots: 0,
            open_positions: 0,
            diagnostics: 0,
            lookups_degraded: 0,
            token_failures: 0,
            retried_per_token: false,
            error: None,
        }
    }

    fn failed(wallet_id: WalletId, error: RecomputeError) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(wallet_id)
        }
    }

    fn absorb(&mut self, outcome: &RecomputeOutcome) {
        self.closed_lots += outcome.closed_lots.len();
        self.open_positions += outcome.open_positions.len();
        self.diagnostics += outcome.diagnostics.len();
        self.lookups_degraded += outcome.enrichment.degraded();
        self.token_failures += outcome.token_failures.len();
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.token_failures == 0
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub wallets: Vec<WalletReport>,
}

impl BatchSummary {
    /// Wallets that could not be recomputed at all.
    pub fn failed_wallets(&self) -> usize {
        self.wallets.iter().filter(|w| w.error.is_some()).count()
    }

    pub fn token_failures(&self) -> usize {
        self.wallets.iter().map(|w| w.token_failures).sum()
    }

    pub fn is_success(&self) -> bool {
        self.wallets.iter().all(WalletReport::is_success)
    }
}

#[derive(Debug, Clone)]
pub struct BatchRunner {
    recomputer: Arc<Recomputer>,
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(recomputer: Arc<Recomputer>, config: BatchConfig) -> Self {
        Self { recomputer, config }
    }

    /// Recompute every wallet. One wallet's failure never stops the others.
    pub async fn run(&self, wallets: &[WalletId]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let wave_size = self.config.concurrency.max(1);

        for (index, wave) in wallets.chunks(wave_size).enumerate() {
            if index > 0 && !self.config.inter_wave_delay.is_zero() {
                tokio::time::sleep(self.config.inter_wave_delay).await;
            }

            let reports = join_all(wave.iter().map(|wallet| self.run_wallet(wallet))).await;
            summary.wallets.extend(reports);
        }

        info!(
            wallets = summary.wallets.len(),
            failed_wallets = summary.failed_wallets(),
            token_failures = summary.token_failures(),
            "Batch recompute finished"
        );
        summary
    }

    async fn run_wallet(&self, wallet: &WalletId) -> WalletReport {
        match self.recomputer.recompute_positions(wallet, None).await {
            Ok(outcome) => {
                let mut report = WalletReport::empty(wallet.clone());
                report.absorb(&outcome);
                report
            }
            Err(err) if err.is_wallet_timeout() => {
                warn!(wallet = %wallet, error = %err, "Retrying wallet one token at a time");
                self.run_per_token(wallet).await
            }
            Err(err) => {
                warn!(wallet = %wallet, error = %err, "Wallet recompute failed");
                WalletReport::failed(wallet.clone(), err)
            }
        }
    }

    async fn run_per_token(&self, wallet: &WalletId) -> WalletReport {
        let tokens = match self.recomputer.scope_tokens(wallet).await {
            Ok(tokens) => tokens,
            Err(err) => return WalletReport::failed(wallet.clone(), err),
        };

        let mut report = WalletReport::empty(wallet.clone());
        report.retried_per_token = true;

        for token in &tokens {
            match self.recomputer.recompute_positions(wallet, Some(token)).await {
                Ok(outcome) => report.absorb(&outcome),
                Err(err) => {
                    warn!(wallet = %wallet, token = %token, error = %err, "Token recompute failed");
                    report.token_failures += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{DataSourceError, MockDataSource};
    use crate::db::repo::test_support::setup_test_db;
    use crate::db::Repository;
    use crate::domain::{Decimal, Side, TimeMs, TokenId, Trade};

    fn trade(wallet: &str, token: &str, side: Side, qty: &str, time_ms: i64) -> Trade {
        Trade::new(
            TimeMs::new(time_ms),
            WalletId::new(wallet),
            TokenId::new(token),
            side,
            Decimal::from_str_canonical(qty).unwrap(),
            Decimal::from_str_canonical("1").unwrap(),
            time_ms,
            None,
        )
    }

    async fn repo_with(trades: &[Trade]) -> (Arc<Repository>, tempfile::TempDir) {
        let (repo, temp) = setup_test_db().await;
        repo.insert_trades_batch(trades).await.unwrap();
        (Arc::new(repo), temp)
    }

    #[tokio::test]
    async fn test_batch_runs_all_wallets_in_waves() {
        let (repo, _temp) = repo_with(&[
            trade("W1", "AAA", Side::Buy, "5", 0),
            trade("W2", "AAA", Side::Buy, "5", 0),
            trade("W2", "AAA", Side::Sell, "2", 1),
            trade("W3", "BBB", Side::Buy, "1", 0),
        ])
        .await;
        let runner = BatchRunner::new(
            Arc::new(Recomputer::from_repository(repo.clone())),
            BatchConfig {
                concurrency: 2,
                inter_wave_delay: Duration::from_millis(1),
            },
        );
        let wallets = vec![WalletId::new("W1"), WalletId::new("W2"), WalletId::new("W3")];

        let summary = runner.run(&wallets).await;

        assert!(summary.is_success());
        let order: Vec<&str> = summary.wallets.iter().map(|w| w.wallet_id.as_str()).collect();
        assert_eq!(order, vec!["W1", "W2", "W3"]);
        assert_eq!(summary.wallets[1].closed_lots, 1);
        assert_eq!(summary.wallets[1].open_positions, 1);
        assert_eq!(
            repo.query_open_positions(&WalletId::new("W3"), None).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_source_failure_is_isolated_per_wallet() {
        let source = Arc::new(MockDataSource::new().with_trade_error(DataSourceError::RateLimited));
        let (repo, _temp) = setup_test_db().await;
        let recomputer = Recomputer::new(source.clone(), source, Arc::new(repo));
        let runner = BatchRunner::new(Arc::new(recomputer), BatchConfig::default());

        let summary = runner.run(&[WalletId::new("W1"), WalletId::new("W2")]).await;

        assert_eq!(summary.failed_wallets(), 2);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_wallet_timeout_retries_per_token() {
        let source = Arc::new(
            MockDataSource::new()
                .with_trades(vec![
                    trade("W1", "AAA", Side::Buy, "1", 0),
                    trade("W1", "AAA", Side::Sell, "1", 1),
                ])
                .with_lookup_latency(Duration::from_secs(5)),
        );
        let (repo, _temp) = setup_test_db().await;
        let enricher = crate::engine::LotEnricher::new(Duration::from_secs(10)).with_market(source.clone());
        let recomputer = Recomputer::new(source.clone(), source, Arc::new(repo))
            .with_enricher(enricher)
            .with_scope_timeout(Duration::from_millis(20));
        let runner = BatchRunner::new(Arc::new(recomputer), BatchConfig::default());

        let summary = runner.run(&[WalletId::new("W1")]).await;
        let report = &summary.wallets[0];

        assert!(report.retried_per_token);
        assert!(report.error.is_none());
        // The narrowed scope times out as well and is counted per token.
        assert_eq!(report.token_failures, 1);
        assert_eq!(summary.failed_wallets(), 0);
        assert!(!summary.is_success());
    }
}
