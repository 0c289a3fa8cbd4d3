use crate::datasource::DataSourceError;
use crate::domain::{TokenId, WalletId};
use thiserror::Error;

/// Failure of one recompute scope.
///
/// Per-trade problems never surface here; they are reported as diagnostics and
/// the trade is skipped.
#[derive(Debug, Error)]
pub enum RecomputeError {
    #[error("trade source failed for wallet {wallet}: {source}")]
    Source {
        wallet: WalletId,
        source: DataSourceError,
    },
    #[error("persistence conflict for {wallet}/{token}: {source}")]
    PersistenceConflict {
        wallet: WalletId,
        token: TokenId,
        source: sqlx::Error,
    },
    #[error("recompute of wallet {wallet} timed out after {timeout_ms} ms")]
    ScopeTimeout {
        wallet: WalletId,
        token: Option<TokenId>,
        timeout_ms: u64,
    },
}

impl RecomputeError {
    /// Wallet whose scope failed.
    pub fn wallet(&self) -> &WalletId {
        match self {
            RecomputeError::Source { wallet, .. }
            | RecomputeError::PersistenceConflict { wallet, .. }
            | RecomputeError::ScopeTimeout { wallet, .. } => wallet,
        }
    }

    /// A timeout on a wallet-wide scope can be retried per token.
    pub fn is_wallet_timeout(&self) -> bool {
        matches!(self, RecomputeError::ScopeTimeout { token: None, .. })
    }
}
