//! Position store writer interface.

use crate::domain::{ClosedLot, OpenPosition, TokenId, WalletId};
use async_trait::async_trait;
use std::fmt;

/// Rows of `closed_lots` affected by a replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotScope {
    pub wallet_id: WalletId,
    /// None covers every token of the wallet.
    pub token_id: Option<TokenId>,
    /// When set, only rows with `sequence_number >= from_sequence` are replaced.
    pub from_sequence: Option<i64>,
}

impl LotScope {
    pub fn wallet(wallet_id: WalletId) -> Self {
        Self {
            wallet_id,
            token_id: None,
            from_sequence: None,
        }
    }

    pub fn token(wallet_id: WalletId, token_id: TokenId) -> Self {
        Self {
            wallet_id,
            token_id: Some(token_id),
            from_sequence: None,
        }
    }

    pub fn from_sequence(mut self, sequence_number: i64) -> Self {
        self.from_sequence = Some(sequence_number);
        self
    }
}

impl fmt::Display for LotScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wallet_id)?;
        if let Some(token) = &self.token_id {
            write!(f, "/{}", token)?;
        }
        if let Some(seq) = self.from_sequence {
            write!(f, "@{}", seq)?;
        }
        Ok(())
    }
}

/// Delete-then-insert persistence of matcher output.
///
/// Every replace runs in one transaction: readers see either the old rows or the
/// new ones, never a mix.
#[async_trait]
pub trait PositionStore: Send + Sync + fmt::Debug {
    /// Replace the closed lots in `scope` with `lots`.
    async fn replace_closed_lots(&self, scope: &LotScope, lots: &[ClosedLot])
        -> Result<(), sqlx::Error>;

    /// Replace open positions of a wallet, or of one of its tokens. An empty slice
    /// only deletes.
    async fn replace_open_positions(
        &self,
        wallet: &WalletId,
        token: Option<&TokenId>,
        positions: &[OpenPosition],
    ) -> Result<(), sqlx::Error>;

    /// Replace both lots and the open position of one (wallet, token) atomically.
    async fn replace_token_scope(
        &self,
        wallet: &WalletId,
        token: &TokenId,
        lots: &[ClosedLot],
        position: Option<&OpenPosition>,
    ) -> Result<(), sqlx::Error>;

    /// Tokens that currently have closed lots or an open position for the wallet.
    async fn persisted_tokens(&self, wallet: &WalletId) -> Result<Vec<TokenId>, sqlx::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_display() {
        let scope = LotScope::token(WalletId::new("W"), TokenId::new("T")).from_sequence(4);
        assert_eq!(scope.to_string(), "W/T@4");
        assert_eq!(LotScope::wallet(WalletId::new("W")).to_string(), "W");
    }
}
