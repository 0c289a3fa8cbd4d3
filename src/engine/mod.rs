//! Pure computation engines: FIFO lot matching and lot analytics.
//!
//! Everything here except the enricher's provider lookups is synchronous and
//! deterministic for a given input.

pub mod enricher;
pub mod exit_reason;
pub mod lot_matcher;
pub mod patterns;
pub mod price_path;

pub use enricher::{EnrichmentReport, LookupError, LotEnricher, DEFAULT_LOOKUP_TIMEOUT};
pub use exit_reason::{classify_exit, ExitInputs};
pub use lot_matcher::{
    match_wallet_trades, LotMatcher, MatchConfig, MatchOutput, WalletMatch, DEFAULT_DUST_EPSILON,
};
pub use patterns::{apply_dca_patterns, apply_reentry_patterns};
pub use price_path::{price_path_metrics, PricePathMetrics};
