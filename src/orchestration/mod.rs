pub mod batch;

pub use batch::{BatchConfig, BatchRunner, BatchSummary, WalletReport};
