//! Domain primitives: TimeMs, WalletId, TokenId, Side.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

const MS_PER_MINUTE: i64 = 60_000;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Whole minutes from `self` until `later` (floored toward negative infinity).
    ///
    /// Negative when `later` precedes `self`.
    pub fn minutes_until(&self, later: TimeMs) -> i64 {
        (later.0 - self.0).div_euclid(MS_PER_MINUTE)
    }

    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }

    /// Hour of day (0-23) in UTC.
    pub fn hour_of_day(&self) -> Option<u32> {
        self.to_utc().map(|dt| dt.hour())
    }

    /// Day of week in UTC, 0 = Sunday through 6 = Saturday.
    pub fn day_of_week(&self) -> Option<u32> {
        self.to_utc().map(|dt| dt.weekday().num_days_from_sunday())
    }
}

impl std::fmt::Display for TimeMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wallet address (base58 or hex string, kept verbatim).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(pub String);

impl WalletId {
    pub fn new(wallet: impl Into<String>) -> Self {
        WalletId(wallet.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WalletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token mint / identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(token: impl Into<String>) -> Self {
        TokenId(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade side.
///
/// `Add` and `Remove` are partial buy/sell variants. `Void` trades carry no
/// inventory effect and are never matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
    Add,
    Remove,
    Void,
}

impl Side {
    /// Buy or Add.
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Side::Buy | Side::Add)
    }

    /// Sell or Remove.
    pub fn is_disposal(&self) -> bool {
        matches!(self, Side::Sell | Side::Remove)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
            Side::Add => "add",
            Side::Remove => "remove",
            Side::Void => "void",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            "add" => Some(Side::Add),
            "remove" => Some(Side::Remove),
            "void" => Some(Side::Void),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
