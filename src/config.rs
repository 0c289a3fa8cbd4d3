use crate::domain::{Decimal, WalletId};
use crate::engine::DEFAULT_DUST_EPSILON;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Unset disables market snapshot and price history lookups.
    pub market_data_api_url: Option<String>,
    pub wallets: Vec<WalletId>,
    pub dust_epsilon: Decimal,
    pub lookup_timeout: Duration,
    pub lookup_cache_ttl: Duration,
    pub lookup_cache_capacity: u64,
    pub scope_timeout: Duration,
    pub batch_concurrency: usize,
    pub inter_wallet_delay: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let market_data_api_url = env_map
            .get("MARKET_DATA_API_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let dust_epsilon = match env_map.get("DUST_EPSILON") {
            Some(raw) => {
                let eps = Decimal::from_str(raw).map_err(|_| {
                    ConfigError::InvalidValue(
                        "DUST_EPSILON".to_string(),
                        "must be a decimal number".to_string(),
                    )
                })?;
                if eps.is_negative() {
                    return Err(ConfigError::InvalidValue(
                        "DUST_EPSILON".to_string(),
                        "must not be negative".to_string(),
                    ));
                }
                eps
            }
            None => DEFAULT_DUST_EPSILON,
        };

        let lookup_timeout = Duration::from_millis(parse_u64(&env_map, "LOOKUP_TIMEOUT_MS", 3_000)?);
        let lookup_cache_ttl = Duration::from_secs(parse_u64(&env_map, "LOOKUP_CACHE_TTL_SECS", 300)?);
        let lookup_cache_capacity = parse_u64(&env_map, "LOOKUP_CACHE_CAPACITY", 10_000)?;
        let scope_timeout = Duration::from_millis(parse_u64(&env_map, "SCOPE_TIMEOUT_MS", 120_000)?);
        let inter_wallet_delay = Duration::from_millis(parse_u64(&env_map, "INTER_WALLET_DELAY_MS", 250)?);

        let batch_concurrency = parse_u64(&env_map, "BATCH_CONCURRENCY", 4)? as usize;
        if batch_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "BATCH_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let wallets = parse_wallets_from_map(&env_map)?;

        Ok(Config {
            database_path,
            market_data_api_url,
            wallets,
            dust_epsilon,
            lookup_timeout,
            lookup_cache_ttl,
            lookup_cache_capacity,
            scope_timeout,
            batch_concurrency,
            inter_wallet_delay,
        })
    }
}

fn parse_u64(env_map: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a non-negative integer".to_string())
        }),
        None => Ok(default),
    }
}

fn parse_wallets_from_map(env_map: &HashMap<String, String>) -> Result<Vec<WalletId>, ConfigError> {
    let raw: Vec<String> = if let Some(wallets_str) = env_map.get("WALLETS") {
        wallets_str.split(',').map(|s| s.trim().to_string()).collect()
    } else if let Some(file_path) = env_map.get("WALLETS_FILE") {
        let content = std::fs::read_to_string(file_path).map_err(|_| {
            ConfigError::InvalidValue(
                "WALLETS_FILE".to_string(),
                "file not found or unreadable".to_string(),
            )
        })?;
        content.lines().map(|line| line.trim().to_string()).collect()
    } else {
        Vec::new()
    };

    let mut wallets: Vec<WalletId> = Vec::new();
    for wallet in raw.into_iter().filter(|s| !s.is_empty() && !s.starts_with('#')) {
        let wallet = WalletId::new(wallet);
        if !wallets.contains(&wallet) {
            wallets.push(wallet);
        }
    }
    Ok(wallets)
}
