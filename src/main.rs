use lotledger::engine::LotEnricher;
use lotledger::orchestration::{BatchConfig, BatchRunner};
use lotledger::{config::Config, db::init_db, CachedMarketData, HttpMarketDataSource, Recomputer, Repository};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if config.wallets.is_empty() {
        eprintln!("No wallets configured; set WALLETS or WALLETS_FILE");
        std::process::exit(1);
    }

    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };
    let repo = Arc::new(Repository::new(pool));

    let mut enricher = LotEnricher::new(config.lookup_timeout);
    if let Some(url) = &config.market_data_api_url {
        let market = Arc::new(CachedMarketData::new(
            HttpMarketDataSource::new(url.clone()),
            config.lookup_cache_ttl,
            config.lookup_cache_capacity,
        ));
        enricher = enricher.with_market(market.clone()).with_prices(market);
        tracing::info!(url = %url, "Market data lookups enabled");
    } else {
        tracing::info!("Market data lookups disabled");
    }

    let recomputer = Recomputer::from_repository(repo)
        .with_enricher(enricher)
        .with_dust_epsilon(config.dust_epsilon)
        .with_scope_timeout(config.scope_timeout);

    let runner = BatchRunner::new(
        Arc::new(recomputer),
        BatchConfig {
            concurrency: config.batch_concurrency,
            inter_wave_delay: config.inter_wallet_delay,
        },
    );

    let summary = runner.run(&config.wallets).await;
    for report in &summary.wallets {
        match &report.error {
            Some(err) => tracing::error!(wallet = %report.wallet_id, error = %err, "Wallet failed"),
            None => tracing::info!(
                wallet = %report.wallet_id,
                closed_lots = report.closed_lots,
                open_positions = report.open_positions,
                diagnostics = report.diagnostics,
                lookups_degraded = report.lookups_degraded,
                token_failures = report.token_failures,
                retried_per_token = report.retried_per_token,
                "Wallet recomputed"
            ),
        }
    }

    if !summary.is_success() {
        std::process::exit(1);
    }
}
