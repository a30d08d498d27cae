use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use onchain_wallet_analyzer::analyzer::Analyzer;
use onchain_wallet_analyzer::api::{self, AppState, ResultCache};
use onchain_wallet_analyzer::cli::{Cli, Commands};
use onchain_wallet_analyzer::config::Config;
use onchain_wallet_analyzer::eth::EventSource;
use onchain_wallet_analyzer::models::{Address, RangeKey};
use onchain_wallet_analyzer::storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { addr } => {
            let config = Config::from_env().context("failed to load configuration")?;
            let bind = addr.unwrap_or_else(|| config.http_bind_addr.clone());
            let analyzer = Analyzer::new(
                EventSource::from_config(&config)?,
                config.unrelated_events,
                config.counterparty_labels.clone(),
            );

            let cache = if config.cache_enabled() {
                let pool = storage::init_pool(&config.database_url).await?;
                Some(ResultCache::new(pool, config.cache_ttl_secs))
            } else {
                tracing::info!("result cache disabled");
                None
            };

            tracing::info!("serving analyses from {}", analyzer.source_name());
            let state = AppState {
                analyzer: Arc::new(analyzer),
                cache,
            };
            api::run_http_server(&bind, state, &config.allowed_origins).await?;
        }
        Commands::Analyze {
            address,
            range,
            events,
            pretty,
        } => {
            let config = Config::from_env().context("failed to load configuration")?;
            let address = Address::parse(&address)?;
            let range: RangeKey = range.parse()?;

            let source = match events {
                Some(path) => EventSource::File(path),
                None => EventSource::from_config(&config)?,
            };
            let analyzer = Analyzer::new(
                source,
                config.unrelated_events,
                config.counterparty_labels.clone(),
            );
            let now = chrono::Utc::now().timestamp();
            let response = analyzer.run(&address, range, now).await?;

            let out = if pretty {
                serde_json::to_string_pretty(&response)?
            } else {
                serde_json::to_string(&response)?
            };
            println!("{}", out);
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}
