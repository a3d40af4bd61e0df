//! # price-sync — Daily price job
//!
//! Runs once per invocation (cron / scheduled task):
//!
//! ```text
//! price-sync [YYYY-MM-DD] [--batch-size N] [--dry-run]
//!   1. Fetch assets            (Supabase global_assets)
//!   2. Fetch prices            (PRICE_API_URL, or mock)
//!   3. Fall back to last known (ClickHouse argMax)
//!   4. Batch insert            (ClickHouse daily_prices)
//! ```
//!
//! Exit code 0 on success, 1 on any failure.

use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod assets;
mod cli;
mod clickhouse;
mod config;
mod prices;
mod sync;

use assets::SupabaseAssets;
use cli::Cli;
use clickhouse::ClickHouseClient;
use config::Config;
use prices::{HttpPriceSource, MockPriceSource, PriceSource};
use sync::{SyncOptions, SyncReport};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("price_sync=debug,reqwest=warn")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(report) => {
            info!(
                assets     = report.assets,
                fetched    = report.fetched,
                last_known = report.last_known,
                manual     = report.manual,
                skipped    = report.skipped,
                inserted   = report.inserted,
                "✅ Price sync finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "❌ Price sync failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<SyncReport> {
    let config = Config::from_env().context("Failed to load config")?;
    let http = reqwest::Client::new();

    let options = SyncOptions {
        date:       cli.date.unwrap_or_else(|| Utc::now().date_naive()),
        batch_size: cli.batch_size,
        dry_run:    cli.dry_run,
    };

    let prices: Box<dyn PriceSource> = match &config.price_api_url {
        Some(url) => Box::new(HttpPriceSource::new(http.clone(), url.clone())),
        None => {
            warn!("PRICE_API_URL not set — using MOCK prices");
            Box::new(MockPriceSource::default())
        }
    };

    info!(
        date       = %options.date,
        batch_size = options.batch_size,
        dry_run    = options.dry_run,
        clickhouse = %config.clickhouse.url,
        "📈 Price sync starting"
    );

    let assets = SupabaseAssets::new(http.clone(), &config);
    let store = ClickHouseClient::new(http, config.clickhouse.clone());

    sync::run(&assets, prices.as_ref(), &store, &options).await
}
