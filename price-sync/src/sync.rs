//! # sync — one daily price run
//!
//! ```text
//! assets ──▶ last known closes (< date) ──▶ quote each asset
//!        ──▶ row per asset: fetched │ last_known │ manual │ skipped
//!        ──▶ insert in batches of `batch_size`
//! ```
//!
//! A quote that errors or comes back empty for one asset never fails the run;
//! that asset just falls through to the next price it has.

use std::collections::HashMap;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::assets::{Asset, AssetSource};
use crate::clickhouse::{DailyPrice, PriceOrigin, PriceStore};
use crate::prices::PriceSource;

/// Quotes in flight at once.
const QUOTE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub date:       NaiveDate,
    pub batch_size: usize,
    /// Build rows but write nothing.
    pub dry_run:    bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub assets:     usize,
    pub fetched:    usize,
    pub last_known: usize,
    pub manual:     usize,
    pub skipped:    usize,
    pub inserted:   usize,
    pub batches:    usize,
}

/// Picks the close for one asset, in order of preference.
fn choose_price(
    fetched: Option<f64>,
    last_known: Option<f64>,
    manual: Option<f64>,
) -> Option<(f64, PriceOrigin)> {
    let usable = |p: &f64| p.is_finite() && *p > 0.0;

    fetched
        .filter(usable)
        .map(|p| (p, PriceOrigin::Fetched))
        .or_else(|| last_known.filter(usable).map(|p| (p, PriceOrigin::LastKnown)))
        .or_else(|| manual.filter(usable).map(|p| (p, PriceOrigin::Manual)))
}

async fn quote(source: &dyn PriceSource, asset: &Asset, date: NaiveDate, last_close: Option<f64>) -> Option<f64> {
    match source.close(asset, date, last_close).await {
        Ok(price) => price,
        Err(e) => {
            warn!(asset_id = %asset.id, symbol = %asset.symbol, error = %format!("{e:#}"), "Price fetch failed");
            None
        }
    }
}

pub async fn run(
    assets: &dyn AssetSource,
    prices: &dyn PriceSource,
    store: &dyn PriceStore,
    options: &SyncOptions,
) -> anyhow::Result<SyncReport> {
    if options.batch_size == 0 {
        bail!("batch size must be at least 1");
    }

    // ── 1. Assets ─────────────────────────────────────────────────────────────
    let assets = assets.assets().await.context("Failed to fetch assets")?;
    let mut report = SyncReport { assets: assets.len(), ..SyncReport::default() };

    if assets.is_empty() {
        info!(date = %options.date, "No assets to sync");
        return Ok(report);
    }

    // ── 2. Last known closes ──────────────────────────────────────────────────
    let last_known: HashMap<String, f64> = store
        .last_known_prices(options.date)
        .await
        .context("Failed to load last known prices")?;

    // ── 3. Quotes ─────────────────────────────────────────────────────────────
    let quotes: Vec<Option<f64>> = stream::iter(&assets)
        .map(|asset| quote(prices, asset, options.date, last_known.get(&asset.id).copied()))
        .buffered(QUOTE_CONCURRENCY)
        .collect()
        .await;

    // ── 4. Rows ───────────────────────────────────────────────────────────────
    let mut rows = Vec::with_capacity(assets.len());
    for (asset, fetched) in assets.iter().zip(quotes) {
        let Some((close, source)) =
            choose_price(fetched, last_known.get(&asset.id).copied(), asset.manual_price)
        else {
            debug!(asset_id = %asset.id, symbol = %asset.symbol, "No price available — skipped");
            report.skipped += 1;
            continue;
        };

        match source {
            PriceOrigin::Fetched   => report.fetched += 1,
            PriceOrigin::LastKnown => report.last_known += 1,
            PriceOrigin::Manual    => report.manual += 1,
        }

        rows.push(DailyPrice {
            date:     options.date,
            asset_id: asset.id.clone(),
            symbol:   asset.symbol.clone(),
            currency: asset.currency.clone().unwrap_or_default(),
            close,
            source,
        });
    }

    // ── 5. Insert ─────────────────────────────────────────────────────────────
    if options.dry_run {
        info!(rows = rows.len(), "Dry run — nothing written");
        return Ok(report);
    }

    for batch in rows.chunks(options.batch_size) {
        store
            .insert_daily_prices(batch)
            .await
            .with_context(|| format!("Failed to insert batch {} ({} rows)", report.batches + 1, batch.len()))?;
        report.batches += 1;
        report.inserted += batch.len();
        debug!(batch = report.batches, rows = batch.len(), "Batch inserted");
    }

    Ok(report)
}
