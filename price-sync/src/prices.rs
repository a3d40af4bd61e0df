//! # prices — Daily close quotes
//!
//! ## Sources
//! 1. `HttpPriceSource` — when `PRICE_API_URL` is set:
//!    `GET {PRICE_API_URL}/price?symbol=VWCE&date=2024-03-01` → `{ "close": 112.4 }`
//!    (`404` = no quote for that day)
//! 2. `MockPriceSource` — dev / test only: random walk of ±2% around the
//!    asset's manual price or its last stored close

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::assets::Asset;

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Close for `asset` on `date`.  `Ok(None)` is a miss, not a failure.
    ///
    /// `last_close` is the latest close already stored for the asset.
    async fn close(
        &self,
        asset: &Asset,
        date: NaiveDate,
        last_close: Option<f64>,
    ) -> anyhow::Result<Option<f64>>;
}

// ─── HTTP ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(alias = "price")]
    close: Option<f64>,
}

pub struct HttpPriceSource {
    http:     reqwest::Client,
    base_url: String,
}

impl HttpPriceSource {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into() }
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn close(
        &self,
        asset: &Asset,
        date: NaiveDate,
        _last_close: Option<f64>,
    ) -> anyhow::Result<Option<f64>> {
        let day = date.to_string();
        let url = Url::parse_with_params(
            &format!("{}/price", self.base_url),
            &[("symbol", asset.symbol.as_str()), ("date", day.as_str())],
        )
        .context("Invalid PRICE_API_URL")?;

        let resp = self
            .http
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Price API unreachable")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: PriceResponse = resp
            .error_for_status()
            .context("Price API error")?
            .json()
            .await
            .context("Failed to parse price response")?;

        Ok(body.close)
    }
}

// ─── Mock ─────────────────────────────────────────────────────────────────────

pub struct MockPriceSource {
    max_jitter: f64,
}

impl Default for MockPriceSource {
    fn default() -> Self {
        Self { max_jitter: 0.02 }
    }
}

impl MockPriceSource {
    fn quote<R: Rng>(&self, asset: &Asset, last_close: Option<f64>, rng: &mut R) -> Option<f64> {
        let reference = asset.manual_price.or(last_close)?;
        let factor = 1.0 + rng.gen_range(-self.max_jitter..=self.max_jitter);
        Some((reference * factor * 10_000.0).round() / 10_000.0)
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn close(
        &self,
        asset: &Asset,
        _date: NaiveDate,
        last_close: Option<f64>,
    ) -> anyhow::Result<Option<f64>> {
        Ok(self.quote(asset, last_close, &mut rand::thread_rng()))
    }
}
