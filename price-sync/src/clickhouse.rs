//! # clickhouse — `daily_prices` over the ClickHouse HTTP interface
//!
//! ```sql
//! CREATE TABLE daily_prices (
//!     date     Date,
//!     asset_id String,
//!     symbol   String,
//!     currency String,
//!     close    Float64,
//!     source   LowCardinality(String)   -- fetched | last_known | manual
//! ) ENGINE = ReplacingMergeTree ORDER BY (asset_id, date);
//! ```
//!
//! Queries and inserts are both plain `POST {CLICKHOUSE_URL}/` with the
//! statement (and for inserts, the `JSONEachRow` data) in the body.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ClickHouseConfig;

// ─── Rows ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceOrigin {
    Fetched,
    LastKnown,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPrice {
    pub date:     NaiveDate,
    pub asset_id: String,
    pub symbol:   String,
    pub currency: String,
    pub close:    f64,
    pub source:   PriceOrigin,
}

#[derive(Debug, Deserialize)]
struct LastKnownRow {
    asset_id: String,
    close:    f64,
}

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClickHouseError {
    #[error("ClickHouse unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ClickHouse returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Unexpected ClickHouse row: {0}")]
    Decode(#[from] serde_json::Error),
}

// ─── Store seam ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Latest close per asset strictly before `before`.
    async fn last_known_prices(&self, before: NaiveDate) -> Result<HashMap<String, f64>, ClickHouseError>;

    async fn insert_daily_prices(&self, rows: &[DailyPrice]) -> Result<(), ClickHouseError>;
}

// ─── HTTP client ──────────────────────────────────────────────────────────────

pub struct ClickHouseClient {
    http:   reqwest::Client,
    config: ClickHouseConfig,
}

impl ClickHouseClient {
    pub fn new(http: reqwest::Client, config: ClickHouseConfig) -> Self {
        Self { http, config }
    }

    async fn execute(&self, body: String) -> Result<String, ClickHouseError> {
        let resp = self
            .http
            .post(format!("{}/", self.config.url))
            .header("X-ClickHouse-User", &self.config.user)
            .header("X-ClickHouse-Key", &self.config.password)
            .header("X-ClickHouse-Database", &self.config.database)
            .timeout(Duration::from_secs(30))
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ClickHouseError::Server { status: status.as_u16(), body: text.trim().to_string() });
        }
        Ok(text)
    }
}

fn last_known_query(before: NaiveDate) -> String {
    format!(
        "SELECT asset_id, argMax(close, date) AS close \
         FROM daily_prices \
         WHERE date < toDate('{before}') \
         GROUP BY asset_id \
         FORMAT JSONEachRow"
    )
}

fn parse_last_known(body: &str) -> Result<HashMap<String, f64>, ClickHouseError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let row: LastKnownRow = serde_json::from_str(line)?;
            Ok((row.asset_id, row.close))
        })
        .collect()
}

fn insert_body(rows: &[DailyPrice]) -> Result<String, ClickHouseError> {
    let mut body = String::from("INSERT INTO daily_prices FORMAT JSONEachRow\n");
    for row in rows {
        body.push_str(&serde_json::to_string(row)?);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl PriceStore for ClickHouseClient {
    async fn last_known_prices(&self, before: NaiveDate) -> Result<HashMap<String, f64>, ClickHouseError> {
        let body = self.execute(last_known_query(before)).await?;
        let prices = parse_last_known(&body)?;
        debug!(count = prices.len(), %before, "Loaded last known prices");
        Ok(prices)
    }

    async fn insert_daily_prices(&self, rows: &[DailyPrice]) -> Result<(), ClickHouseError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.execute(insert_body(rows)?).await?;
        Ok(())
    }
}
