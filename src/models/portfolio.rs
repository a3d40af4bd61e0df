//! # models::portfolio
//!
//! Shapes of the rows returned by the Postgres `api_*` RPC functions.
//!
//! Only the columns the server itself reads are typed.  Everything else lands
//! in `extra` and is serialized back out untouched, so new RPC columns reach
//! the frontend without a backend release.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Value series ─────────────────────────────────────────────────────────────

/// Resolution of a portfolio value series.  Free plans only get `Monthly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Monthly,
}

/// One row of `api_portfolio_daily` / `api_portfolio_monthly`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuePoint {
    #[serde(alias = "day", alias = "month")]
    pub date:  NaiveDate,
    #[serde(alias = "total_value", alias = "value_total")]
    pub value: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueSeries {
    pub granularity: Granularity,
    pub from:        NaiveDate,
    pub to:          NaiveDate,
    pub points:      Vec<ValuePoint>,
}

// ─── Holdings ─────────────────────────────────────────────────────────────────

/// One row of `api_holdings_at`: a position in one asset at a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub asset_id:    String,
    #[serde(default)]
    pub symbol:      Option<String>,
    #[serde(default, alias = "class")]
    pub asset_class: Option<String>,
    #[serde(default)]
    pub units:       f64,
    #[serde(default)]
    pub value:       f64,
    #[serde(flatten)]
    pub extra:       Map<String, Value>,
}

/// One row of `api_holdings_accounts`: a holding split out per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountHolding {
    pub account_id:    String,
    #[serde(default, alias = "label")]
    pub account_label: Option<String>,
    #[serde(default)]
    pub asset_id:      Option<String>,
    #[serde(default)]
    pub value:         f64,
    #[serde(flatten)]
    pub extra:         Map<String, Value>,
}

// ─── Merged payloads ──────────────────────────────────────────────────────────

/// `api_dashboard_essential` + `api_dashboard_timeline`, fetched together.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub date:       NaiveDate,
    pub is_premium: bool,
    pub essential:  Value,
    pub timeline:   Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountTotal {
    pub account_id: String,
    pub label:      Option<String>,
    pub value:      f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassWeight {
    pub asset_class: String,
    pub value:       f64,
    /// Share of the total in `[0, 1]`; 0 when the portfolio is worth 0.
    pub weight:      f64,
}

/// Holdings at a date plus totals computed server-side.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot {
    pub date:        NaiveDate,
    pub total_value: f64,
    pub accounts:    Vec<AccountTotal>,
    pub classes:     Vec<ClassWeight>,
    pub holdings:    Vec<Holding>,
}
