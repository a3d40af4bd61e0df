//! # routes::portfolio
//!
//! Authenticated portfolio reads.  Dates are `YYYY-MM-DD`.
//!
//! | Method | Path                              | Query          |
//! |--------|-----------------------------------|----------------|
//! | GET    | `/api/portfolio/series`           | `from`, `to`   |
//! | GET    | `/api/portfolio/change`           | `from`, `to`   |
//! | GET    | `/api/portfolio/holdings`         | `date`         |
//! | GET    | `/api/portfolio/holdings/accounts`| `date`         |
//! | GET    | `/api/portfolio/snapshot`         | `date`         |
//! | GET    | `/api/portfolio/dashboard`        | `date`         |
//!
//! `date` and `to` default to today (UTC); `from` defaults to one year
//! before `to`.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Extension, Json,
};
use chrono::{Months, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::AuthUser,
    error::AppError,
    models::{AccountHolding, Dashboard, Holding, PortfolioSnapshot, ValueSeries},
    portfolio::change::RangeChange,
    state::SharedState,
};

// ─── Query parameters ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to:   Option<NaiveDate>,
}

impl RangeQuery {
    fn resolve(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let to = self.to.unwrap_or(today);
        let from = self
            .from
            .unwrap_or_else(|| to.checked_sub_months(Months::new(12)).unwrap_or(NaiveDate::MIN));
        (from, to)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

/// GET /api/portfolio/series — daily for premium, monthly for free
pub async fn get_series(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    range: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Json<ValueSeries>, AppError> {
    let (from, to) = query(range)?.resolve(today());
    let plan = state.plans.get(user.id).await?;

    let series = state.portfolio.value_series(&user.token, &plan, from, to).await?;
    Ok(Json(series))
}

/// GET /api/portfolio/change — gain / loss across the requested range
pub async fn get_change(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    range: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let (from, to) = query(range)?.resolve(today());
    let plan = state.plans.get(user.id).await?;

    let series = state.portfolio.value_series(&user.token, &plan, from, to).await?;
    let change = RangeChange::over(&series.points);

    Ok(Json(json!({
        "granularity": series.granularity,
        "from":        series.from,
        "to":          series.to,
        "change":      change,
    })))
}

/// GET /api/portfolio/holdings
pub async fn get_holdings(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    date: Result<Query<DateQuery>, QueryRejection>,
) -> Result<Json<Vec<Holding>>, AppError> {
    let date = query(date)?.date.unwrap_or_else(today);
    Ok(Json(state.portfolio.holdings_at(&user.token, date).await?))
}

/// GET /api/portfolio/holdings/accounts
pub async fn get_account_holdings(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    date: Result<Query<DateQuery>, QueryRejection>,
) -> Result<Json<Vec<AccountHolding>>, AppError> {
    let date = query(date)?.date.unwrap_or_else(today);
    Ok(Json(state.portfolio.holdings_by_account(&user.token, date).await?))
}

/// GET /api/portfolio/snapshot — holdings with account / class totals
pub async fn get_snapshot(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    date: Result<Query<DateQuery>, QueryRejection>,
) -> Result<Json<PortfolioSnapshot>, AppError> {
    let date = query(date)?.date.unwrap_or_else(today);
    Ok(Json(state.portfolio.snapshot(&user.token, date).await?))
}

/// GET /api/portfolio/dashboard
pub async fn get_dashboard(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    date: Result<Query<DateQuery>, QueryRejection>,
) -> Result<Json<Dashboard>, AppError> {
    let date = query(date)?.date.unwrap_or_else(today);
    let plan = state.plans.get(user.id).await?;
    Ok(Json(state.portfolio.dashboard(&user.token, date, &plan).await?))
}
