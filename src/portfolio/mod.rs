//! # portfolio — Portfolio reads over the `api_*` RPCs
//!
//! Valuation, holdings-at-date and the daily / monthly rollups all run inside
//! Postgres.  This service picks the right function for the caller's plan,
//! issues independent calls concurrently, and merges rows into the payloads
//! the frontend renders.
//!
//! | Operation             | RPC(s)                                                  |
//! |-----------------------|---------------------------------------------------------|
//! | `value_series`        | `api_portfolio_daily` (premium) / `api_portfolio_monthly` |
//! | `holdings_at`         | `api_holdings_at`                                       |
//! | `holdings_by_account` | `api_holdings_accounts`                                 |
//! | `user_context`        | `api_user_context`                                      |
//! | `dashboard`           | `api_dashboard_essential` + `api_dashboard_timeline`    |
//! | `snapshot`            | `api_holdings_at` + `api_holdings_accounts`             |

pub mod change;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::models::portfolio::{AccountTotal, ClassWeight};
use crate::models::{
    AccountHolding, Dashboard, Granularity, Holding, PortfolioSnapshot, ValuePoint, ValueSeries,
};
use crate::plan::EffectivePlan;
use crate::supabase::SupabaseApi;

const UNCLASSIFIED: &str = "other";

#[derive(Clone)]
pub struct PortfolioService {
    supabase: Arc<dyn SupabaseApi>,
}

impl PortfolioService {
    pub fn new(supabase: Arc<dyn SupabaseApi>) -> Self {
        Self { supabase }
    }

    async fn rows<T: DeserializeOwned>(
        &self,
        token: &str,
        function: &str,
        params: Value,
    ) -> Result<Vec<T>, AppError> {
        let raw = self.supabase.rpc(token, function, params).await?;
        // PostgREST returns `null` for set-returning functions with no rows
        // when they are declared as `returns json`.
        if raw.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(raw)
            .map_err(|e| AppError::Upstream(format!("{function} returned unexpected rows: {e}")))
    }

    // ─── Series ───────────────────────────────────────────────────────────────

    /// Portfolio value between `from` and `to` inclusive, daily for premium
    /// plans and monthly otherwise.
    pub async fn value_series(
        &self,
        token: &str,
        plan: &EffectivePlan,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ValueSeries, AppError> {
        if from > to {
            return Err(AppError::BadRequest(format!(
                "`from` ({from}) must not be after `to` ({to})"
            )));
        }

        let (granularity, function) = if plan.is_premium {
            (Granularity::Daily, "api_portfolio_daily")
        } else {
            (Granularity::Monthly, "api_portfolio_monthly")
        };

        let mut points: Vec<ValuePoint> = self
            .rows(token, function, json!({ "p_from": from, "p_to": to }))
            .await?;
        points.sort_by_key(|p| p.date);

        Ok(ValueSeries { granularity, from, to, points })
    }

    // ─── Holdings ─────────────────────────────────────────────────────────────

    pub async fn holdings_at(&self, token: &str, date: NaiveDate) -> Result<Vec<Holding>, AppError> {
        self.rows(token, "api_holdings_at", json!({ "p_date": date })).await
    }

    pub async fn holdings_by_account(
        &self,
        token: &str,
        date: NaiveDate,
    ) -> Result<Vec<AccountHolding>, AppError> {
        self.rows(token, "api_holdings_accounts", json!({ "p_date": date })).await
    }

    pub async fn user_context(&self, token: &str) -> Result<Value, AppError> {
        self.supabase.rpc(token, "api_user_context", json!({})).await
    }

    // ─── Merged payloads ──────────────────────────────────────────────────────

    pub async fn dashboard(
        &self,
        token: &str,
        date: NaiveDate,
        plan: &EffectivePlan,
    ) -> Result<Dashboard, AppError> {
        let (essential, timeline) = tokio::try_join!(
            self.supabase
                .rpc(token, "api_dashboard_essential", json!({ "p_date": date })),
            self.supabase.rpc(
                token,
                "api_dashboard_timeline",
                json!({ "p_date": date, "p_is_premium": plan.is_premium }),
            ),
        )?;

        Ok(Dashboard {
            date,
            is_premium: plan.is_premium,
            essential,
            timeline,
        })
    }

    pub async fn snapshot(&self, token: &str, date: NaiveDate) -> Result<PortfolioSnapshot, AppError> {
        let (holdings, by_account) = tokio::try_join!(
            self.holdings_at(token, date),
            self.holdings_by_account(token, date),
        )?;

        Ok(summarize(date, holdings, &by_account))
    }
}

/// Folds holdings into per-account totals and per-class weights.
///
/// Output order is stable: accounts and classes by descending value, ties by id.
pub fn summarize(
    date: NaiveDate,
    holdings: Vec<Holding>,
    by_account: &[AccountHolding],
) -> PortfolioSnapshot {
    let total_value: f64 = holdings.iter().map(|h| h.value).sum();

    let mut accounts: BTreeMap<&str, AccountTotal> = BTreeMap::new();
    for row in by_account {
        let entry = accounts.entry(row.account_id.as_str()).or_insert_with(|| AccountTotal {
            account_id: row.account_id.clone(),
            label:      None,
            value:      0.0,
        });
        entry.value += row.value;
        if entry.label.is_none() {
            entry.label = row.account_label.clone();
        }
    }

    let mut class_values: BTreeMap<&str, f64> = BTreeMap::new();
    for holding in &holdings {
        let class = holding.asset_class.as_deref().unwrap_or(UNCLASSIFIED);
        *class_values.entry(class).or_insert(0.0) += holding.value;
    }

    let mut classes: Vec<ClassWeight> = class_values
        .into_iter()
        .map(|(class, value)| ClassWeight {
            asset_class: class.to_string(),
            value,
            weight: if total_value == 0.0 { 0.0 } else { value / total_value },
        })
        .collect();
    classes.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.asset_class.cmp(&b.asset_class)));

    let mut accounts: Vec<AccountTotal> = accounts.into_values().collect();
    accounts.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.account_id.cmp(&b.account_id)));

    PortfolioSnapshot {
        date,
        total_value,
        accounts,
        classes,
        holdings,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Plan;
    use crate::supabase::SupabaseUser;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Canned RPC responses keyed by function name; records every call.
    #[derive(Default)]
    pub(crate) struct FakeSupabase {
        pub users:     HashMap<String, SupabaseUser>,
        pub responses: HashMap<String, Value>,
        pub calls:     Mutex<Vec<(String, Value)>>,
    }

    impl FakeSupabase {
        pub fn with_user(mut self, token: &str, id: Uuid) -> Self {
            self.users.insert(token.to_string(), SupabaseUser { id, email: Some("user@example.com".into()) });
            self
        }

        pub fn respond(mut self, function: &str, value: Value) -> Self {
            self.responses.insert(function.to_string(), value);
            self
        }

        pub fn called(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SupabaseApi for FakeSupabase {
        async fn authenticate(&self, token: &str) -> Result<SupabaseUser, AppError> {
            self.users
                .get(token)
                .cloned()
                .ok_or_else(|| AppError::Unauthorized("invalid or expired session".into()))
        }

        async fn rpc(&self, _token: &str, function: &str, params: Value) -> Result<Value, AppError> {
            self.calls.lock().unwrap().push((function.to_string(), params));
            self.responses
                .get(function)
                .cloned()
                .ok_or_else(|| AppError::Upstream(format!("{function} not stubbed")))
        }
    }

    fn plan(is_premium: bool) -> EffectivePlan {
        EffectivePlan {
            plan: if is_premium { Plan::Premium } else { Plan::Free },
            is_premium,
            premium_expires_at: None,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn holding(asset_id: &str, class: Option<&str>, value: f64) -> Holding {
        Holding {
            asset_id:    asset_id.into(),
            symbol:      None,
            asset_class: class.map(String::from),
            units:       1.0,
            value,
            extra:       Default::default(),
        }
    }

    #[tokio::test]
    async fn test_free_plan_reads_monthly_series() {
        let fake = Arc::new(FakeSupabase::default().respond(
            "api_portfolio_monthly",
            json!([{ "date": "2024-02-01", "value": 20.0 }, { "date": "2024-01-01", "value": 10.0 }]),
        ));
        let service = PortfolioService::new(fake.clone());

        let series = service
            .value_series("t", &plan(false), day(2024, 1, 1), day(2024, 2, 29))
            .await
            .unwrap();

        assert_eq!(series.granularity, Granularity::Monthly);
        assert_eq!(series.points[0].date, day(2024, 1, 1));
        assert_eq!(
            fake.called(),
            vec![(
                "api_portfolio_monthly".to_string(),
                json!({ "p_from": "2024-01-01", "p_to": "2024-02-29" })
            )]
        );
    }

    #[tokio::test]
    async fn test_premium_plan_reads_daily_series() {
        let fake = Arc::new(FakeSupabase::default().respond("api_portfolio_daily", json!([])));
        let service = PortfolioService::new(fake.clone());

        let series = service
            .value_series("t", &plan(true), day(2024, 1, 1), day(2024, 1, 31))
            .await
            .unwrap();

        assert_eq!(series.granularity, Granularity::Daily);
        assert!(series.points.is_empty());
        assert_eq!(fake.called()[0].0, "api_portfolio_daily");
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected_before_any_rpc() {
        let fake = Arc::new(FakeSupabase::default());
        let service = PortfolioService::new(fake.clone());

        let err = service
            .value_series("t", &plan(true), day(2024, 2, 1), day(2024, 1, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(fake.called().is_empty());
    }

    #[tokio::test]
    async fn test_dashboard_passes_premium_flag() {
        let fake = Arc::new(
            FakeSupabase::default()
                .respond("api_dashboard_essential", json!({ "total": 5 }))
                .respond("api_dashboard_timeline", json!([1, 2])),
        );
        let service = PortfolioService::new(fake.clone());

        let dashboard = service.dashboard("t", day(2024, 5, 1), &plan(false)).await.unwrap();

        assert_eq!(dashboard.essential, json!({ "total": 5 }));
        assert!(!dashboard.is_premium);
        let timeline_call = fake
            .called()
            .into_iter()
            .find(|(f, _)| f == "api_dashboard_timeline")
            .unwrap();
        assert_eq!(timeline_call.1, json!({ "p_date": "2024-05-01", "p_is_premium": false }));
    }

    #[tokio::test]
    async fn test_null_rpc_result_is_empty() {
        let fake = Arc::new(FakeSupabase::default().respond("api_holdings_at", Value::Null));
        let service = PortfolioService::new(fake);

        let holdings = service.holdings_at("t", day(2024, 1, 1)).await.unwrap();
        assert!(holdings.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_rows_are_upstream_errors() {
        let fake = Arc::new(FakeSupabase::default().respond("api_holdings_at", json!({ "oops": true })));
        let service = PortfolioService::new(fake);

        let err = service.holdings_at("t", day(2024, 1, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }

    #[test]
    fn test_summarize_totals_and_weights() {
        let holdings = vec![
            holding("a", Some("stock"), 600.0),
            holding("b", Some("cash"), 300.0),
            holding("c", None, 100.0),
        ];
        let by_account = vec![
            AccountHolding { account_id: "acc-2".into(), account_label: Some("Broker".into()), asset_id: Some("a".into()), value: 600.0, extra: Default::default() },
            AccountHolding { account_id: "acc-1".into(), account_label: Some("Bank".into()), asset_id: Some("b".into()), value: 300.0, extra: Default::default() },
            AccountHolding { account_id: "acc-1".into(), account_label: None, asset_id: Some("c".into()), value: 100.0, extra: Default::default() },
        ];

        let snapshot = summarize(day(2024, 1, 1), holdings, &by_account);

        assert_eq!(snapshot.total_value, 1000.0);
        assert_eq!(snapshot.accounts[0].account_id, "acc-2");
        assert_eq!(snapshot.accounts[1].value, 400.0);
        assert_eq!(snapshot.accounts[1].label.as_deref(), Some("Bank"));
        assert_eq!(snapshot.classes[0].asset_class, "stock");
        assert!((snapshot.classes[0].weight - 0.6).abs() < 1e-12);
        assert_eq!(snapshot.classes[2].asset_class, UNCLASSIFIED);
    }

    #[test]
    fn test_summarize_zero_total_has_zero_weights() {
        let snapshot = summarize(day(2024, 1, 1), vec![holding("a", Some("cash"), 0.0)], &[]);
        assert_eq!(snapshot.total_value, 0.0);
        assert_eq!(snapshot.classes[0].weight, 0.0);
        assert!(snapshot.accounts.is_empty());
    }
}
