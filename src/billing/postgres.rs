//! # billing::postgres — PostgreSQL-backed [`BillingStore`]
//!
//! ## Setup
//! 1. Point `DATABASE_URL` at the Supabase Postgres (service connection)
//! 2. `cargo run --features postgres`
//!
//! `migrations/001_billing.sql` is embedded and applied on startup.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, Executor, PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::billing::store::{BillingStore, EventRecord};
use crate::error::AppError;
use crate::models::{Plan, Subscription, SubscriptionStatus, UserProfile};

// ─── Pool Init ────────────────────────────────────────────────────────────────

/// Connects and applies the embedded migration.
pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    // Plain &str goes over the simple query protocol, which allows the
    // multi-statement migration file.
    pool.execute(include_str!("../../migrations/001_billing.sql"))
        .await
        .context("Failed to run migration 001_billing.sql")?;

    info!("✅ PostgreSQL connected and migrations applied");
    Ok(pool)
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn subscription_from_row(row: &sqlx::postgres::PgRow) -> Result<Subscription, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Subscription {
        id:                   row.try_get("id")?,
        user_id:              row.try_get("user_id")?,
        customer_id:          row.try_get("customer_id")?,
        status:               SubscriptionStatus::parse(&status),
        price_id:             row.try_get("price_id")?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end:   row.try_get("current_period_end")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        updated_at:           row.try_get("updated_at")?,
    })
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, plan, premium_expires_at, stripe_customer_id
            FROM user_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let plan: String = row.try_get("plan")?;

        Ok(Some(UserProfile {
            user_id:            row.try_get("user_id")?,
            plan:               Plan::parse(&plan),
            premium_expires_at: row.try_get("premium_expires_at")?,
            stripe_customer_id: row.try_get("stripe_customer_id")?,
        }))
    }

    async fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<Uuid>, AppError> {
        let user_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM user_profiles WHERE stripe_customer_id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id)
    }

    async fn set_customer_id(&self, user_id: Uuid, customer_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, stripe_customer_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET
              stripe_customer_id = EXCLUDED.stripe_customer_id
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        premium_expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, plan, premium_expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
              plan               = EXCLUDED.plan,
              premium_expires_at = EXCLUDED.premium_expires_at
            "#,
        )
        .bind(user_id)
        .bind(plan.as_str())
        .bind(premium_expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_subscription(&self, sub: &Subscription) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO pay.subscriptions
              (id, user_id, customer_id, status, price_id, current_period_start,
               current_period_end, cancel_at_period_end, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
              user_id              = COALESCE(EXCLUDED.user_id, pay.subscriptions.user_id),
              customer_id          = EXCLUDED.customer_id,
              status               = EXCLUDED.status,
              price_id             = EXCLUDED.price_id,
              current_period_start = EXCLUDED.current_period_start,
              current_period_end   = EXCLUDED.current_period_end,
              cancel_at_period_end = EXCLUDED.cancel_at_period_end,
              updated_at           = EXCLUDED.updated_at
            "#,
        )
        .bind(&sub.id)
        .bind(sub.user_id)
        .bind(&sub.customer_id)
        .bind(sub.status.as_str())
        .bind(&sub.price_id)
        .bind(sub.current_period_start)
        .bind(sub.current_period_end)
        .bind(sub.cancel_at_period_end)
        .bind(sub.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, customer_id, status, price_id, current_period_start,
                   current_period_end, cancel_at_period_end, updated_at
            FROM pay.subscriptions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(subscription_from_row).transpose()?)
    }

    async fn set_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE pay.subscriptions SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_event(
        &self,
        id: &str,
        event_type: &str,
        payload: &Value,
    ) -> Result<EventRecord, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO pay.stripe_events (id, type, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(event_type)
        .bind(sqlx::types::Json(payload))
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            EventRecord::Duplicate
        } else {
            EventRecord::New
        })
    }

    async fn is_event_processed(&self, id: &str) -> Result<bool, AppError> {
        let processed = sqlx::query_scalar::<_, bool>(
            "SELECT processed_at IS NOT NULL FROM pay.stripe_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(processed.unwrap_or(false))
    }

    async fn mark_event_processed(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE pay.stripe_events SET processed_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
