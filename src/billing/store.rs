//! # billing::store — Billing persistence
//!
//! Everything the Stripe endpoints write goes through [`BillingStore`]:
//! profiles (plan + Stripe customer), the subscription mirror, and the
//! webhook idempotency ledger.
//!
//! - [`MemoryBillingStore`] — default build and tests; state is lost on restart
//! - `PgBillingStore` — `--features postgres`, see `billing::postgres`

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Plan, Subscription, SubscriptionStatus, UserProfile};

/// Outcome of inserting a webhook event into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRecord {
    New,
    /// The id was already in the ledger (Stripe retry or replay).
    Duplicate,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    // ── Profiles ──────────────────────────────────────────────────────────────
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError>;

    async fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<Uuid>, AppError>;

    /// Creates the profile row if it does not exist yet.
    async fn set_customer_id(&self, user_id: Uuid, customer_id: &str) -> Result<(), AppError>;

    /// Creates the profile row if it does not exist yet.
    async fn set_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        premium_expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError>;

    // ── Subscription mirror ───────────────────────────────────────────────────
    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), AppError>;

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, AppError>;

    /// Returns `false` when no mirror row exists for `id`.
    async fn set_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> Result<bool, AppError>;

    // ── Webhook ledger ────────────────────────────────────────────────────────
    async fn record_event(
        &self,
        id: &str,
        event_type: &str,
        payload: &Value,
    ) -> Result<EventRecord, AppError>;

    async fn is_event_processed(&self, id: &str) -> Result<bool, AppError>;

    async fn mark_event_processed(&self, id: &str) -> Result<(), AppError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    profiles:      HashMap<Uuid, UserProfile>,
    subscriptions: HashMap<String, Subscription>,
    /// event id → processed?
    events:        HashMap<String, bool>,
}

#[derive(Debug, Default)]
pub struct MemoryBillingStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError> {
        Ok(self.inner.read().await.profiles.get(&user_id).cloned())
    }

    async fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<Uuid>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .profiles
            .values()
            .find(|p| p.stripe_customer_id.as_deref() == Some(customer_id))
            .map(|p| p.user_id))
    }

    async fn set_customer_id(&self, user_id: Uuid, customer_id: &str) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner
            .profiles
            .entry(user_id)
            .or_insert_with(|| UserProfile::new(user_id))
            .stripe_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn set_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        premium_expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let profile = inner
            .profiles
            .entry(user_id)
            .or_insert_with(|| UserProfile::new(user_id));
        profile.plan = plan;
        profile.premium_expires_at = premium_expires_at;
        Ok(())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, AppError> {
        Ok(self.inner.read().await.subscriptions.get(id).cloned())
    }

    async fn set_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        match inner.subscriptions.get_mut(id) {
            Some(sub) => {
                sub.status = status;
                sub.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_event(
        &self,
        id: &str,
        _event_type: &str,
        _payload: &Value,
    ) -> Result<EventRecord, AppError> {
        let mut inner = self.inner.write().await;
        if inner.events.contains_key(id) {
            return Ok(EventRecord::Duplicate);
        }
        inner.events.insert(id.to_string(), false);
        Ok(EventRecord::New)
    }

    async fn is_event_processed(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.inner.read().await.events.get(id).copied().unwrap_or(false))
    }

    async fn mark_event_processed(&self, id: &str) -> Result<(), AppError> {
        self.inner.write().await.events.insert(id.to_string(), true);
        Ok(())
    }
}
