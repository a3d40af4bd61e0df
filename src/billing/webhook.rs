//! # billing::webhook — Stripe event processing
//!
//! Signature checking happens in the route; this module receives an already
//! verified event and keeps the subscription mirror and the user's plan in
//! step with it.
//!
//! ## Idempotency
//! 1. Every event id is written to the ledger before anything else.
//! 2. A duplicate id is fine — only an id already *marked processed* is
//!    skipped, so a delivery that failed half-way gets re-run on retry.
//! 3. The event is marked processed only after its handler succeeded.
//!
//! ## Handled types
//! | Event                                   | Effect                                 |
//! |-----------------------------------------|----------------------------------------|
//! | `customer.subscription.created/updated` | upsert mirror, set plan from status    |
//! | `customer.subscription.deleted`         | mirror → `canceled`, plan → free       |
//! | `invoice.payment_succeeded`             | mirror → `active`, extend premium      |
//! | `invoice.payment_failed`                | mirror → `past_due`                    |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::store::{BillingStore, EventRecord};
use crate::error::AppError;
use crate::models::{Plan, Subscription, SubscriptionStatus};

// ─── Event envelope ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id:         String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data:       EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Handled; carries the user whose plan may have changed.
    Processed { user_id: Option<Uuid> },
    /// Seen and finished before — nothing done this time.
    AlreadyProcessed,
    /// Not an event type this backend cares about.
    Ignored,
}

impl WebhookOutcome {
    pub fn affected_user(&self) -> Option<Uuid> {
        match self {
            WebhookOutcome::Processed { user_id } => *user_id,
            _ => None,
        }
    }
}

// ─── Payload helpers ──────────────────────────────────────────────────────────

fn bad_payload(what: &str) -> AppError {
    AppError::BadRequest(format!("webhook payload missing {what}"))
}

/// Stripe ids may arrive as a plain string or as an expanded object.
fn id_field(object: &Value, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(id) => Some(id.clone()),
        Value::Object(expanded) => expanded.get("id").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn first_item(object: &Value) -> Option<&Value> {
    object.pointer("/items/data/0")
}

/// Builds the mirror row from a subscription object.
///
/// Billing-period fields are read from the subscription itself and, for
/// newer API versions that moved them, from the first subscription item.
pub fn parse_subscription(object: &Value) -> Result<Subscription, AppError> {
    let id = id_field(object, "id").ok_or_else(|| bad_payload("subscription id"))?;
    let customer_id = id_field(object, "customer").ok_or_else(|| bad_payload("customer"))?;
    let item = first_item(object);

    let period_field = |key: &str| {
        timestamp(object.get(key)).or_else(|| timestamp(item.and_then(|i| i.get(key))))
    };

    Ok(Subscription {
        id,
        user_id: object
            .pointer("/metadata/user_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok()),
        customer_id,
        status: object
            .get("status")
            .and_then(Value::as_str)
            .map(SubscriptionStatus::parse)
            .unwrap_or(SubscriptionStatus::Unknown),
        price_id: item
            .and_then(|i| i.pointer("/price/id"))
            .and_then(Value::as_str)
            .map(String::from),
        current_period_start: period_field("current_period_start"),
        current_period_end:   period_field("current_period_end"),
        cancel_at_period_end: object
            .get("cancel_at_period_end")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        updated_at: Utc::now(),
    })
}

/// Subscription id on an invoice (top-level, or under `parent` on newer APIs).
fn invoice_subscription_id(invoice: &Value) -> Option<String> {
    id_field(invoice, "subscription").or_else(|| {
        invoice
            .pointer("/parent/subscription_details/subscription")
            .and_then(Value::as_str)
            .map(String::from)
    })
}

/// Latest `period.end` across the invoice's line items.
fn invoice_period_end(invoice: &Value) -> Option<DateTime<Utc>> {
    invoice
        .pointer("/lines/data")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|line| timestamp(line.pointer("/period/end")))
        .max()
}

// ─── Processor ────────────────────────────────────────────────────────────────

pub struct WebhookProcessor {
    store: Arc<dyn BillingStore>,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Runs one verified event.  `raw` is stored in the ledger as received.
    pub async fn handle(&self, event: &StripeEvent, raw: &Value) -> Result<WebhookOutcome, AppError> {
        let record = self.store.record_event(&event.id, &event.event_type, raw).await?;
        if record == EventRecord::Duplicate && self.store.is_event_processed(&event.id).await? {
            info!(event_id = %event.id, event_type = %event.event_type, "↩️  Duplicate webhook — already processed");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let object = &event.data.object;
        let outcome = match event.event_type.as_str() {
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.subscription_changed(object).await?
            }
            "customer.subscription.deleted" => self.subscription_deleted(object).await?,
            "invoice.payment_succeeded" => self.payment_succeeded(object).await?,
            "invoice.payment_failed" => self.payment_failed(object).await?,
            _ => WebhookOutcome::Ignored,
        };

        self.store.mark_event_processed(&event.id).await?;

        info!(
            event_id   = %event.id,
            event_type = %event.event_type,
            outcome    = ?outcome,
            "Stripe webhook handled"
        );
        Ok(outcome)
    }

    /// Metadata first, then the profile owning the customer, then whatever
    /// the mirror row already recorded.
    async fn resolve_user(&self, sub: &Subscription) -> Result<Option<Uuid>, AppError> {
        if let Some(user_id) = sub.user_id {
            return Ok(Some(user_id));
        }
        if let Some(user_id) = self.store.find_user_by_customer(&sub.customer_id).await? {
            return Ok(Some(user_id));
        }
        Ok(self
            .store
            .get_subscription(&sub.id)
            .await?
            .and_then(|existing| existing.user_id))
    }

    async fn apply_plan(&self, user_id: Uuid, sub: &Subscription) -> Result<(), AppError> {
        if sub.status.grants_premium() {
            self.store
                .set_plan(user_id, Plan::Premium, sub.current_period_end)
                .await
        } else {
            self.store.set_plan(user_id, Plan::Free, None).await
        }
    }

    async fn subscription_changed(&self, object: &Value) -> Result<WebhookOutcome, AppError> {
        let mut sub = parse_subscription(object)?;
        let user_id = self.resolve_user(&sub).await?;
        sub.user_id = user_id;

        self.store.upsert_subscription(&sub).await?;

        match user_id {
            Some(user_id) => {
                if self.store.find_user_by_customer(&sub.customer_id).await?.is_none() {
                    self.store.set_customer_id(user_id, &sub.customer_id).await?;
                }
                self.apply_plan(user_id, &sub).await?;
                info!(%user_id, subscription_id = %sub.id, status = sub.status.as_str(), "Subscription synced");
            }
            None => {
                warn!(subscription_id = %sub.id, customer_id = %sub.customer_id, "Subscription has no known user — mirror updated, plan untouched");
            }
        }

        Ok(WebhookOutcome::Processed { user_id })
    }

    async fn subscription_deleted(&self, object: &Value) -> Result<WebhookOutcome, AppError> {
        let mut sub = parse_subscription(object)?;
        sub.status = SubscriptionStatus::Canceled;
        let user_id = self.resolve_user(&sub).await?;
        sub.user_id = user_id;

        self.store.upsert_subscription(&sub).await?;
        if let Some(user_id) = user_id {
            self.store.set_plan(user_id, Plan::Free, None).await?;
            info!(%user_id, subscription_id = %sub.id, "Subscription canceled — plan reverted to free");
        }

        Ok(WebhookOutcome::Processed { user_id })
    }

    /// Stripe does not order deliveries; a canceled mirror row is final.
    async fn is_canceled(&self, subscription_id: &str) -> Result<bool, AppError> {
        Ok(self
            .store
            .get_subscription(subscription_id)
            .await?
            .is_some_and(|sub| sub.status == SubscriptionStatus::Canceled))
    }

    async fn invoice_user(&self, invoice: &Value, subscription_id: &str) -> Result<Option<Uuid>, AppError> {
        if let Some(customer_id) = id_field(invoice, "customer") {
            if let Some(user_id) = self.store.find_user_by_customer(&customer_id).await? {
                return Ok(Some(user_id));
            }
        }
        Ok(self
            .store
            .get_subscription(subscription_id)
            .await?
            .and_then(|sub| sub.user_id))
    }

    async fn payment_succeeded(&self, invoice: &Value) -> Result<WebhookOutcome, AppError> {
        let Some(subscription_id) = invoice_subscription_id(invoice) else {
            // One-off invoice, nothing to do with plans
            return Ok(WebhookOutcome::Ignored);
        };
        if self.is_canceled(&subscription_id).await? {
            info!(%subscription_id, "Late payment for a canceled subscription — plan untouched");
            return Ok(WebhookOutcome::Ignored);
        }

        self.store
            .set_subscription_status(&subscription_id, SubscriptionStatus::Active)
            .await?;

        let user_id = self.invoice_user(invoice, &subscription_id).await?;
        match (user_id, invoice_period_end(invoice)) {
            (Some(user_id), Some(period_end)) => {
                self.store.set_plan(user_id, Plan::Premium, Some(period_end)).await?;
                info!(%user_id, %subscription_id, %period_end, "💳 Payment succeeded — premium extended");
            }
            (Some(user_id), None) => {
                warn!(%user_id, %subscription_id, "Paid invoice without line periods — plan untouched");
            }
            (None, _) => {
                warn!(%subscription_id, "Paid invoice for unknown user");
            }
        }

        Ok(WebhookOutcome::Processed { user_id })
    }

    async fn payment_failed(&self, invoice: &Value) -> Result<WebhookOutcome, AppError> {
        let Some(subscription_id) = invoice_subscription_id(invoice) else {
            return Ok(WebhookOutcome::Ignored);
        };
        if self.is_canceled(&subscription_id).await? {
            return Ok(WebhookOutcome::Ignored);
        }

        let known = self
            .store
            .set_subscription_status(&subscription_id, SubscriptionStatus::PastDue)
            .await?;
        let user_id = self.invoice_user(invoice, &subscription_id).await?;

        warn!(
            %subscription_id,
            user_id = ?user_id,
            mirrored = known,
            "⚠️  Invoice payment failed — subscription past due"
        );

        Ok(WebhookOutcome::Processed { user_id })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::store::MemoryBillingStore;
    use serde_json::json;

    const PERIOD_END: i64 = 1_735_689_600; // 2025-01-01T00:00:00Z

    fn setup() -> (Arc<MemoryBillingStore>, WebhookProcessor) {
        let store = Arc::new(MemoryBillingStore::new());
        let processor = WebhookProcessor::new(store.clone());
        (store, processor)
    }

    fn event(id: &str, event_type: &str, object: Value) -> (StripeEvent, Value) {
        let raw = json!({ "id": id, "type": event_type, "data": { "object": object } });
        (serde_json::from_value(raw.clone()).unwrap(), raw)
    }

    fn subscription_object(user_id: Option<Uuid>, status: &str) -> Value {
        let metadata = match user_id {
            Some(id) => json!({ "user_id": id.to_string() }),
            None => json!({}),
        };
        json!({
            "id": "sub_1",
            "object": "subscription",
            "customer": "cus_1",
            "status": status,
            "metadata": metadata,
            "cancel_at_period_end": false,
            "items": { "data": [{
                "price": { "id": "price_premium" },
                "current_period_start": PERIOD_END - 2_592_000,
                "current_period_end": PERIOD_END
            }]}
        })
    }

    #[tokio::test]
    async fn test_subscription_created_grants_premium() {
        let (store, processor) = setup();
        let user = Uuid::new_v4();
        let (evt, raw) = event("evt_1", "customer.subscription.created", subscription_object(Some(user), "active"));

        let outcome = processor.handle(&evt, &raw).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed { user_id: Some(user) });

        let profile = store.get_profile(user).await.unwrap().unwrap();
        assert_eq!(profile.plan, Plan::Premium);
        assert_eq!(profile.premium_expires_at, DateTime::from_timestamp(PERIOD_END, 0));
        assert_eq!(profile.stripe_customer_id.as_deref(), Some("cus_1"));

        let mirror = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(mirror.status, SubscriptionStatus::Active);
        assert_eq!(mirror.price_id.as_deref(), Some("price_premium"));
        assert_eq!(mirror.user_id, Some(user));
    }

    #[tokio::test]
    async fn test_duplicate_event_is_not_reprocessed() {
        let (store, processor) = setup();
        let user = Uuid::new_v4();
        let (evt, raw) = event("evt_dup", "customer.subscription.updated", subscription_object(Some(user), "active"));

        processor.handle(&evt, &raw).await.unwrap();
        // Someone downgrades the user out of band; a replay must not undo it
        store.set_plan(user, Plan::Free, None).await.unwrap();

        let outcome = processor.handle(&evt, &raw).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);
        assert_eq!(store.get_profile(user).await.unwrap().unwrap().plan, Plan::Free);
    }

    #[tokio::test]
    async fn test_recorded_but_unprocessed_event_is_retried() {
        let (store, processor) = setup();
        let user = Uuid::new_v4();
        let (evt, raw) = event("evt_retry", "customer.subscription.updated", subscription_object(Some(user), "trialing"));

        // First delivery was stored but crashed before finishing
        store.record_event("evt_retry", "customer.subscription.updated", &raw).await.unwrap();

        let outcome = processor.handle(&evt, &raw).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed { user_id: Some(user) });
        assert!(store.is_event_processed("evt_retry").await.unwrap());
        assert_eq!(store.get_profile(user).await.unwrap().unwrap().plan, Plan::Premium);
    }

    #[tokio::test]
    async fn test_user_resolved_by_customer_when_metadata_missing() {
        let (store, processor) = setup();
        let user = Uuid::new_v4();
        store.set_customer_id(user, "cus_1").await.unwrap();

        let (evt, raw) = event("evt_2", "customer.subscription.updated", subscription_object(None, "unpaid"));
        let outcome = processor.handle(&evt, &raw).await.unwrap();

        assert_eq!(outcome.affected_user(), Some(user));
        let profile = store.get_profile(user).await.unwrap().unwrap();
        assert_eq!(profile.plan, Plan::Free);
    }

    #[tokio::test]
    async fn test_unknown_user_still_mirrors_subscription() {
        let (store, processor) = setup();
        let (evt, raw) = event("evt_3", "customer.subscription.created", subscription_object(None, "active"));

        let outcome = processor.handle(&evt, &raw).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed { user_id: None });
        assert!(store.get_subscription("sub_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deleted_reverts_to_free() {
        let (store, processor) = setup();
        let user = Uuid::new_v4();
        let (created, raw) = event("evt_c", "customer.subscription.created", subscription_object(Some(user), "active"));
        processor.handle(&created, &raw).await.unwrap();

        // Stripe sends the final object with status "canceled", but the
        // mirror must end up canceled whatever the status says.
        let (deleted, raw) = event("evt_d", "customer.subscription.deleted", subscription_object(Some(user), "active"));
        processor.handle(&deleted, &raw).await.unwrap();

        assert_eq!(store.get_profile(user).await.unwrap().unwrap().plan, Plan::Free);
        assert_eq!(
            store.get_subscription("sub_1").await.unwrap().unwrap().status,
            SubscriptionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_invoice_events_update_mirror_status() {
        let (store, processor) = setup();
        let user = Uuid::new_v4();
        let (created, raw) = event("evt_c", "customer.subscription.created", subscription_object(Some(user), "active"));
        processor.handle(&created, &raw).await.unwrap();

        let invoice = json!({
            "id": "in_1",
            "customer": "cus_1",
            "subscription": "sub_1",
            "lines": { "data": [
                { "period": { "start": PERIOD_END, "end": PERIOD_END + 2_678_400 } },
                { "period": { "start": PERIOD_END, "end": PERIOD_END + 86_400 } }
            ]}
        });

        let (failed, raw) = event("evt_f", "invoice.payment_failed", invoice.clone());
        processor.handle(&failed, &raw).await.unwrap();
        assert_eq!(
            store.get_subscription("sub_1").await.unwrap().unwrap().status,
            SubscriptionStatus::PastDue
        );

        let (paid, raw) = event("evt_p", "invoice.payment_succeeded", invoice);
        let outcome = processor.handle(&paid, &raw).await.unwrap();
        assert_eq!(outcome.affected_user(), Some(user));
        assert_eq!(
            store.get_subscription("sub_1").await.unwrap().unwrap().status,
            SubscriptionStatus::Active
        );
        let profile = store.get_profile(user).await.unwrap().unwrap();
        assert_eq!(profile.premium_expires_at, DateTime::from_timestamp(PERIOD_END + 2_678_400, 0));
    }

    #[tokio::test]
    async fn test_late_invoice_does_not_revive_canceled_subscription() {
        let (store, processor) = setup();
        let user = Uuid::new_v4();
        let (created, raw) = event("evt_c", "customer.subscription.created", subscription_object(Some(user), "active"));
        processor.handle(&created, &raw).await.unwrap();
        let (deleted, raw) = event("evt_d", "customer.subscription.deleted", subscription_object(Some(user), "canceled"));
        processor.handle(&deleted, &raw).await.unwrap();

        let invoice = json!({
            "id": "in_late",
            "customer": "cus_1",
            "subscription": "sub_1",
            "lines": { "data": [{ "period": { "start": PERIOD_END, "end": PERIOD_END + 2_678_400 } }] }
        });
        for (id, event_type) in [("evt_lf", "invoice.payment_failed"), ("evt_lp", "invoice.payment_succeeded")] {
            let (late, raw) = event(id, event_type, invoice.clone());
            assert_eq!(processor.handle(&late, &raw).await.unwrap(), WebhookOutcome::Ignored);
            assert!(store.is_event_processed(id).await.unwrap());
        }

        assert_eq!(
            store.get_subscription("sub_1").await.unwrap().unwrap().status,
            SubscriptionStatus::Canceled
        );
        let profile = store.get_profile(user).await.unwrap().unwrap();
        assert_eq!(profile.plan, Plan::Free);
        assert_eq!(profile.premium_expires_at, None);
    }

    #[tokio::test]
    async fn test_one_off_invoice_and_unknown_types_are_ignored() {
        let (store, processor) = setup();

        let (invoice, raw) = event("evt_i", "invoice.payment_succeeded", json!({ "id": "in_2", "customer": "cus_9" }));
        assert_eq!(processor.handle(&invoice, &raw).await.unwrap(), WebhookOutcome::Ignored);

        let (other, raw) = event("evt_o", "charge.refunded", json!({ "id": "ch_1" }));
        assert_eq!(processor.handle(&other, &raw).await.unwrap(), WebhookOutcome::Ignored);
        assert!(store.is_event_processed("evt_o").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_subscription_is_bad_request_and_unprocessed() {
        let (store, processor) = setup();
        let (evt, raw) = event("evt_bad", "customer.subscription.updated", json!({ "status": "active" }));

        let err = processor.handle(&evt, &raw).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(!store.is_event_processed("evt_bad").await.unwrap());
    }

    #[test]
    fn test_expanded_customer_object() {
        let mut object = subscription_object(None, "active");
        object["customer"] = json!({ "id": "cus_expanded", "object": "customer" });
        let sub = parse_subscription(&object).unwrap();
        assert_eq!(sub.customer_id, "cus_expanded");
        assert_eq!(sub.current_period_end, DateTime::from_timestamp(PERIOD_END, 0));
    }
}
