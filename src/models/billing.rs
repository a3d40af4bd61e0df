//! # models::billing
//!
//! Rows behind the free / premium split.
//!
//! `UserProfile`  = what the app reads to decide the plan (`user_profiles`)
//! `Subscription` = local mirror of a Stripe subscription (`pay.subscriptions`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Plan ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Premium,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free    => "free",
            Plan::Premium => "premium",
        }
    }

    /// Unknown strings read back from the database count as `Free`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "premium" => Plan::Premium,
            _         => Plan::Free,
        }
    }
}

// ─── UserProfile ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id:            Uuid,
    pub plan:               Plan,
    /// `None` on a premium plan means "no expiry".
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub stripe_customer_id: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            plan:               Plan::Free,
            premium_expires_at: None,
            stripe_customer_id: None,
        }
    }
}

// ─── SubscriptionStatus ───────────────────────────────────────────────────────

/// Stripe's subscription `status` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete        => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Trialing          => "trialing",
            SubscriptionStatus::Active            => "active",
            SubscriptionStatus::PastDue           => "past_due",
            SubscriptionStatus::Canceled          => "canceled",
            SubscriptionStatus::Unpaid            => "unpaid",
            SubscriptionStatus::Paused            => "paused",
            SubscriptionStatus::Unknown           => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "incomplete"         => SubscriptionStatus::Incomplete,
            "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
            "trialing"           => SubscriptionStatus::Trialing,
            "active"             => SubscriptionStatus::Active,
            "past_due"           => SubscriptionStatus::PastDue,
            "canceled"           => SubscriptionStatus::Canceled,
            "unpaid"             => SubscriptionStatus::Unpaid,
            "paused"             => SubscriptionStatus::Paused,
            _                    => SubscriptionStatus::Unknown,
        }
    }

    /// Statuses that keep the premium plan until the current period ends.
    /// `past_due` stays premium while Stripe retries the card.
    pub fn grants_premium(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
    }
}

// ─── Subscription ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Stripe subscription id (`sub_...`).
    pub id:                   String,
    pub user_id:              Option<Uuid>,
    pub customer_id:          String,
    pub status:               SubscriptionStatus,
    pub price_id:             Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end:   Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub updated_at:           DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_db_text() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::IncompleteExpired,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), status);
        }
        assert_eq!(SubscriptionStatus::parse("something_new"), SubscriptionStatus::Unknown);
    }

    #[test]
    fn test_unknown_status_deserializes() {
        let status: SubscriptionStatus = serde_json::from_str("\"brand_new_state\"").unwrap();
        assert_eq!(status, SubscriptionStatus::Unknown);
        assert!(!status.grants_premium());
    }

    #[test]
    fn test_premium_statuses() {
        assert!(SubscriptionStatus::Trialing.grants_premium());
        assert!(SubscriptionStatus::PastDue.grants_premium());
        assert!(!SubscriptionStatus::Canceled.grants_premium());
        assert!(!SubscriptionStatus::Unpaid.grants_premium());
    }
}
