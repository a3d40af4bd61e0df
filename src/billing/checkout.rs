//! # billing::checkout — Subscription checkout sessions
//!
//! Request / response use the frontend's camelCase field names:
//!
//! ```json
//! → { "priceId": "price_...", "userId": "<uuid>", "successUrl": "...", "cancelUrl": "..." }
//! ← { "sessionId": "cs_...", "url": "https://checkout.stripe.com/..." }
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::billing::store::BillingStore;
use crate::billing::stripe::{CheckoutParams, StripeApi};
use crate::config::StripeConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub price_id:    String,
    #[serde(default)]
    pub user_id:     String,
    #[serde(default)]
    pub success_url: String,
    #[serde(default)]
    pub cancel_url:  String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url:        Option<String>,
}

impl CheckoutRequest {
    /// Checks the body and returns the user id it names.
    fn validate(&self, config: &StripeConfig) -> Result<Uuid, AppError> {
        let missing: Vec<&str> = [
            ("priceId", &self.price_id),
            ("userId", &self.user_id),
            ("successUrl", &self.success_url),
            ("cancelUrl", &self.cancel_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        if !config.is_price_allowed(&self.price_id) {
            return Err(AppError::BadRequest(format!("Unknown price: {}", self.price_id)));
        }

        Uuid::parse_str(self.user_id.trim())
            .map_err(|_| AppError::BadRequest("userId must be a UUID".into()))
    }
}

/// Validates the request, makes sure the user has a Stripe customer, and
/// opens a subscription checkout session for it.
pub async fn start_checkout(
    store: &dyn BillingStore,
    stripe: &dyn StripeApi,
    config: &StripeConfig,
    caller: &AuthUser,
    request: CheckoutRequest,
) -> Result<CheckoutResponse, AppError> {
    let user_id = request.validate(config)?;
    if user_id != caller.id {
        return Err(AppError::Forbidden("userId does not match the signed-in user".into()));
    }

    let existing = store
        .get_profile(user_id)
        .await?
        .and_then(|profile| profile.stripe_customer_id);

    let customer_id = match existing {
        Some(customer_id) => customer_id,
        None => {
            let customer_id = stripe.create_customer(user_id, caller.email.as_deref()).await?;
            store.set_customer_id(user_id, &customer_id).await?;
            customer_id
        }
    };

    let session = stripe
        .create_checkout_session(&CheckoutParams {
            customer_id,
            price_id:    request.price_id,
            user_id,
            success_url: request.success_url,
            cancel_url:  request.cancel_url,
        })
        .await?;

    info!(%user_id, session_id = %session.id, "🛒 Checkout started");

    Ok(CheckoutResponse {
        session_id: session.id,
        url:        session.url,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
