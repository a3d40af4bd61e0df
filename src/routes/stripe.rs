//! # routes::stripe
//!
//! | Method | Path                                   | Auth      |
//! |--------|----------------------------------------|-----------|
//! | POST   | `/api/stripe/webhook`                  | signature |
//! | POST   | `/api/stripe/create-checkout-session`  | bearer    |

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::{
    auth::AuthUser,
    billing::{
        checkout::{start_checkout, CheckoutRequest, CheckoutResponse},
        signature,
        webhook::StripeEvent,
    },
    error::AppError,
    state::SharedState,
};

// ─── POST /api/stripe/webhook ─────────────────────────────────────────────────

/// Verifies, records and applies one Stripe event.
///
/// The body is taken as raw bytes: the signature covers the exact payload.
pub async fn stripe_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let header = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing stripe-signature header".into()))?;

    signature::verify(
        &body,
        header,
        &state.stripe_config.webhook_secret,
        state.stripe_config.webhook_tolerance,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!(error = %e, "❌ Stripe webhook rejected");
        AppError::BadRequest(format!("Webhook signature verification failed: {e}"))
    })?;

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook JSON: {e}")))?;
    let event: StripeEvent = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook event: {e}")))?;

    let outcome = state.webhooks.handle(&event, &raw).await.map_err(|e| {
        error!(event_id = %event.id, event_type = %event.event_type, error = %e, "Webhook processing failed");
        e
    })?;

    if let Some(user_id) = outcome.affected_user() {
        state.plans.invalidate(user_id).await;
    }

    Ok(Json(json!({ "received": true })))
}

// ─── POST /api/stripe/create-checkout-session ─────────────────────────────────

pub async fn create_checkout_session(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let response = start_checkout(
        state.store.as_ref(),
        state.stripe.as_ref(),
        &state.stripe_config,
        &user,
        request,
    )
    .await?;

    Ok(Json(response))
}
