//! # billing::stripe — Stripe REST client
//!
//! Only the two calls checkout needs.  Requests are form-encoded with
//! Stripe's bracket syntax (`line_items[0][price]=...`) and authenticated with
//! the secret key as a bearer token.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StripeConfig;
use crate::error::AppError;

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutParams {
    pub customer_id: String,
    pub price_id:    String,
    pub user_id:     Uuid,
    pub success_url: String,
    pub cancel_url:  String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSession {
    pub id:  String,
    /// Hosted checkout page.  Stripe omits it for embedded sessions.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind:    Option<String>,
}

// ─── Trait ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait StripeApi: Send + Sync {
    /// Creates a customer tagged with `metadata[user_id]`; returns `cus_...`.
    async fn create_customer(&self, user_id: Uuid, email: Option<&str>) -> Result<String, AppError>;

    async fn create_checkout_session(&self, params: &CheckoutParams) -> Result<CheckoutSession, AppError>;
}

// ─── HTTP client ──────────────────────────────────────────────────────────────

pub struct StripeClient {
    http:       reqwest::Client,
    api_base:   String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(http: reqwest::Client, config: &StripeConfig) -> Self {
        Self {
            http,
            api_base:   config.api_base.clone(),
            secret_key: config.secret_key.clone(),
        }
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, AppError> {
        let url = format!("{}/v1/{path}", self.api_base);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(form)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = stripe_error_message(&body);
            warn!(%status, path, error = %message, "Stripe request failed");
            return Err(AppError::Upstream(format!("Stripe: {message}")));
        }

        Ok(resp.json().await?)
    }
}

fn stripe_error_message(body: &str) -> String {
    match serde_json::from_str::<StripeErrorBody>(body) {
        Ok(StripeErrorBody { error }) => match (error.message, error.kind) {
            (Some(message), _) => message,
            (None, Some(kind)) => kind,
            (None, None)       => "unknown error".to_string(),
        },
        Err(_) => body.to_string(),
    }
}

/// Form body for `POST /v1/checkout/sessions`.
pub fn checkout_form(params: &CheckoutParams) -> Vec<(String, String)> {
    let user_id = params.user_id.to_string();
    [
        ("mode", "subscription"),
        ("customer", params.customer_id.as_str()),
        ("line_items[0][price]", params.price_id.as_str()),
        ("line_items[0][quantity]", "1"),
        ("success_url", params.success_url.as_str()),
        ("cancel_url", params.cancel_url.as_str()),
        ("client_reference_id", user_id.as_str()),
        ("metadata[user_id]", user_id.as_str()),
        ("subscription_data[metadata][user_id]", user_id.as_str()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[async_trait]
impl StripeApi for StripeClient {
    async fn create_customer(&self, user_id: Uuid, email: Option<&str>) -> Result<String, AppError> {
        let mut form = vec![("metadata[user_id]".to_string(), user_id.to_string())];
        if let Some(email) = email {
            form.push(("email".to_string(), email.to_string()));
        }

        let customer: CustomerResponse = self.post_form("customers", &form).await?;
        info!(%user_id, customer_id = %customer.id, "Stripe customer created");
        Ok(customer.id)
    }

    async fn create_checkout_session(&self, params: &CheckoutParams) -> Result<CheckoutSession, AppError> {
        let session: CheckoutSession = self
            .post_form("checkout/sessions", &checkout_form(params))
            .await?;
        info!(user_id = %params.user_id, session_id = %session.id, "Checkout session created");
        Ok(session)
    }
}
