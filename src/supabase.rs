//! # supabase — PostgREST / GoTrue client
//!
//! Every portfolio read is a Postgres function called through Supabase's RPC
//! endpoint **with the caller's own JWT**, so row-level security in the
//! database decides what each user can see.  The server never reads another
//! user's rows on the read path.
//!
//! ```text
//! POST {SUPABASE_URL}/rest/v1/rpc/{function}
//!   apikey:        <anon key>
//!   Authorization: Bearer <user jwt>
//!   body:          { "p_date": "2024-03-01", ... }
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;

// ─── Types ────────────────────────────────────────────────────────────────────

/// The authenticated caller, as reported by `GET /auth/v1/user`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SupabaseUser {
    pub id:    Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

// ─── Trait ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait SupabaseApi: Send + Sync {
    /// Resolves a bearer token to its user.  Rejected tokens → `Unauthorized`.
    async fn authenticate(&self, token: &str) -> Result<SupabaseUser, AppError>;

    /// Calls a Postgres function as the token's user and returns its JSON.
    async fn rpc(&self, token: &str, function: &str, params: Value) -> Result<Value, AppError>;
}

// ─── HTTP client ──────────────────────────────────────────────────────────────

pub struct SupabaseClient {
    http:     reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            anon_key: anon_key.into(),
        }
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, AppError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!(%status, what, "Supabase rejected token");
                Err(AppError::Unauthorized("invalid or expired session".into()))
            }
            _ => {
                warn!(%status, what, body = %body, "Supabase request failed");
                Err(AppError::Upstream(format!("{what} failed: HTTP {status}: {}", postgrest_message(&body))))
            }
        }
    }
}

/// PostgREST errors look like `{"message": "...", "code": "..."}`.
fn postgrest_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl SupabaseApi for SupabaseClient {
    async fn authenticate(&self, token: &str) -> Result<SupabaseUser, AppError> {
        let url = format!("{}/auth/v1/user", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await?;

        let resp = Self::check(resp, "auth/v1/user").await?;
        Ok(resp.json().await?)
    }

    async fn rpc(&self, token: &str, function: &str, params: Value) -> Result<Value, AppError> {
        let url = format!("{}/rest/v1/rpc/{function}", self.base_url);
        debug!(function, "Supabase RPC");

        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .json(&params)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await?;

        let resp = Self::check(resp, function).await?;
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgrest_message_extraction() {
        let body = r#"{"code":"42883","message":"function api_nope() does not exist"}"#;
        assert_eq!(postgrest_message(body), "function api_nope() does not exist");
        assert_eq!(postgrest_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_user_payload() {
        let raw = r#"{"id":"2f1c7a1e-3f63-4c55-9d1c-0c7f3b6c9f10","email":"a@b.co","aud":"authenticated"}"#;
        let user: SupabaseUser = serde_json::from_str(raw).unwrap();
        assert_eq!(user.email.as_deref(), Some("a@b.co"));
    }
}
