//! # auth — Supabase session middleware
//!
//! Protects user routes with the Supabase access token the frontend already
//! holds: `Authorization: Bearer <jwt>`.
//!
//! The token is checked against Supabase (`GET /auth/v1/user`) and the result
//! is stored in request extensions as [`AuthUser`].  The raw token is kept so
//! RPC calls run under the caller's row-level security.
//!
//! ## Not covered
//! `/health` and `/api/stripe/webhook` (Stripe signs its own requests) are
//! mounted outside this layer.
//!
//! ## Usage
//! ```bash
//! curl -H "Authorization: Bearer $SUPABASE_JWT" http://localhost:3000/api/me
//! ```

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;
use uuid::Uuid;

use crate::{error::AppError, state::SharedState};

/// The signed-in caller, available to handlers via `Extension<AuthUser>`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id:    Uuid,
    pub email: Option<String>,
    /// Raw Supabase JWT, forwarded on RPC calls.
    pub token: String,
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Axum middleware — resolves the bearer token to an [`AuthUser`].
pub async fn require_user(
    State(state): State<SharedState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&request).map(String::from) else {
        return AppError::Unauthorized("missing bearer token".into()).into_response();
    };

    match state.supabase.authenticate(&token).await {
        Ok(user) => {
            request.extensions_mut().insert(AuthUser {
                id:    user.id,
                email: user.email,
                token,
            });
            next.run(request).await
        }
        Err(err) => {
            let path = request.uri().path();
            warn!(path, error = %err, "❌ Unauthorized request — session rejected");
            err.into_response()
        }
    }
}
