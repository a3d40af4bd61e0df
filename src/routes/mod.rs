//! # routes
//!
//! ```text
//!  /health                 ─┐
//!  /api/stripe/webhook     ─┴─ public (webhook is HMAC-signed)
//!
//!  /api/me                 ─┐
//!  /api/portfolio/*         ├─ require_user (Supabase JWT)
//!  /api/stripe/create-…    ─┘
//! ```

pub mod account;
pub mod portfolio;
pub mod stripe;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth::require_user, error::AppError, state::SharedState};

/// Builds the full application router.
pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let user_routes = Router::new()
        // ── Account ───────────────────────────────────────────────────────────
        .route("/api/me",                             get(account::get_me))
        // ── Portfolio ─────────────────────────────────────────────────────────
        .route("/api/portfolio/series",               get(portfolio::get_series))
        .route("/api/portfolio/change",               get(portfolio::get_change))
        .route("/api/portfolio/holdings",             get(portfolio::get_holdings))
        .route("/api/portfolio/holdings/accounts",    get(portfolio::get_account_holdings))
        .route("/api/portfolio/snapshot",             get(portfolio::get_snapshot))
        .route("/api/portfolio/dashboard",            get(portfolio::get_dashboard))
        // ── Billing ───────────────────────────────────────────────────────────
        .route("/api/stripe/create-checkout-session", post(stripe::create_checkout_session))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_user));

    Router::new()
        .route("/health",             get(account::health_check))
        .route("/api/stripe/webhook", post(stripe::stripe_webhook))
        .merge(user_routes)
        .fallback(not_found)
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound("no such route".into())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
