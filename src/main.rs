//! # Holdwise — Portfolio Tracking Backend
//!
//! ```text
//!  ┌─────────────┐  Bearer <supabase jwt>     ┌──────────────────────────┐
//!  │  Web app    │ ─────────────────────────▶ │ AppState                 │
//!  └─────────────┘  /api/me, /api/portfolio/* │ ├─ portfolio ──▶ Supabase│ RPC (api_*)
//!                   /api/stripe/create-…      │ ├─ plans  (PlanCache)    │
//!                                             │ ├─ store  (BillingStore) │──▶ Postgres / memory
//!  ┌─────────────┐  POST /api/stripe/webhook  │ ├─ webhooks              │
//!  │  Stripe     │ ─────────────────────────▶ │ └─ stripe ──────────────▶│ Stripe REST
//!  └─────────────┘  (Stripe-Signature)        └──────────────────────────┘
//! ```
//!
//! Daily prices are written by the separate `price-sync` binary.
//! Configuration is documented in [`config`].

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod billing;
mod config;
mod error;
mod models;
mod plan;
mod portfolio;
mod routes;
mod state;
mod supabase;

use billing::{store::BillingStore, stripe::StripeClient};
use config::AppConfig;
use state::AppState;
use supabase::SupabaseClient;

// ─── Entry Point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env (optional — production uses real env vars) ──────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("holdwise=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║             HOLDWISE — Portfolio Backend              ║
  ║       Portfolio · Plans · Stripe · Supabase RPC       ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Configuration ──────────────────────────────────────────────────────
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // ── 4. External clients ───────────────────────────────────────────────────
    let http = reqwest::Client::builder()
        .user_agent(concat!("holdwise/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let supabase = Arc::new(SupabaseClient::new(
        http.clone(),
        config.supabase_url.clone(),
        config.supabase_anon_key.clone(),
    ));
    let stripe = Arc::new(StripeClient::new(http, &config.stripe));

    // ── 5. Billing store ──────────────────────────────────────────────────────
    let store = billing_store(&config).await?;

    // ── 6. Shared state & router ──────────────────────────────────────────────
    let state = Arc::new(AppState::new(
        supabase,
        store,
        stripe,
        config.stripe.clone(),
        config.plan_cache_ttl,
    ));
    let app = routes::router(state);

    // ── 7. Bind & Serve ───────────────────────────────────────────────────────
    info!(addr = ?config.bind_addr, "🚀 Holdwise server starting");
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "postgres")]
async fn billing_store(config: &AppConfig) -> anyhow::Result<Arc<dyn BillingStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = billing::postgres::init_pool(url).await?;
            Ok(Arc::new(billing::postgres::PgBillingStore::new(pool)))
        }
        None => {
            warn!("DATABASE_URL not set — billing state is in-memory and lost on restart");
            Ok(Arc::new(billing::store::MemoryBillingStore::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn billing_store(config: &AppConfig) -> anyhow::Result<Arc<dyn BillingStore>> {
    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but this build has no `postgres` feature — ignoring it");
    }
    warn!("Using in-memory billing store — subscriptions are lost on restart");
    Ok(Arc::new(billing::store::MemoryBillingStore::new()))
}
