//! # state
//!
//! Shared state injected into every Axum handler.  All external systems sit
//! behind trait objects so the router can be driven against in-memory fakes.

use std::sync::Arc;

use crate::billing::store::BillingStore;
use crate::billing::stripe::StripeApi;
use crate::billing::webhook::WebhookProcessor;
use crate::config::StripeConfig;
use crate::plan::PlanCache;
use crate::portfolio::PortfolioService;
use crate::supabase::SupabaseApi;

// ─── AppState ─────────────────────────────────────────────────────────────────

pub struct AppState {
    // ── Supabase ──────────────────────────────────────────────────────────────
    /// Token checks and RPC reads, always as the calling user.
    pub supabase:      Arc<dyn SupabaseApi>,
    pub portfolio:     PortfolioService,

    // ── Billing ───────────────────────────────────────────────────────────────
    pub store:         Arc<dyn BillingStore>,
    pub stripe:        Arc<dyn StripeApi>,
    pub stripe_config: StripeConfig,
    pub webhooks:      WebhookProcessor,

    // ── Plan gating ───────────────────────────────────────────────────────────
    /// Resolved free / premium per user, de-duplicated across concurrent requests.
    pub plans:         PlanCache,
}

impl AppState {
    pub fn new(
        supabase: Arc<dyn SupabaseApi>,
        store: Arc<dyn BillingStore>,
        stripe: Arc<dyn StripeApi>,
        stripe_config: StripeConfig,
        plan_cache_ttl: std::time::Duration,
    ) -> Self {
        Self {
            portfolio: PortfolioService::new(Arc::clone(&supabase)),
            supabase,
            webhooks: WebhookProcessor::new(Arc::clone(&store)),
            plans:    PlanCache::new(Arc::clone(&store), plan_cache_ttl),
            store,
            stripe,
            stripe_config,
        }
    }
}

/// Convenience type alias
pub type SharedState = Arc<AppState>;
