//! # billing — Stripe subscription plumbing
//!
//! ```text
//!  Browser ── POST /api/stripe/create-checkout-session ──▶ checkout ──▶ Stripe API
//!  Stripe  ── POST /api/stripe/webhook ──▶ signature ──▶ webhook ──▶ store
//!                                                           │
//!                                        user_profiles.plan ◀┘ (read by plan::PlanCache)
//! ```

pub mod checkout;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod signature;
pub mod store;
pub mod stripe;
pub mod webhook;
