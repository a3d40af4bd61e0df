//! Domain models shared across the Holdwise backend.

pub mod billing;
pub mod portfolio;

pub use billing::{Plan, Subscription, SubscriptionStatus, UserProfile};
pub use portfolio::{
    AccountHolding, Dashboard, Granularity, Holding, PortfolioSnapshot, ValuePoint, ValueSeries,
};
