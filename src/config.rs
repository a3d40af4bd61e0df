//! # config — Server configuration from environment variables
//!
//! | Variable                         | Default                  |
//! |----------------------------------|--------------------------|
//! | `BIND_ADDR`                      | `0.0.0.0:3000`           |
//! | `STRIPE_SECRET_KEY`              | required                 |
//! | `STRIPE_WEBHOOK_SECRET`          | required                 |
//! | `STRIPE_API_BASE`                | `https://api.stripe.com` |
//! | `STRIPE_PRICE_IDS`               | empty (any price)        |
//! | `STRIPE_WEBHOOK_TOLERANCE_SECS`  | `300`                    |
//! | `SUPABASE_URL`                   | required                 |
//! | `SUPABASE_ANON_KEY`              | required                 |
//! | `DATABASE_URL`                   | unset (in-memory store)  |
//! | `PLAN_CACHE_TTL_SECS`            | `60`                     |
//!
//! The Supabase pair also accepts the frontend's `NEXT_PUBLIC_*` names so a
//! single `.env` can serve both.

use std::{net::SocketAddr, time::Duration};

use anyhow::{anyhow, Context};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr:          SocketAddr,
    pub stripe:             StripeConfig,
    pub supabase_url:       String,
    pub supabase_anon_key:  String,
    pub database_url:       Option<String>,
    pub plan_cache_ttl:     Duration,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key:        String,
    pub webhook_secret:    String,
    pub api_base:          String,
    /// Prices checkout may sell. Empty = no restriction.
    pub allowed_price_ids: Vec<String>,
    pub webhook_tolerance: Duration,
}

impl StripeConfig {
    pub fn is_price_allowed(&self, price_id: &str) -> bool {
        self.allowed_price_ids.is_empty()
            || self.allowed_price_ids.iter().any(|p| p == price_id)
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup (the process env in production).
    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            non_empty(key).ok_or_else(|| anyhow!("{key} environment variable is required"))
        };

        let bind_addr = non_empty("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .context("BIND_ADDR must be a socket address, e.g. 0.0.0.0:3000")?;

        let tolerance_secs: u64 = non_empty("STRIPE_WEBHOOK_TOLERANCE_SECS")
            .unwrap_or_else(|| "300".to_string())
            .parse()
            .context("STRIPE_WEBHOOK_TOLERANCE_SECS must be a number")?;

        let cache_ttl_secs: u64 = non_empty("PLAN_CACHE_TTL_SECS")
            .unwrap_or_else(|| "60".to_string())
            .parse()
            .context("PLAN_CACHE_TTL_SECS must be a number")?;

        let allowed_price_ids = non_empty("STRIPE_PRICE_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let supabase_url = non_empty("SUPABASE_URL")
            .or_else(|| non_empty("NEXT_PUBLIC_SUPABASE_URL"))
            .ok_or_else(|| anyhow!("SUPABASE_URL (or NEXT_PUBLIC_SUPABASE_URL) is required"))?;
        let supabase_anon_key = non_empty("SUPABASE_ANON_KEY")
            .or_else(|| non_empty("NEXT_PUBLIC_SUPABASE_ANON_KEY"))
            .ok_or_else(|| {
                anyhow!("SUPABASE_ANON_KEY (or NEXT_PUBLIC_SUPABASE_ANON_KEY) is required")
            })?;

        Ok(Self {
            bind_addr,
            stripe: StripeConfig {
                secret_key:        required("STRIPE_SECRET_KEY")?,
                webhook_secret:    required("STRIPE_WEBHOOK_SECRET")?,
                api_base:          non_empty("STRIPE_API_BASE")
                    .unwrap_or_else(|| "https://api.stripe.com".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                allowed_price_ids,
                webhook_tolerance: Duration::from_secs(tolerance_secs),
            },
            supabase_url:      supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
            database_url:      non_empty("DATABASE_URL"),
            plan_cache_ttl:    Duration::from_secs(cache_ttl_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("STRIPE_SECRET_KEY", "sk_test_123"),
        ("STRIPE_WEBHOOK_SECRET", "whsec_123"),
        ("SUPABASE_URL", "https://demo.supabase.co/"),
        ("SUPABASE_ANON_KEY", "anon"),
    ];

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_vars(vars(BASE)).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.stripe.api_base, "https://api.stripe.com");
        assert_eq!(config.stripe.webhook_tolerance, Duration::from_secs(300));
        assert_eq!(config.supabase_url, "https://demo.supabase.co");
        assert_eq!(config.plan_cache_ttl, Duration::from_secs(60));
        assert!(config.database_url.is_none());
        assert!(config.stripe.is_price_allowed("price_anything"));
    }

    #[test]
    fn test_missing_webhook_secret_is_named() {
        let pairs: Vec<_> = BASE
            .iter()
            .copied()
            .filter(|(k, _)| *k != "STRIPE_WEBHOOK_SECRET")
            .collect();
        let err = AppConfig::from_vars(vars(&pairs)).unwrap_err();
        assert!(err.to_string().contains("STRIPE_WEBHOOK_SECRET"));
    }

    #[test]
    fn test_next_public_fallback() {
        let pairs = [
            ("STRIPE_SECRET_KEY", "sk"),
            ("STRIPE_WEBHOOK_SECRET", "whsec"),
            ("NEXT_PUBLIC_SUPABASE_URL", "https://x.supabase.co"),
            ("NEXT_PUBLIC_SUPABASE_ANON_KEY", "anon-public"),
        ];
        let config = AppConfig::from_vars(vars(&pairs)).unwrap();
        assert_eq!(config.supabase_url, "https://x.supabase.co");
        assert_eq!(config.supabase_anon_key, "anon-public");
    }

    #[test]
    fn test_price_allow_list() {
        let mut pairs = BASE.to_vec();
        pairs.push(("STRIPE_PRICE_IDS", "price_monthly, price_yearly,"));
        let config = AppConfig::from_vars(vars(&pairs)).unwrap();
        assert_eq!(config.stripe.allowed_price_ids, vec!["price_monthly", "price_yearly"]);
        assert!(config.stripe.is_price_allowed("price_yearly"));
        assert!(!config.stripe.is_price_allowed("price_lifetime"));
    }
}
