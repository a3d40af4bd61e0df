//! # config — price-sync settings from environment variables
//!
//! | Variable                    | Default                  |
//! |-----------------------------|--------------------------|
//! | `SUPABASE_URL`              | required (or `NEXT_PUBLIC_SUPABASE_URL`) |
//! | `SUPABASE_SERVICE_ROLE_KEY` | required                 |
//! | `CLICKHOUSE_URL`            | `http://localhost:8123`  |
//! | `CLICKHOUSE_USER`           | `default`                |
//! | `CLICKHOUSE_PASSWORD`       | empty                    |
//! | `CLICKHOUSE_DATABASE`       | `default`                |
//! | `PRICE_API_URL`             | unset → mock prices      |

use anyhow::anyhow;

#[derive(Debug, Clone)]
pub struct Config {
    pub supabase_url:     String,
    /// Service role key: the job reads the shared asset catalogue, not a user's rows.
    pub service_role_key: String,
    pub clickhouse:       ClickHouseConfig,
    pub price_api_url:    Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClickHouseConfig {
    pub url:      String,
    pub user:     String,
    pub password: String,
    pub database: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let supabase_url = non_empty("SUPABASE_URL")
            .or_else(|| non_empty("NEXT_PUBLIC_SUPABASE_URL"))
            .ok_or_else(|| anyhow!("SUPABASE_URL environment variable is required"))?;

        let service_role_key = non_empty("SUPABASE_SERVICE_ROLE_KEY")
            .ok_or_else(|| anyhow!("SUPABASE_SERVICE_ROLE_KEY environment variable is required"))?;

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            service_role_key,
            clickhouse: ClickHouseConfig {
                url:      non_empty("CLICKHOUSE_URL")
                    .unwrap_or_else(|| "http://localhost:8123".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                user:     non_empty("CLICKHOUSE_USER").unwrap_or_else(|| "default".to_string()),
                password: var("CLICKHOUSE_PASSWORD").unwrap_or_default(),
                database: non_empty("CLICKHOUSE_DATABASE").unwrap_or_else(|| "default".to_string()),
            },
            price_api_url: non_empty("PRICE_API_URL").map(|u| u.trim_end_matches('/').to_string()),
        })
    }
}
