//! # assets — Asset catalogue from Supabase
//!
//! ```text
//! GET {SUPABASE_URL}/rest/v1/global_assets?select=id,symbol,class,currency,manual_price&order=symbol
//!   apikey / Authorization: <service role key>
//! ```

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Asset {
    pub id:           String,
    pub symbol:       String,
    #[serde(default)]
    pub class:        Option<String>,
    #[serde(default)]
    pub currency:     Option<String>,
    /// Price entered by hand for assets without a market feed.
    #[serde(default)]
    pub manual_price: Option<f64>,
}

#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn assets(&self) -> anyhow::Result<Vec<Asset>>;
}

pub struct SupabaseAssets {
    http:     reqwest::Client,
    base_url: String,
    key:      String,
}

impl SupabaseAssets {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            base_url: config.supabase_url.clone(),
            key:      config.service_role_key.clone(),
        }
    }
}

#[async_trait]
impl AssetSource for SupabaseAssets {
    async fn assets(&self) -> anyhow::Result<Vec<Asset>> {
        let url = format!(
            "{}/rest/v1/global_assets?select=id,symbol,class,currency,manual_price&order=symbol",
            self.base_url
        );

        let resp = self
            .http
            .get(&url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
            .context("Supabase unreachable")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("global_assets request failed: {status} {body}");
        }

        resp.json().await.context("Failed to parse global_assets rows")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_row_shape() {
        let rows: Vec<Asset> = serde_json::from_str(
            r#"[
                {"id":"a1","symbol":"VWCE","class":"etf","currency":"EUR","manual_price":null},
                {"id":"a2","symbol":"HOUSE","manual_price":250000}
            ]"#,
        )
        .unwrap();

        assert_eq!(rows[0].class.as_deref(), Some("etf"));
        assert_eq!(rows[0].manual_price, None);
        assert_eq!(rows[1].currency, None);
        assert_eq!(rows[1].manual_price, Some(250_000.0));
    }
}
