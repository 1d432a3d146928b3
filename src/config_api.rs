use crate::constants::{
    AD_ACCOUNTS_PATH, CAMPAIGNS_PATH, CONFIG_PATH, CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON,
};
use crate::models::{
    AdAccountRemoval, AdAccountUpsert, CampaignRemoval, CampaignUpsert, ConfigDocument,
    ConfigPatch, Platform,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ConfigApiError {
    #[error("Request failed: {0}")]
    Unreachable(String),
    #[error("API Error: {body}")]
    Server { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ConfigApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigApiError::Server { status: 404, .. })
    }
}

/// Remote source of truth for per-platform auto-pause configuration.
///
/// Writes answer with whatever part of the document the server chose to
/// echo; callers must not assume it equals what was submitted.
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    async fn fetch_config(&self, platform: Platform) -> Result<ConfigDocument, ConfigApiError>;

    async fn apply_partial(
        &self,
        platform: Platform,
        patch: &ConfigPatch,
    ) -> Result<ConfigPatch, ConfigApiError>;

    async fn upsert_campaign(
        &self,
        platform: Platform,
        campaign: &str,
        threshold: i64,
    ) -> Result<ConfigPatch, ConfigApiError>;

    async fn delete_campaign(
        &self,
        platform: Platform,
        campaign: &str,
    ) -> Result<ConfigPatch, ConfigApiError>;

    async fn fetch_ad_accounts(&self, platform: Platform) -> Result<ConfigPatch, ConfigApiError>;

    async fn upsert_ad_account(
        &self,
        platform: Platform,
        name: &str,
        id: &str,
    ) -> Result<ConfigPatch, ConfigApiError>;

    async fn delete_ad_account(
        &self,
        platform: Platform,
        name: &str,
    ) -> Result<ConfigPatch, ConfigApiError>;
}

pub struct ConfigApi {
    client: Client,
    base_url: String,
}

impl ConfigApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigApiError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn scoped(&self, request: RequestBuilder, platform: Platform) -> RequestBuilder {
        request
            .query(&[("platform", platform.as_str())])
            .header(CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON)
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, ConfigApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ConfigApiError::Unreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ConfigApiError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "config API rejected request");
            return Err(ConfigApiError::Server {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }

    /// A confirmed write with an empty or unreadable body still counts as
    /// confirmed; it just echoes nothing.
    fn parse_echo(body: &str) -> ConfigPatch {
        if body.trim().is_empty() {
            return ConfigPatch::default();
        }
        serde_json::from_str(body).unwrap_or_else(|e| {
            warn!(error = %e, "config API write answered with an unreadable body");
            ConfigPatch::default()
        })
    }
}

#[async_trait]
impl ConfigBackend for ConfigApi {
    async fn fetch_config(&self, platform: Platform) -> Result<ConfigDocument, ConfigApiError> {
        let request = self.scoped(self.client.get(self.url(CONFIG_PATH)), platform);
        let body = self.send(request).await?;

        serde_json::from_str(&body).map_err(|e| ConfigApiError::InvalidResponse(e.to_string()))
    }

    async fn apply_partial(
        &self,
        platform: Platform,
        patch: &ConfigPatch,
    ) -> Result<ConfigPatch, ConfigApiError> {
        let request = self
            .scoped(self.client.post(self.url(CONFIG_PATH)), platform)
            .json(patch);
        let body = self.send(request).await?;

        Ok(Self::parse_echo(&body))
    }

    async fn upsert_campaign(
        &self,
        platform: Platform,
        campaign: &str,
        threshold: i64,
    ) -> Result<ConfigPatch, ConfigApiError> {
        let request = self
            .scoped(self.client.post(self.url(CAMPAIGNS_PATH)), platform)
            .json(&CampaignUpsert {
                campaign,
                threshold,
            });
        let body = self.send(request).await?;

        Ok(Self::parse_echo(&body))
    }

    async fn delete_campaign(
        &self,
        platform: Platform,
        campaign: &str,
    ) -> Result<ConfigPatch, ConfigApiError> {
        let request = self
            .scoped(self.client.delete(self.url(CAMPAIGNS_PATH)), platform)
            .json(&CampaignRemoval { campaign });
        let body = self.send(request).await?;

        Ok(Self::parse_echo(&body))
    }

    async fn fetch_ad_accounts(&self, platform: Platform) -> Result<ConfigPatch, ConfigApiError> {
        let request = self.scoped(self.client.get(self.url(AD_ACCOUNTS_PATH)), platform);
        let body = self.send(request).await?;

        serde_json::from_str(&body).map_err(|e| ConfigApiError::InvalidResponse(e.to_string()))
    }

    async fn upsert_ad_account(
        &self,
        platform: Platform,
        name: &str,
        id: &str,
    ) -> Result<ConfigPatch, ConfigApiError> {
        let request = self
            .scoped(self.client.post(self.url(AD_ACCOUNTS_PATH)), platform)
            .json(&AdAccountUpsert {
                ad_account_name: name,
                ad_account_id: id,
            });
        let body = self.send(request).await?;

        Ok(Self::parse_echo(&body))
    }

    async fn delete_ad_account(
        &self,
        platform: Platform,
        name: &str,
    ) -> Result<ConfigPatch, ConfigApiError> {
        let request = self
            .scoped(self.client.delete(self.url(AD_ACCOUNTS_PATH)), platform)
            .json(&AdAccountRemoval {
                ad_account_name: name,
            });
        let body = self.send(request).await?;

        Ok(Self::parse_echo(&body))
    }
}
