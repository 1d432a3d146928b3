//! Read-modify-write reconciliation between the page view and the remote
//! configuration document.
//!
//! The server always wins: after a confirmed write the view adopts what the
//! server answered, falling back to a fresh read when the answer does not
//! carry the changed field. Failed operations leave the view untouched.

use crate::config_api::{ConfigApiError, ConfigBackend};
use crate::models::{normalize_loss, AuditAction, ConfigPatch, Platform};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Api(#[from] ConfigApiError),
}

/// How single-entry collection changes reach the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollectionProtocol {
    /// Per-key `POST`/`DELETE` on `/config/campaigns` and `/config/adaccounts`.
    #[default]
    Dedicated,
    /// Fetch the document, change one key, `POST /config` with the whole map.
    WholeMap,
}

impl FromStr for CollectionProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dedicated" => Ok(CollectionProtocol::Dedicated),
            "whole_map" | "whole-map" => Ok(CollectionProtocol::WholeMap),
            other => Err(format!("unknown collection protocol: {other}")),
        }
    }
}

impl fmt::Display for CollectionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionProtocol::Dedicated => f.write_str("dedicated"),
            CollectionProtocol::WholeMap => f.write_str("whole_map"),
        }
    }
}

/// Client-side cache of one platform's configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub active: bool,
    pub alert_profit_threshold: i64,
    pub campaigns: BTreeMap<String, i64>,
    pub ad_accounts: BTreeMap<String, String>,
    pub loaded: bool,
}

/// What a confirmed mutation did, in the shape the audit trail stores.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub action: AuditAction,
    pub details: Map<String, Value>,
}

impl SyncOutcome {
    fn new(action: AuditAction, platform: Platform) -> Self {
        let mut details = Map::new();
        details.insert("platform".to_string(), Value::from(platform.as_str()));
        Self { action, details }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

pub struct SyncReconciler {
    backend: Arc<dyn ConfigBackend>,
    platform: Platform,
    protocol: CollectionProtocol,
    manages_ad_accounts: bool,
}

impl SyncReconciler {
    pub fn new(
        backend: Arc<dyn ConfigBackend>,
        platform: Platform,
        protocol: CollectionProtocol,
        manages_ad_accounts: bool,
    ) -> Self {
        Self {
            backend,
            platform,
            protocol,
            manages_ad_accounts,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn protocol(&self) -> CollectionProtocol {
        self.protocol
    }

    /// Replaces the view with the server's current document.
    pub async fn load(&self, view: &mut ViewState) -> Result<(), SyncError> {
        let doc = self.backend.fetch_config(self.platform).await?;

        let ad_accounts = match doc.ad_accounts {
            Some(accounts) => accounts,
            None if self.manages_ad_accounts
                && self.protocol == CollectionProtocol::Dedicated =>
            {
                match self.backend.fetch_ad_accounts(self.platform).await {
                    Ok(echo) => echo.ad_accounts.unwrap_or_default(),
                    Err(e) => {
                        warn!(platform = %self.platform, error = %e, "failed to fetch ad accounts");
                        BTreeMap::new()
                    }
                }
            }
            None => BTreeMap::new(),
        };

        *view = ViewState {
            active: doc.active,
            alert_profit_threshold: doc.alert_profit_threshold,
            campaigns: doc.campaign_loss_thresholds,
            ad_accounts,
            loaded: true,
        };
        debug!(platform = %self.platform, campaigns = view.campaigns.len(), "config loaded");
        Ok(())
    }

    pub async fn set_active(
        &self,
        view: &mut ViewState,
        enabled: bool,
    ) -> Result<SyncOutcome, SyncError> {
        let patch = ConfigPatch {
            active: Some(enabled),
            ..Default::default()
        };
        let echo = self.backend.apply_partial(self.platform, &patch).await?;

        view.active = echo.active.unwrap_or(enabled);
        info!(platform = %self.platform, active = view.active, "auto pause updated");

        Ok(SyncOutcome::new(AuditAction::ToggleAutoPause, self.platform)
            .with("new_value", view.active))
    }

    pub async fn set_global_threshold(
        &self,
        view: &mut ViewState,
        entered: i64,
    ) -> Result<SyncOutcome, SyncError> {
        let threshold = normalize_loss(entered);
        let patch = ConfigPatch {
            alert_profit_threshold: Some(threshold),
            ..Default::default()
        };
        let echo = self.backend.apply_partial(self.platform, &patch).await?;

        view.alert_profit_threshold = echo.alert_profit_threshold.unwrap_or(threshold);
        info!(
            platform = %self.platform,
            threshold = view.alert_profit_threshold,
            "global threshold updated"
        );

        Ok(
            SyncOutcome::new(AuditAction::UpdateGlobalThreshold, self.platform)
                .with("new_value", view.alert_profit_threshold),
        )
    }

    /// Adds or overwrites one campaign condition. `action` distinguishes an
    /// add from an edit in the audit trail only.
    pub async fn upsert_campaign(
        &self,
        view: &mut ViewState,
        campaign: &str,
        entered: i64,
        action: AuditAction,
    ) -> Result<SyncOutcome, SyncError> {
        if campaign.trim().is_empty() {
            return Err(SyncError::Validation(
                "Please enter a campaign name.".to_string(),
            ));
        }
        let threshold = normalize_loss(entered);

        let campaigns = match self.protocol {
            CollectionProtocol::Dedicated => {
                let echo = self
                    .backend
                    .upsert_campaign(self.platform, campaign, threshold)
                    .await?;
                let mut local = view.campaigns.clone();
                local.insert(campaign.to_string(), threshold);
                self.adopt_campaigns(echo, local).await
            }
            CollectionProtocol::WholeMap => {
                self.merge_campaigns(|map| {
                    map.insert(campaign.to_string(), threshold);
                })
                .await?
                .1
            }
        };

        view.campaigns = campaigns;
        info!(platform = %self.platform, campaign, threshold, "campaign condition saved");

        Ok(SyncOutcome::new(action, self.platform)
            .with("campaign", campaign)
            .with("value", threshold))
    }

    /// Removes one campaign condition. Removing an absent key succeeds.
    ///
    /// `removed` in the outcome follows the server: a dedicated delete counts
    /// as removed unless the server answers 404, whatever the local view held.
    pub async fn delete_campaign(
        &self,
        view: &mut ViewState,
        campaign: &str,
    ) -> Result<SyncOutcome, SyncError> {
        if campaign.trim().is_empty() {
            return Err(SyncError::Validation(
                "Please select a campaign to delete.".to_string(),
            ));
        }

        let (removed, campaigns) = match self.protocol {
            CollectionProtocol::Dedicated => {
                let mut local = view.campaigns.clone();
                local.remove(campaign);
                match self.backend.delete_campaign(self.platform, campaign).await {
                    Ok(echo) => (true, self.adopt_campaigns(echo, local).await),
                    Err(e) if e.is_not_found() => {
                        debug!(platform = %self.platform, campaign, "campaign already absent");
                        (false, self.adopt_campaigns(ConfigPatch::default(), local).await)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            CollectionProtocol::WholeMap => {
                self.merge_campaigns(|map| map.remove(campaign).is_some())
                    .await?
            }
        };

        view.campaigns = campaigns;
        info!(platform = %self.platform, campaign, removed, "campaign condition deleted");

        Ok(SyncOutcome::new(AuditAction::DeleteCampaign, self.platform)
            .with("campaign", campaign)
            .with("removed", removed))
    }

    pub async fn upsert_ad_account(
        &self,
        view: &mut ViewState,
        name: &str,
        id: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let (name, id) = (name.trim(), id.trim());
        if name.is_empty() || id.is_empty() {
            return Err(SyncError::Validation(
                "Please provide both ad account name and ID.".to_string(),
            ));
        }

        let accounts = match self.protocol {
            CollectionProtocol::Dedicated => {
                let echo = self
                    .backend
                    .upsert_ad_account(self.platform, name, id)
                    .await?;
                let mut local = view.ad_accounts.clone();
                local.insert(name.to_string(), id.to_string());
                self.adopt_ad_accounts(echo, local).await
            }
            CollectionProtocol::WholeMap => {
                self.merge_ad_accounts(|map| {
                    map.insert(name.to_string(), id.to_string());
                })
                .await?
                .1
            }
        };

        view.ad_accounts = accounts;
        info!(platform = %self.platform, ad_account = name, "ad account saved");

        Ok(SyncOutcome::new(AuditAction::AddAdAccount, self.platform)
            .with("ad_account_name", name)
            .with("ad_account_id", id))
    }

    pub async fn delete_ad_account(
        &self,
        view: &mut ViewState,
        name: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation(
                "Please select an ad account to delete.".to_string(),
            ));
        }

        let (removed, accounts) = match self.protocol {
            CollectionProtocol::Dedicated => {
                let mut local = view.ad_accounts.clone();
                local.remove(name);
                match self.backend.delete_ad_account(self.platform, name).await {
                    Ok(echo) => (true, self.adopt_ad_accounts(echo, local).await),
                    Err(e) if e.is_not_found() => {
                        debug!(platform = %self.platform, ad_account = name, "ad account already absent");
                        (false, self.adopt_ad_accounts(ConfigPatch::default(), local).await)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            CollectionProtocol::WholeMap => {
                self.merge_ad_accounts(|map| map.remove(name).is_some())
                    .await?
            }
        };

        view.ad_accounts = accounts;
        info!(platform = %self.platform, ad_account = name, removed, "ad account deleted");

        Ok(SyncOutcome::new(AuditAction::DeleteAdAccount, self.platform)
            .with("ad_account_name", name)
            .with("removed", removed))
    }

    /// Fetch, apply `change` to the fresh campaign map, submit the whole map.
    /// Returns the closure's result and the map the view should adopt.
    async fn merge_campaigns<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, i64>) -> T,
    ) -> Result<(T, BTreeMap<String, i64>), SyncError> {
        let mut doc = self.backend.fetch_config(self.platform).await?;
        let result = change(&mut doc.campaign_loss_thresholds);

        let submitted = doc.campaign_loss_thresholds;
        let patch = ConfigPatch {
            campaign_loss_thresholds: Some(submitted.clone()),
            ..Default::default()
        };
        let echo = self.backend.apply_partial(self.platform, &patch).await?;

        Ok((result, self.adopt_campaigns(echo, submitted).await))
    }

    async fn merge_ad_accounts<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> Result<(T, BTreeMap<String, String>), SyncError> {
        let doc = self.backend.fetch_config(self.platform).await?;
        let mut accounts = doc.ad_accounts.unwrap_or_default();
        let result = change(&mut accounts);

        let patch = ConfigPatch {
            ad_accounts: Some(accounts.clone()),
            ..Default::default()
        };
        let echo = self.backend.apply_partial(self.platform, &patch).await?;

        Ok((result, self.adopt_ad_accounts(echo, accounts).await))
    }

    /// Server answer if it carries the campaign map, else a fresh read, else
    /// the locally computed map. The write is already confirmed here, so a
    /// failed re-read only costs accuracy, not correctness of the outcome.
    async fn adopt_campaigns(
        &self,
        echo: ConfigPatch,
        local: BTreeMap<String, i64>,
    ) -> BTreeMap<String, i64> {
        if let Some(campaigns) = echo.campaign_loss_thresholds {
            return campaigns;
        }
        match self.backend.fetch_config(self.platform).await {
            Ok(doc) => doc.campaign_loss_thresholds,
            Err(e) => {
                warn!(platform = %self.platform, error = %e, "re-read after write failed; keeping local campaigns");
                local
            }
        }
    }

    async fn adopt_ad_accounts(
        &self,
        echo: ConfigPatch,
        local: BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        if let Some(accounts) = echo.ad_accounts {
            return accounts;
        }
        let reread = match self.protocol {
            CollectionProtocol::Dedicated => self
                .backend
                .fetch_ad_accounts(self.platform)
                .await
                .map(|echo| echo.ad_accounts),
            CollectionProtocol::WholeMap => self
                .backend
                .fetch_config(self.platform)
                .await
                .map(|doc| doc.ad_accounts),
        };
        match reread {
            Ok(Some(accounts)) => accounts,
            Ok(None) => local,
            Err(e) => {
                warn!(platform = %self.platform, error = %e, "re-read after write failed; keeping local ad accounts");
                local
            }
        }
    }
}
