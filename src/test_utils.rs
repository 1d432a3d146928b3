//! In-memory stand-ins for the remote collaborators, for unit tests.

use crate::config_api::{ConfigApiError, ConfigBackend};
use crate::identity::{IdentityError, IdentityProvider};
use crate::models::{ConfigDocument, ConfigPatch, Platform, Session, User};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Unreachable,
    Server(u16, &'static str),
}

impl Fault {
    fn into_error(self) -> ConfigApiError {
        match self {
            Fault::Unreachable => ConfigApiError::Unreachable("connection refused".to_string()),
            Fault::Server(status, body) => ConfigApiError::Server {
                status,
                body: body.to_string(),
            },
        }
    }
}

#[derive(Default)]
struct FakeState {
    documents: HashMap<Platform, ConfigDocument>,
    patches: Vec<ConfigPatch>,
    requests: usize,
    fail_next: Option<Fault>,
    fail_writes: Option<Fault>,
    clamp: Option<i64>,
    echo_nothing: bool,
    hide_ad_accounts: bool,
    not_found_on_missing_delete: bool,
}

impl FakeState {
    fn clamp(&self, value: i64) -> i64 {
        match self.clamp {
            Some(limit) => value.max(limit),
            None => value,
        }
    }

    fn doc(&mut self, platform: Platform) -> &mut ConfigDocument {
        self.documents.entry(platform).or_default()
    }

    fn campaigns_echo(&mut self, platform: Platform) -> ConfigPatch {
        if self.echo_nothing {
            return ConfigPatch::default();
        }
        ConfigPatch {
            campaign_loss_thresholds: Some(self.doc(platform).campaign_loss_thresholds.clone()),
            ..Default::default()
        }
    }

    fn ad_accounts_echo(&mut self, platform: Platform) -> ConfigPatch {
        if self.echo_nothing {
            return ConfigPatch::default();
        }
        ConfigPatch {
            ad_accounts: Some(self.doc(platform).ad_accounts.clone().unwrap_or_default()),
            ..Default::default()
        }
    }
}

/// Config API double: keeps one document per platform, records submitted
/// patches and can fail or rewrite values on demand. Every call yields once
/// so concurrent callers interleave the way real requests would.
#[derive(Default)]
pub struct FakeConfigBackend {
    state: Mutex<FakeState>,
}

impl FakeConfigBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(platform: Platform, document: ConfigDocument) -> Self {
        let backend = Self::new();
        backend.lock().documents.insert(platform, document);
        backend
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn document(&self, platform: Platform) -> ConfigDocument {
        self.lock().doc(platform).clone()
    }

    pub fn set_ad_accounts(&self, platform: Platform, accounts: BTreeMap<String, String>) {
        self.lock().doc(platform).ad_accounts = Some(accounts);
    }

    pub fn hide_ad_accounts_in_document(&self, hide: bool) {
        self.lock().hide_ad_accounts = hide;
    }

    /// The next request of any kind fails.
    pub fn fail_next(&self, fault: Fault) {
        self.lock().fail_next = Some(fault);
    }

    /// Every write fails; reads keep working.
    pub fn fail_writes(&self, fault: Fault) {
        self.lock().fail_writes = Some(fault);
    }

    /// Stored thresholds are capped at `limit` (a loss no deeper than it).
    pub fn clamp_thresholds_to(&self, limit: i64) {
        self.lock().clamp = Some(limit);
    }

    pub fn echo_nothing(&self, enabled: bool) {
        self.lock().echo_nothing = enabled;
    }

    pub fn not_found_on_missing_delete(&self, enabled: bool) {
        self.lock().not_found_on_missing_delete = enabled;
    }

    pub fn submitted_patches(&self) -> Vec<ConfigPatch> {
        self.lock().patches.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests
    }

    fn begin(&self, write: bool) -> Result<MutexGuard<'_, FakeState>, ConfigApiError> {
        let mut state = self.lock();
        state.requests += 1;
        if let Some(fault) = state.fail_next.take() {
            return Err(fault.into_error());
        }
        if write {
            if let Some(fault) = state.fail_writes {
                return Err(fault.into_error());
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl ConfigBackend for FakeConfigBackend {
    async fn fetch_config(&self, platform: Platform) -> Result<ConfigDocument, ConfigApiError> {
        tokio::task::yield_now().await;
        let mut state = self.begin(false)?;
        let hide = state.hide_ad_accounts;
        let mut doc = state.doc(platform).clone();
        doc.ad_accounts = if hide {
            None
        } else {
            Some(doc.ad_accounts.unwrap_or_default())
        };
        Ok(doc)
    }

    async fn apply_partial(
        &self,
        platform: Platform,
        patch: &ConfigPatch,
    ) -> Result<ConfigPatch, ConfigApiError> {
        tokio::task::yield_now().await;
        let mut state = self.begin(true)?;
        state.patches.push(patch.clone());

        if let Some(active) = patch.active {
            state.doc(platform).active = active;
        }
        if let Some(threshold) = patch.alert_profit_threshold {
            let threshold = state.clamp(threshold);
            state.doc(platform).alert_profit_threshold = threshold;
        }
        if let Some(campaigns) = &patch.campaign_loss_thresholds {
            let campaigns: BTreeMap<String, i64> = campaigns
                .iter()
                .map(|(k, v)| (k.clone(), state.clamp(*v)))
                .collect();
            state.doc(platform).campaign_loss_thresholds = campaigns;
        }
        if let Some(accounts) = &patch.ad_accounts {
            state.doc(platform).ad_accounts = Some(accounts.clone());
        }

        if state.echo_nothing {
            return Ok(ConfigPatch::default());
        }
        let doc = state.doc(platform).clone();
        Ok(ConfigPatch {
            active: Some(doc.active),
            alert_profit_threshold: Some(doc.alert_profit_threshold),
            campaign_loss_thresholds: Some(doc.campaign_loss_thresholds),
            ad_accounts: Some(doc.ad_accounts.unwrap_or_default()),
        })
    }

    async fn upsert_campaign(
        &self,
        platform: Platform,
        campaign: &str,
        threshold: i64,
    ) -> Result<ConfigPatch, ConfigApiError> {
        tokio::task::yield_now().await;
        let mut state = self.begin(true)?;
        let threshold = state.clamp(threshold);
        state
            .doc(platform)
            .campaign_loss_thresholds
            .insert(campaign.to_string(), threshold);
        Ok(state.campaigns_echo(platform))
    }

    async fn delete_campaign(
        &self,
        platform: Platform,
        campaign: &str,
    ) -> Result<ConfigPatch, ConfigApiError> {
        tokio::task::yield_now().await;
        let mut state = self.begin(true)?;
        let not_found = state.not_found_on_missing_delete;
        let removed = state
            .doc(platform)
            .campaign_loss_thresholds
            .remove(campaign)
            .is_some();
        if !removed && not_found {
            return Err(Fault::Server(404, "campaign not found").into_error());
        }
        Ok(state.campaigns_echo(platform))
    }

    async fn fetch_ad_accounts(&self, platform: Platform) -> Result<ConfigPatch, ConfigApiError> {
        tokio::task::yield_now().await;
        let mut state = self.begin(false)?;
        Ok(ConfigPatch {
            ad_accounts: Some(state.doc(platform).ad_accounts.clone().unwrap_or_default()),
            ..Default::default()
        })
    }

    async fn upsert_ad_account(
        &self,
        platform: Platform,
        name: &str,
        id: &str,
    ) -> Result<ConfigPatch, ConfigApiError> {
        tokio::task::yield_now().await;
        let mut state = self.begin(true)?;
        state
            .doc(platform)
            .ad_accounts
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), id.to_string());
        Ok(state.ad_accounts_echo(platform))
    }

    async fn delete_ad_account(
        &self,
        platform: Platform,
        name: &str,
    ) -> Result<ConfigPatch, ConfigApiError> {
        tokio::task::yield_now().await;
        let mut state = self.begin(true)?;
        let not_found = state.not_found_on_missing_delete;
        let removed = state
            .doc(platform)
            .ad_accounts
            .as_mut()
            .and_then(|accounts| accounts.remove(name))
            .is_some();
        if !removed && not_found {
            return Err(Fault::Server(404, "ad account not found").into_error());
        }
        Ok(state.ad_accounts_echo(platform))
    }
}

/// Identity double with a single known account.
pub struct FakeIdentity {
    email: String,
    password: String,
    user: User,
    sign_outs: AtomicUsize,
    fail_sign_out: bool,
}

impl FakeIdentity {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            user: User {
                id: "user-1".to_string(),
                email: Some(email.to_string()),
            },
            sign_outs: AtomicUsize::new(0),
            fail_sign_out: false,
        }
    }

    /// Remote sign-out answers with a transport error.
    pub fn failing_sign_out(mut self) -> Self {
        self.fail_sign_out = true;
        self
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, IdentityError> {
        if email != self.email || password.expose_secret() != self.password {
            return Err(IdentityError::Auth("Invalid login credentials".to_string()));
        }
        Ok(Session {
            user: self.user.clone(),
            access_token: SecretString::from("fake-token".to_string()),
        })
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), IdentityError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out {
            return Err(IdentityError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }
}
