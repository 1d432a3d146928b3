use crate::audit::{AuditError, AuditLogger};
use crate::config_api::ConfigBackend;
use crate::identity::{IdentityError, IdentityProvider};
use crate::models::{AuditAction, AuditRecord, Notice, Platform, Session};
use crate::session::{NotSignedIn, SessionStore};
use crate::sync::{CollectionProtocol, SyncError, SyncOutcome, SyncReconciler, ViewState};
use secrecy::SecretString;
use serde_json::Map;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

/// User-triggered operations on a dashboard page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageAction {
    ToggleAutoPause,
    SetGlobalThreshold,
    AddCampaign,
    UpdateCampaign,
    DeleteCampaign,
    AddAdAccount,
    DeleteAdAccount,
}

impl fmt::Display for PageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PageAction::ToggleAutoPause => "apply auto pause",
            PageAction::SetGlobalThreshold => "update the global threshold",
            PageAction::AddCampaign => "add a campaign condition",
            PageAction::UpdateCampaign => "update a campaign condition",
            PageAction::DeleteCampaign => "delete a campaign condition",
            PageAction::AddAdAccount => "add an ad account",
            PageAction::DeleteAdAccount => "delete an ad account",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    NotSignedIn(#[from] NotSignedIn),
    #[error("Still working on the previous request to {0}")]
    Busy(PageAction),
    #[error("Ad account management is not available on the {0} dashboard")]
    AdAccountsDisabled(Platform),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("Failed to fetch logs: {0}")]
    Audit(#[from] AuditError),
}

impl ActionError {
    /// Input problems are warnings; everything else is an error.
    pub fn to_notice(&self) -> Notice {
        match self {
            ActionError::Sync(SyncError::Validation(msg)) => Notice::Warning(msg.clone()),
            ActionError::Busy(_) => Notice::Warning(self.to_string()),
            other => Notice::Error(other.to_string()),
        }
    }
}

/// Actions currently awaiting a server answer.
#[derive(Default)]
struct InFlight {
    actions: Mutex<HashSet<PageAction>>,
}

impl InFlight {
    fn begin(&self, action: PageAction) -> Result<InFlightGuard<'_>, ActionError> {
        let mut actions = self
            .actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !actions.insert(action) {
            return Err(ActionError::Busy(action));
        }
        Ok(InFlightGuard {
            owner: self,
            action,
        })
    }
}

struct InFlightGuard<'a> {
    owner: &'a InFlight,
    action: PageAction,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.action);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    pub protocol: CollectionProtocol,
    pub ad_accounts: bool,
}

/// One platform's dashboard: view state plus the actions bound to it.
pub struct DashboardPage {
    reconciler: SyncReconciler,
    session: Arc<SessionStore>,
    audit: Arc<AuditLogger>,
    view: tokio::sync::Mutex<ViewState>,
    in_flight: InFlight,
    ad_accounts: bool,
}

impl DashboardPage {
    pub fn new(
        platform: Platform,
        backend: Arc<dyn ConfigBackend>,
        session: Arc<SessionStore>,
        audit: Arc<AuditLogger>,
        options: PageOptions,
    ) -> Self {
        Self {
            reconciler: SyncReconciler::new(
                backend,
                platform,
                options.protocol,
                options.ad_accounts,
            ),
            session,
            audit,
            view: tokio::sync::Mutex::new(ViewState::default()),
            in_flight: InFlight::default(),
            ad_accounts: options.ad_accounts,
        }
    }

    pub fn platform(&self) -> Platform {
        self.reconciler.platform()
    }

    pub fn manages_ad_accounts(&self) -> bool {
        self.ad_accounts
    }

    /// Current view state. Gated like every other page operation.
    pub async fn view(&self) -> Result<ViewState, ActionError> {
        self.session.require()?;
        Ok(self.view.lock().await.clone())
    }

    /// First render of the page in this session fetches the config; later
    /// renders reuse the cached view.
    pub async fn ensure_loaded(&self) -> Result<(), ActionError> {
        self.session.require()?;
        let mut view = self.view.lock().await;
        if !view.loaded {
            self.reconciler.load(&mut view).await?;
        }
        Ok(())
    }

    pub async fn refresh(&self) -> Result<Notice, ActionError> {
        self.session.require()?;
        let mut view = self.view.lock().await;
        view.loaded = false;
        self.reconciler.load(&mut view).await?;
        Ok(Notice::Info(format!(
            "Reloaded {} configuration",
            self.platform().title()
        )))
    }

    /// Drops the cached view; the next render fetches again.
    pub async fn invalidate(&self) {
        *self.view.lock().await = ViewState::default();
    }

    pub async fn toggle_auto_pause(&self, enabled: bool) -> Result<Notice, ActionError> {
        let session = self.session.require()?;
        let _guard = self.in_flight.begin(PageAction::ToggleAutoPause)?;
        let mut view = self.view.lock().await;

        let outcome = self.reconciler.set_active(&mut view, enabled).await?;
        self.record(&session, outcome);

        Ok(Notice::Success(format!("Auto Pause set to {}", view.active)))
    }

    pub async fn set_global_threshold(&self, entered: i64) -> Result<Notice, ActionError> {
        let session = self.session.require()?;
        let _guard = self.in_flight.begin(PageAction::SetGlobalThreshold)?;
        let mut view = self.view.lock().await;

        let outcome = self
            .reconciler
            .set_global_threshold(&mut view, entered)
            .await?;
        self.record(&session, outcome);

        Ok(Notice::Success(format!(
            "Updated Active Campaign Profit Value to {}",
            view.alert_profit_threshold
        )))
    }

    pub async fn add_campaign(&self, campaign: &str, entered: i64) -> Result<Notice, ActionError> {
        let session = self.session.require()?;
        let _guard = self.in_flight.begin(PageAction::AddCampaign)?;
        let mut view = self.view.lock().await;

        let outcome = self
            .reconciler
            .upsert_campaign(&mut view, campaign, entered, AuditAction::AddCampaign)
            .await?;
        self.record(&session, outcome);

        Ok(Notice::Success(format!(
            "Campaign `{campaign}` added with value {}",
            stored_value(&view, campaign)
        )))
    }

    pub async fn update_campaign(
        &self,
        campaign: &str,
        entered: i64,
    ) -> Result<Notice, ActionError> {
        let session = self.session.require()?;
        let _guard = self.in_flight.begin(PageAction::UpdateCampaign)?;
        let mut view = self.view.lock().await;

        let outcome = self
            .reconciler
            .upsert_campaign(&mut view, campaign, entered, AuditAction::UpdateCampaign)
            .await?;
        self.record(&session, outcome);

        Ok(Notice::Success(format!(
            "Updated `{campaign}` to {}",
            stored_value(&view, campaign)
        )))
    }

    pub async fn delete_campaign(&self, campaign: &str) -> Result<Notice, ActionError> {
        let session = self.session.require()?;
        let _guard = self.in_flight.begin(PageAction::DeleteCampaign)?;
        let mut view = self.view.lock().await;

        let outcome = self.reconciler.delete_campaign(&mut view, campaign).await?;
        self.record(&session, outcome);

        Ok(Notice::Success(format!("Deleted `{campaign}`")))
    }

    pub async fn add_ad_account(&self, name: &str, id: &str) -> Result<Notice, ActionError> {
        let session = self.session.require()?;
        self.check_ad_accounts()?;
        let _guard = self.in_flight.begin(PageAction::AddAdAccount)?;
        let mut view = self.view.lock().await;

        let outcome = self
            .reconciler
            .upsert_ad_account(&mut view, name, id)
            .await?;
        self.record(&session, outcome);

        Ok(Notice::Success(format!(
            "Ad Account `{}` added successfully.",
            name.trim()
        )))
    }

    pub async fn delete_ad_account(&self, name: &str) -> Result<Notice, ActionError> {
        let session = self.session.require()?;
        self.check_ad_accounts()?;
        let _guard = self.in_flight.begin(PageAction::DeleteAdAccount)?;
        let mut view = self.view.lock().await;

        let outcome = self.reconciler.delete_ad_account(&mut view, name).await?;
        self.record(&session, outcome);

        Ok(Notice::Success(format!(
            "Ad Account `{}` deleted successfully.",
            name.trim()
        )))
    }

    fn check_ad_accounts(&self) -> Result<(), ActionError> {
        if self.ad_accounts {
            Ok(())
        } else {
            Err(ActionError::AdAccountsDisabled(self.platform()))
        }
    }

    fn record(&self, session: &Session, outcome: SyncOutcome) {
        self.audit.record(
            &session.user.id,
            outcome.action,
            outcome.details,
            session.user.email.clone(),
        );
    }
}

fn stored_value(view: &ViewState, campaign: &str) -> String {
    view.campaigns
        .get(campaign)
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(not stored)".to_string())
}

/// Application root: sign-in/out plus one page per platform.
pub struct Dashboard {
    session: Arc<SessionStore>,
    identity: Arc<dyn IdentityProvider>,
    audit: Arc<AuditLogger>,
    snap: DashboardPage,
    meta: DashboardPage,
    activity_limit: i64,
}

impl Dashboard {
    pub fn new(
        backend: Arc<dyn ConfigBackend>,
        identity: Arc<dyn IdentityProvider>,
        audit: Arc<AuditLogger>,
        protocol: CollectionProtocol,
        meta_ad_accounts: bool,
        activity_limit: i64,
    ) -> Self {
        let session = Arc::new(SessionStore::new());

        let snap = DashboardPage::new(
            Platform::Snap,
            Arc::clone(&backend),
            Arc::clone(&session),
            Arc::clone(&audit),
            PageOptions {
                protocol,
                ad_accounts: true,
            },
        );
        let meta = DashboardPage::new(
            Platform::Meta,
            backend,
            Arc::clone(&session),
            Arc::clone(&audit),
            PageOptions {
                protocol,
                ad_accounts: meta_ad_accounts,
            },
        );

        Self {
            session,
            identity,
            audit,
            snap,
            meta,
            activity_limit,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn page(&self, platform: Platform) -> &DashboardPage {
        match platform {
            Platform::Snap => &self.snap,
            Platform::Meta => &self.meta,
        }
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Signs in and opens a session. Bad credentials leave the store empty.
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<Notice, ActionError> {
        let session = self.identity.sign_in(email.trim(), password).await?;
        info!(user_id = %session.user.id, "signed in");

        self.audit.record(
            &session.user.id,
            AuditAction::Login,
            Map::new(),
            session.user.email.clone(),
        );
        let greeting = session
            .user
            .email
            .clone()
            .unwrap_or_else(|| session.user.id.clone());
        self.session.set_session(session);

        Ok(Notice::Success(format!("Logged in successfully! Welcome {greeting}")))
    }

    /// Ends the session locally even when the remote sign-out fails.
    pub async fn logout(&self) -> Result<Notice, ActionError> {
        let session = self.session.require()?;

        self.audit.record(
            &session.user.id,
            AuditAction::Logout,
            Map::new(),
            session.user.email.clone(),
        );
        if let Err(e) = self.identity.sign_out(&session).await {
            warn!(error = %e, "remote sign-out failed");
        }

        self.session.clear_session();
        for platform in Platform::ALL {
            self.page(platform).invalidate().await;
        }
        info!(user_id = %session.user.id, "signed out");

        Ok(Notice::Info("Logged out".to_string()))
    }

    /// Activity view: newest first, login/logout hidden. Pending writes
    /// from this session are flushed first so they show up.
    pub async fn recent_activity(&self) -> Result<Vec<AuditRecord>, ActionError> {
        self.session.require()?;
        self.audit.flush().await;
        Ok(self.audit.list_recent(self.activity_limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditStore, MemoryAuditStore};
    use crate::models::ConfigDocument;
    use crate::test_utils::{FakeConfigBackend, FakeIdentity, Fault};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc;

    struct Harness {
        dashboard: Dashboard,
        backend: Arc<FakeConfigBackend>,
        store: Arc<MemoryAuditStore>,
        identity: Arc<FakeIdentity>,
    }

    fn harness(protocol: CollectionProtocol) -> Harness {
        harness_with(protocol, FakeIdentity::new("ops@example.com", "hunter2"))
    }

    fn harness_with(protocol: CollectionProtocol, identity: FakeIdentity) -> Harness {
        let backend = Arc::new(FakeConfigBackend::with_document(
            Platform::Snap,
            ConfigDocument {
                active: false,
                alert_profit_threshold: 0,
                campaign_loss_thresholds: BTreeMap::new(),
                ad_accounts: None,
            },
        ));
        let store = Arc::new(MemoryAuditStore::new());
        let (notice_tx, _notice_rx) = mpsc::unbounded_channel();
        let audit = Arc::new(AuditLogger::spawn(store.clone(), notice_tx));
        let identity = Arc::new(identity);

        let dashboard = Dashboard::new(
            backend.clone(),
            identity.clone(),
            audit,
            protocol,
            false,
            100,
        );

        Harness {
            dashboard,
            backend,
            store,
            identity,
        }
    }

    fn password(raw: &str) -> SecretString {
        SecretString::from(raw.to_string())
    }

    async fn signed_in(protocol: CollectionProtocol) -> Harness {
        let h = harness(protocol);
        h.dashboard
            .login("ops@example.com", &password("hunter2"))
            .await
            .unwrap();
        h
    }

    /// Audit rows excluding login/logout.
    async fn mutations(h: &Harness) -> Vec<AuditRecord> {
        h.dashboard.audit().flush().await;
        h.dashboard.recent_activity().await.unwrap()
    }

    #[tokio::test]
    async fn pages_are_gated_by_session() {
        let h = harness(CollectionProtocol::Dedicated);
        let page = h.dashboard.page(Platform::Snap);

        assert!(matches!(page.ensure_loaded().await, Err(ActionError::NotSignedIn(_))));
        assert!(matches!(page.toggle_auto_pause(true).await, Err(ActionError::NotSignedIn(_))));
        assert!(matches!(
            h.dashboard.recent_activity().await,
            Err(ActionError::NotSignedIn(_))
        ));
        assert_eq!(h.backend.request_count(), 0);
    }

    #[tokio::test]
    async fn bad_credentials_do_not_open_a_session() {
        let h = harness(CollectionProtocol::Dedicated);

        let err = h
            .dashboard
            .login("ops@example.com", &password("wrong"))
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::Identity(IdentityError::Auth(_))));
        assert!(h.dashboard.session().get_session().is_none());
        h.dashboard.audit().flush().await;
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn enabling_auto_pause_records_one_audit_row() {
        let h = signed_in(CollectionProtocol::Dedicated).await;
        let page = h.dashboard.page(Platform::Snap);
        page.ensure_loaded().await.unwrap();
        assert!(!page.view().await.unwrap().active);

        page.toggle_auto_pause(true).await.unwrap();

        assert!(page.view().await.unwrap().active);
        let rows = mutations(&h).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "toggle_auto_pause");
        assert_eq!(rows[0].details["new_value"], json!(true));
        assert_eq!(rows[0].email.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn campaign_add_then_delete_twice() {
        for protocol in [CollectionProtocol::Dedicated, CollectionProtocol::WholeMap] {
            let h = signed_in(protocol).await;
            let page = h.dashboard.page(Platform::Snap);
            page.ensure_loaded().await.unwrap();

            page.add_campaign("summer_sale", 50).await.unwrap();
            assert_eq!(
                page.view().await.unwrap().campaigns,
                BTreeMap::from([("summer_sale".to_string(), -50)])
            );

            page.delete_campaign("summer_sale").await.unwrap();
            assert!(page.view().await.unwrap().campaigns.is_empty());

            page.delete_campaign("summer_sale").await.unwrap();
            assert!(page.view().await.unwrap().campaigns.is_empty());

            let actions: Vec<String> = mutations(&h).await.into_iter().map(|r| r.action).collect();
            assert_eq!(actions, vec!["delete_campaign", "delete_campaign", "add_campaign"]);
        }
    }

    #[tokio::test]
    async fn failed_mutations_write_no_audit_rows() {
        let h = signed_in(CollectionProtocol::WholeMap).await;
        let page = h.dashboard.page(Platform::Snap);
        page.ensure_loaded().await.unwrap();
        let before = page.view().await.unwrap();

        h.backend.fail_next(Fault::Unreachable);
        assert!(page.add_campaign("c", 1).await.is_err());
        h.backend.fail_writes(Fault::Server(500, "database locked"));
        let err = page.set_global_threshold(5).await.unwrap_err();
        assert_eq!(err.to_string(), "API Error: database locked");
        assert!(matches!(
            page.add_campaign("", 1).await.unwrap_err().to_notice(),
            Notice::Warning(_)
        ));

        assert_eq!(page.view().await.unwrap(), before);
        assert!(mutations(&h).await.is_empty());
    }

    #[tokio::test]
    async fn update_campaign_normalizes_and_is_audited_as_update() {
        let h = signed_in(CollectionProtocol::Dedicated).await;
        let page = h.dashboard.page(Platform::Snap);
        page.add_campaign("c", -10).await.unwrap();

        let notice = page.update_campaign("c", 25).await.unwrap();

        assert_eq!(notice, Notice::Success("Updated `c` to -25".to_string()));
        let rows = mutations(&h).await;
        assert_eq!(rows[0].action, "update_campaign");
        assert_eq!(rows[0].details["value"], json!(-25));
    }

    #[tokio::test]
    async fn meta_page_without_ad_accounts_rejects_before_network() {
        let h = signed_in(CollectionProtocol::Dedicated).await;
        let page = h.dashboard.page(Platform::Meta);
        let requests = h.backend.request_count();

        let err = page.add_ad_account("main", "act_1").await.unwrap_err();

        assert!(matches!(err, ActionError::AdAccountsDisabled(Platform::Meta)));
        assert_eq!(h.backend.request_count(), requests);
    }

    #[tokio::test]
    async fn snap_page_manages_ad_accounts() {
        let h = signed_in(CollectionProtocol::Dedicated).await;
        let page = h.dashboard.page(Platform::Snap);

        page.add_ad_account(" main ", "act_1").await.unwrap();
        assert_eq!(page.view().await.unwrap().ad_accounts["main"], "act_1");
        page.delete_ad_account("main").await.unwrap();
        assert!(page.view().await.unwrap().ad_accounts.is_empty());

        let actions: Vec<String> = mutations(&h).await.into_iter().map(|r| r.action).collect();
        assert_eq!(actions, vec!["delete_ad_account", "add_ad_account"]);
    }

    #[tokio::test]
    async fn concurrent_double_submit_is_rejected() {
        let h = signed_in(CollectionProtocol::Dedicated).await;
        let page = h.dashboard.page(Platform::Snap);

        let (first, second) = tokio::join!(page.toggle_auto_pause(true), page.toggle_auto_pause(true));

        assert!(first.is_ok());
        assert!(matches!(second, Err(ActionError::Busy(PageAction::ToggleAutoPause))));
        assert_eq!(mutations(&h).await.len(), 1);

        // Guard released once the first request resolved.
        page.toggle_auto_pause(false).await.unwrap();
    }

    #[tokio::test]
    async fn load_happens_once_per_session() {
        let h = signed_in(CollectionProtocol::Dedicated).await;
        let page = h.dashboard.page(Platform::Snap);

        page.ensure_loaded().await.unwrap();
        let after_first = h.backend.request_count();
        page.ensure_loaded().await.unwrap();
        assert_eq!(h.backend.request_count(), after_first);

        page.refresh().await.unwrap();
        assert!(h.backend.request_count() > after_first);
    }

    #[tokio::test]
    async fn logout_clears_session_and_views() {
        let h = signed_in(CollectionProtocol::Dedicated).await;
        let page = h.dashboard.page(Platform::Snap);
        page.toggle_auto_pause(true).await.unwrap();

        h.dashboard.logout().await.unwrap();

        assert!(h.dashboard.session().get_session().is_none());
        assert_eq!(h.identity.sign_out_count(), 1);
        assert!(matches!(page.view().await, Err(ActionError::NotSignedIn(_))));

        h.dashboard
            .login("ops@example.com", &password("hunter2"))
            .await
            .unwrap();
        assert!(!page.view().await.unwrap().loaded);

        h.dashboard.audit().flush().await;
        // login, toggle, logout, login: all stored, only the toggle displayed.
        assert_eq!(h.store.len(), 4);
        assert_eq!(mutations(&h).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_remote_sign_out_still_ends_the_session() {
        let h = harness_with(
            CollectionProtocol::Dedicated,
            FakeIdentity::new("ops@example.com", "hunter2").failing_sign_out(),
        );
        h.dashboard
            .login("ops@example.com", &password("hunter2"))
            .await
            .unwrap();
        let page = h.dashboard.page(Platform::Snap);
        page.ensure_loaded().await.unwrap();
        assert!(page.view().await.unwrap().loaded);

        let notice = h.dashboard.logout().await.unwrap();

        assert_eq!(notice, Notice::Info("Logged out".to_string()));
        assert_eq!(h.identity.sign_out_count(), 1);
        assert!(h.dashboard.session().get_session().is_none());
        assert!(matches!(page.view().await, Err(ActionError::NotSignedIn(_))));

        h.dashboard.audit().flush().await;
        let stored = h.store.recent(10, &[]).await.unwrap();
        assert_eq!(stored[0].action, "logout");
        assert_eq!(stored[0].user_id, "user-1");

        h.dashboard
            .login("ops@example.com", &password("hunter2"))
            .await
            .unwrap();
        assert!(!page.view().await.unwrap().loaded);
    }
}
