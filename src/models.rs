use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Ad platform a configuration document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Snap,
    Meta,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Snap, Platform::Meta];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Snap => "snap",
            Platform::Meta => "meta",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Platform::Snap => "Snap",
            Platform::Meta => "Meta",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "snap" => Ok(Platform::Snap),
            "meta" => Ok(Platform::Meta),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Server-held auto-pause configuration for one platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub alert_profit_threshold: i64,
    #[serde(default)]
    pub campaign_loss_thresholds: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_accounts: Option<BTreeMap<String, String>>,
}

/// Subset of a [`ConfigDocument`]. Used both as a write payload and as the
/// (possibly partial) echo the server answers a write with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_profit_threshold: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_loss_thresholds: Option<BTreeMap<String, i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_accounts: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct CampaignUpsert<'a> {
    pub campaign: &'a str,
    pub threshold: i64,
}

#[derive(Debug, Serialize)]
pub struct CampaignRemoval<'a> {
    pub campaign: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AdAccountUpsert<'a> {
    pub ad_account_name: &'a str,
    pub ad_account_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AdAccountRemoval<'a> {
    pub ad_account_name: &'a str,
}

/// Profit/loss thresholds are always stored as losses: `-abs(value)`.
pub fn normalize_loss(value: i64) -> i64 {
    if value > 0 {
        -value
    } else {
        value
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug)]
pub struct Session {
    pub user: User,
    pub access_token: SecretString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    Logout,
    ToggleAutoPause,
    UpdateGlobalThreshold,
    AddCampaign,
    UpdateCampaign,
    DeleteCampaign,
    AddAdAccount,
    DeleteAdAccount,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::ToggleAutoPause => "toggle_auto_pause",
            AuditAction::UpdateGlobalThreshold => "update_global_threshold",
            AuditAction::AddCampaign => "add_campaign",
            AuditAction::UpdateCampaign => "update_campaign",
            AuditAction::DeleteCampaign => "delete_campaign",
            AuditAction::AddAdAccount => "add_ad_account",
            AuditAction::DeleteAdAccount => "delete_ad_account",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry as submitted; `created_at` is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditRecord {
    pub user_id: String,
    pub email: Option<String>,
    pub action: AuditAction,
    pub details: Map<String, Value>,
}

/// Audit entry as read back. `action` stays a plain string since the store
/// may hold names this build does not know.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub user_id: String,
    pub email: Option<String>,
    pub action: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// Feedback shown to the user after an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Success(String),
    Info(String),
    Warning(String),
    Error(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Success(msg) => write!(f, "✅ {msg}"),
            Notice::Info(msg) => write!(f, "ℹ️ {msg}"),
            Notice::Warning(msg) => write!(f, "⚠️ {msg}"),
            Notice::Error(msg) => write!(f, "❌ {msg}"),
        }
    }
}
