// API Base URLs
pub const DEFAULT_CONFIG_API_BASE_URL: &str = "https://gfcomp.pro";

// Config API paths
pub const CONFIG_PATH: &str = "/config";
pub const CAMPAIGNS_PATH: &str = "/config/campaigns";
pub const AD_ACCOUNTS_PATH: &str = "/config/adaccounts";

// Identity service paths
pub const AUTH_TOKEN_PATH: &str = "/auth/v1/token";
pub const AUTH_LOGOUT_PATH: &str = "/auth/v1/logout";

// Headers
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const API_KEY_HEADER: &str = "apikey";

// Request Settings
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DATABASE_CONNECT_TIMEOUT_SECS: u64 = 5;

// Audit log
pub const AUDIT_TABLE: &str = "logs";
pub const DEFAULT_ACTIVITY_LIMIT: i64 = 200;
pub const HIDDEN_ACTIVITY_ACTIONS: [&str; 2] = ["login", "logout"];
