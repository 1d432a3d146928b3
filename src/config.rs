use crate::constants::{
    DEFAULT_ACTIVITY_LIMIT, DEFAULT_CONFIG_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use crate::sync::CollectionProtocol;
use dotenv::dotenv;
use secrecy::SecretString;
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug)]
pub struct Config {
    pub config_api_base_url: String,
    pub identity_url: String,
    pub identity_anon_key: SecretString,
    pub database_url: Option<String>,
    pub request_timeout: Duration,
    pub collection_protocol: CollectionProtocol,
    pub meta_ad_accounts: bool,
    pub activity_limit: i64,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    MissingEnv(String),
    #[error("Invalid URL in {name}: {reason}")]
    InvalidUrl { name: String, reason: String },
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
        };

        let config_api_base_url = validated_url(
            "CONFIG_API_BASE_URL",
            lookup("CONFIG_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CONFIG_API_BASE_URL.to_string()),
        )?;
        let identity_url = validated_url("SUPABASE_URL", required("SUPABASE_URL")?)?;
        let identity_anon_key = SecretString::from(required("SUPABASE_ANON_KEY")?);

        let database_url = match lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            Some(raw) => {
                // Validate the URL format
                Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
                    name: "DATABASE_URL".to_string(),
                    reason: e.to_string(),
                })?;
                Some(raw)
            }
            None => None,
        };

        let timeout_secs = parse_or("REQUEST_TIMEOUT_SECS", &lookup, DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "REQUEST_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
            });
        }

        let activity_limit = parse_or("ACTIVITY_LIMIT", &lookup, DEFAULT_ACTIVITY_LIMIT)?;
        if activity_limit < 1 {
            return Err(ConfigError::InvalidValue {
                name: "ACTIVITY_LIMIT".to_string(),
                value: activity_limit.to_string(),
            });
        }

        let collection_protocol = match lookup("CONFIG_COLLECTION_PROTOCOL") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: "CONFIG_COLLECTION_PROTOCOL".to_string(),
                value: raw,
            })?,
            None => CollectionProtocol::default(),
        };

        Ok(Self {
            config_api_base_url,
            identity_url,
            identity_anon_key,
            database_url,
            request_timeout: Duration::from_secs(timeout_secs),
            collection_protocol,
            meta_ad_accounts: parse_or("META_AD_ACCOUNTS", &lookup, false)?,
            activity_limit,
        })
    }
}

fn validated_url(name: &str, raw: String) -> Result<String, ConfigError> {
    Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    Ok(raw.trim_end_matches('/').to_string())
}

fn parse_or<T, F>(name: &str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}
