use crate::constants::{API_KEY_HEADER, AUTH_LOGOUT_PATH, AUTH_TOKEN_PATH};
use crate::models::{Session, User};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Login failed: {0}")]
    Auth(String),
    #[error("Request failed: {0}")]
    Unreachable(String),
    #[error("Identity service error: {body}")]
    Server { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &SecretString)
        -> Result<Session, IdentityError>;

    async fn sign_out(&self, session: &Session) -> Result<(), IdentityError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: User,
}

#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

/// Password sign-in against a hosted Supabase-compatible auth service.
pub struct SupabaseAuth {
    client: Client,
    base_url: String,
    anon_key: SecretString,
}

impl SupabaseAuth {
    pub fn new(
        base_url: &str,
        anon_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    fn auth_message(body: &str) -> String {
        let parsed: AuthErrorBody = serde_json::from_str(body).unwrap_or_default();
        parsed
            .error_description
            .or(parsed.msg)
            .or(parsed.message)
            .unwrap_or_else(|| body.to_string())
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, IdentityError> {
        let url = format!("{}{}", self.base_url, AUTH_TOKEN_PATH);

        let response = self
            .client
            .post(&url)
            .query(&[("grant_type", "password")])
            .header(API_KEY_HEADER, self.anon_key.expose_secret())
            .json(&json!({
                "email": email,
                "password": password.expose_secret(),
            }))
            .send()
            .await
            .map_err(|e| IdentityError::Unreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IdentityError::Unreachable(e.to_string()))?;

        match status {
            s if s.is_success() => {
                let token: TokenResponse = serde_json::from_str(&body)
                    .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
                Ok(Session {
                    user: token.user,
                    access_token: SecretString::from(token.access_token),
                })
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(IdentityError::Auth(Self::auth_message(&body)))
            }
            s => Err(IdentityError::Server {
                status: s.as_u16(),
                body,
            }),
        }
    }

    async fn sign_out(&self, session: &Session) -> Result<(), IdentityError> {
        let url = format!("{}{}", self.base_url, AUTH_LOGOUT_PATH);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.anon_key.expose_secret())
            .bearer_auth(session.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| IdentityError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(IdentityError::Server { status, body });
        }

        Ok(())
    }
}
