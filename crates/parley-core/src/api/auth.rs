//! Client for the authentication endpoints.
//!
//! These calls never go through the request interceptor: they carry their own
//! credentials (form login, refresh token in the body) and a 401 from them is
//! an answer, not a reason to refresh.

use anyhow::Result;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::CredentialPair;
use crate::config::Config;
use crate::models::{CreatedAccount, NewAccount, UserProfile};

use super::AuthError;

const PROFILE_PATH: &str = "/api/users/me";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_pair(self) -> Result<CredentialPair, AuthError> {
        if let Some(ref kind) = self.token_type {
            if !kind.eq_ignore_ascii_case("bearer") {
                debug!(token_type = %kind, "Unexpected token type");
            }
        }
        let expires_in = self.expires_in;
        CredentialPair::new(self.access_token, self.refresh_token)
            .map(|pair| pair.expiring_in(expires_in))
            .ok_or_else(|| AuthError::InvalidResponse("Server returned an incomplete token pair".to_string()))
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Absolute URLs of the authentication endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub token: String,
    pub register: String,
    pub refresh: String,
    pub profile: String,
}

impl AuthEndpoints {
    pub fn from_config(config: &Config) -> Self {
        let auth_base = config.auth_base_url();
        Self {
            token: format!("{}/token", auth_base),
            register: format!("{}/register", auth_base),
            refresh: format!("{}/refresh", auth_base),
            profile: format!("{}{}", config.api_base_url(), PROFILE_PATH),
        }
    }
}

/// Authentication API client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthApi {
    client: Client,
    endpoints: AuthEndpoints,
}

impl AuthApi {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(client, AuthEndpoints::from_config(config)))
    }

    /// Build on an existing client, sharing its connection pool.
    pub fn with_client(client: Client, endpoints: AuthEndpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Exchange a username and password for a credential pair.
    ///
    /// The token endpoint only accepts form-encoded bodies.
    pub async fn request_token(&self, username: &str, password: &str) -> Result<CredentialPair, AuthError> {
        let response = self
            .client
            .post(&self.endpoints.token)
            .header(header::ACCEPT, "application/json")
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, "Login rejected");
            return Err(AuthError::from_login_status(status, &body));
        }

        let tokens: TokenResponse = response.json().await?;
        tokens.into_pair()
    }

    pub async fn register(&self, account: &NewAccount) -> Result<CreatedAccount, AuthError> {
        let response = self
            .client
            .post(&self.endpoints.register)
            .json(account)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, "Registration rejected");
            return Err(AuthError::from_register_status(status, &body));
        }

        Ok(response.json().await?)
    }

    /// Trade a refresh token for a new pair. Any non-success status means the
    /// refresh token is no good.
    pub async fn exchange_refresh(&self, refresh_token: &str) -> Result<CredentialPair, AuthError> {
        let response = self
            .client
            .post(&self.endpoints.refresh)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = %status, "Refresh rejected");
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
            });
        }

        let tokens: TokenResponse = response.json().await?;
        tokens.into_pair()
    }

    pub async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let response = self
            .client
            .get(&self.endpoints.profile)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::from_profile_status(status, &body));
        }

        Ok(response.json().await?)
    }
}
