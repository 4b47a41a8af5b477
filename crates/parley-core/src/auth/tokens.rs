use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Report the access token as expiring this long before its recorded expiry.
const TOKEN_REFRESH_BUFFER_SECS: i64 = 60;

/// An access/refresh token pair.
///
/// Both tokens are always non-empty: the constructors refuse partial pairs, and
/// pairs read back from storage are checked with [`CredentialPair::is_complete`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    access_token: String,
    refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
}

impl CredentialPair {
    /// Returns `None` if either token is empty.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Option<Self> {
        let pair = Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expiry: None,
        };
        pair.is_complete().then_some(pair)
    }

    /// Record an expiry `expires_in` seconds from now.
    pub fn expiring_in(mut self, expires_in: Option<i64>) -> Self {
        self.expiry = expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
        self
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn is_complete(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.refresh_token.trim().is_empty()
    }

    /// False when the server never told us an expiry.
    pub fn is_expired(&self) -> bool {
        self.expiry.map(|expiry| Utc::now() >= expiry).unwrap_or(false)
    }

    /// Check if the access token will expire soon. Informational only: requests
    /// keep using the token until the server rejects it.
    pub fn needs_refresh(&self) -> bool {
        self.expiry
            .map(|expiry| Utc::now() + Duration::seconds(TOKEN_REFRESH_BUFFER_SECS) >= expiry)
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}
