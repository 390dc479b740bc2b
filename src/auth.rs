//! Azure AD authentication and the credential cache.
//!
//! Obtaining a bearer token is a two-step exchange behind the
//! [`AuthProvider`] trait: `login()` resolves who is asking and where, then
//! `get_token()` turns that into a [`Credential`]. [`TokenCache`] holds the
//! last credential and only goes back to the provider when it has expired.
//!
//! The cache is an ordinary value injected into
//! [`ApimClient`](crate::client::ApimClient); there is no process-global
//! token state.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ApimError, Result};

/// Azure AD public-cloud login host.
pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com/";

/// Scope for Azure Resource Manager, which fronts the API Management
/// management API.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Subtracted from `expires_in` so a token is replaced before Azure AD
/// starts rejecting it.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Lifetime given to tokens handed out by [`StaticToken`].
const STATIC_TOKEN_LIFETIME_SECS: i64 = 3600;

// ── Credentials ──────────────────────────────────────────────────────

/// A bearer token and the instant it stops being usable.
///
/// A credential is valid while `expires_on > now`. Expired credentials are
/// replaced wholesale, never patched.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Opaque bearer token.
    pub token: String,
    /// Expiry, already adjusted for the refresh buffer.
    pub expires_on: DateTime<Utc>,
}

impl Credential {
    /// Creates a credential from a token and its expiry.
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Credential {
            token: token.into(),
            expires_on,
        }
    }

    /// Returns `true` while the expiry is still in the future.
    pub fn is_valid(&self) -> bool {
        self.expires_on > Utc::now()
    }
}

// Tokens end up in logs via `{:?}` far too easily.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Result of the login step: the authority to ask and what to ask it for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCredential {
    /// Full URL of the token endpoint.
    pub authority: String,
    /// Application (client) ID the token is issued to.
    pub client_id: String,
    /// Resource scope requested.
    pub scope: String,
}

/// Source of credentials for the [`TokenCache`].
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Establishes the identity that tokens will be requested for.
    async fn login(&self) -> Result<LoginCredential>;

    /// Fetches a fresh credential for a completed login.
    async fn get_token(&self, login: &LoginCredential) -> Result<Credential>;
}

// ── Client-credentials provider ──────────────────────────────────────

/// Form body sent to the token endpoint.
#[derive(Serialize)]
pub struct TokenRequest<'a> {
    client_id: &'a str,
    scope: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

/// Subset of the Azure AD token response that we need. Extra fields such as
/// `ext_expires_in` are ignored.
#[derive(Deserialize)]
pub struct TokenResponse {
    /// The bearer token.
    pub access_token: String,
    /// Always `"Bearer"` for this grant.
    pub token_type: String,
    /// Lifetime in seconds from issue.
    pub expires_in: i64,
}

/// Service-principal login using the OAuth2 client-credentials grant
/// against the Azure AD v2.0 endpoint.
pub struct ClientSecretAuth {
    client: reqwest::Client,
    login_url: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl ClientSecretAuth {
    /// Creates a provider for the public Azure cloud.
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str, scope: &str) -> Self {
        ClientSecretAuth {
            client: reqwest::Client::new(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: scope.to_string(),
        }
    }

    /// Overrides the login host (sovereign clouds, or a mock server in
    /// tests). Must end with `/`.
    pub fn with_login_url(mut self, login_url: &str) -> Self {
        self.login_url = login_url.to_string();
        self
    }

    fn token_url(&self) -> String {
        format!("{}{}/oauth2/v2.0/token", self.login_url, self.tenant_id)
    }
}

#[async_trait]
impl AuthProvider for ClientSecretAuth {
    async fn login(&self) -> Result<LoginCredential> {
        if self.tenant_id.is_empty() || self.client_id.is_empty() || self.client_secret.is_empty()
        {
            return Err(ApimError::Auth {
                message: "tenant id, client id and client secret are all required".to_string(),
                source: None,
            });
        }
        Ok(LoginCredential {
            authority: self.token_url(),
            client_id: self.client_id.clone(),
            scope: self.scope.clone(),
        })
    }

    /// Posts the client-credentials form to the login authority.
    ///
    /// The body is read as text before the status check so a failure keeps
    /// Azure AD's AADSTS diagnostics.
    async fn get_token(&self, login: &LoginCredential) -> Result<Credential> {
        let form = TokenRequest {
            client_id: &login.client_id,
            scope: &login.scope,
            client_secret: &self.client_secret,
            grant_type: "client_credentials",
        };

        let response = self
            .client
            .post(&login.authority)
            .form(&form)
            .send()
            .await
            .map_err(|e| ApimError::Auth {
                message: "token request could not be sent".to_string(),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ApimError::Auth {
            message: "token response could not be read".to_string(),
            source: Some(Box::new(e)),
        })?;

        if !status.is_success() {
            return Err(ApimError::Auth {
                message: format!("token request failed ({status}): {body}"),
                source: None,
            });
        }

        let resp: TokenResponse = serde_json::from_str(&body).map_err(|e| ApimError::Auth {
            message: "failed to parse token response".to_string(),
            source: Some(Box::new(e)),
        })?;

        let lifetime = (resp.expires_in - EXPIRY_BUFFER_SECS).max(0);
        let expires_on = Utc::now() + Duration::seconds(lifetime);
        debug!(%expires_on, "acquired management token");

        Ok(Credential::new(resp.access_token, expires_on))
    }
}

// ── Static provider ──────────────────────────────────────────────────

/// Hands out a fixed token, valid for an hour from each fetch.
///
/// Used by tests and by callers that already hold a bearer token (for
/// example from `az account get-access-token`).
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Wraps an existing bearer token.
    pub fn new(token: &str) -> Self {
        StaticToken {
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn login(&self) -> Result<LoginCredential> {
        Ok(LoginCredential {
            authority: "static".to_string(),
            client_id: String::new(),
            scope: String::new(),
        })
    }

    async fn get_token(&self, _login: &LoginCredential) -> Result<Credential> {
        Ok(Credential::new(
            self.token.clone(),
            Utc::now() + Duration::seconds(STATIC_TOKEN_LIFETIME_SECS),
        ))
    }
}

// ── Cache ────────────────────────────────────────────────────────────

/// Holds the last credential obtained from an [`AuthProvider`].
///
/// The mutex is held only for the check-and-refresh, never across a
/// management API call.
pub struct TokenCache {
    provider: Box<dyn AuthProvider>,
    cached: Mutex<Option<Credential>>,
}

impl TokenCache {
    /// Creates an empty cache; the first [`credential`](Self::credential)
    /// call logs in.
    pub fn new(provider: impl AuthProvider + 'static) -> Self {
        TokenCache {
            provider: Box::new(provider),
            cached: Mutex::new(None),
        }
    }

    /// Shorthand for a cache over [`StaticToken`].
    pub fn with_token(token: &str) -> Self {
        TokenCache::new(StaticToken::new(token))
    }

    /// Returns `existing` untouched if it is still valid. Otherwise logs in
    /// and fetches a new credential. Provider failures propagate unretried.
    pub async fn ensure_valid_credential(
        &self,
        existing: Option<Credential>,
    ) -> Result<Credential> {
        if let Some(credential) = existing {
            if credential.is_valid() {
                return Ok(credential);
            }
            debug!(expired_on = %credential.expires_on, "credential expired");
        }

        let login = self.provider.login().await?;
        self.provider.get_token(&login).await
    }

    /// Returns the cached credential, replacing it first if it is missing
    /// or expired.
    pub async fn credential(&self) -> Result<Credential> {
        let mut cached = self.cached.lock().await;
        let credential = self.ensure_valid_credential(cached.take()).await?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Drops the cached credential so the next call logs in again.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
