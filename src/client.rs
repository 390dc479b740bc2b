//! Authenticated HTTP client for the API Management management API.
//!
//! `ApimClient` wraps a `reqwest::Client`, the service base URL and an
//! injected [`TokenCache`], and exposes JSON request helpers scoped to one
//! API Management instance. Every request gets the `api-version` query
//! parameter appended.
//!
//! Token lifecycle:
//! - The first request logs in through the cache; later requests reuse the
//!   cached credential until it expires.
//! - One-shot 401 retry: if ARM rejects the token before our local expiry
//!   check noticed (revocation, clock skew), the cached credential is
//!   dropped, a fresh one fetched, and the request sent exactly once more.
//!   A second 401 is returned to the caller as an `Api` error.

use std::borrow::Cow;
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::auth::TokenCache;
use crate::config::ApimConfig;
use crate::error::{ApimError, Result};

/// Covers TCP + TLS handshake only.
const API_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Full round-trip for a single management call.
const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn build_api_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(API_CONNECT_TIMEOUT)
        .timeout(API_REQUEST_TIMEOUT)
        .build()?)
}

/// Authenticated client for one API Management service instance.
///
/// `base_url` is the service resource URL with a trailing `/`; all helper
/// paths are relative to it.
pub struct ApimClient {
    client: Client,
    base_url: String,
    api_version: String,
    auth: TokenCache,
}

/// Percent-encodes a caller-supplied id for use as one path segment.
///
/// `/`, `?` and `#` are escaped so the id cannot leave its segment. Empty
/// ids and the dot segments `.` and `..` are rejected, since URL
/// normalisation would otherwise resolve them against the parent path.
pub fn path_segment(id: &str) -> Result<Cow<'_, str>> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(ApimError::Precondition(format!(
            "{id:?} is not a usable resource id"
        )));
    }
    Ok(urlencoding::encode(id))
}

impl ApimClient {
    /// Builds a client for the service named in `config`.
    pub fn new(auth: TokenCache, config: &ApimConfig) -> Result<Self> {
        Self::build(auth, config.service_url(), config.api_version.clone())
    }

    /// Builds a client against an arbitrary base URL, used by tests to point
    /// at a mock server. Uses the default API version.
    pub fn with_base_url(auth: TokenCache, base_url: &str) -> Result<Self> {
        Self::build(
            auth,
            base_url.to_string(),
            crate::config::DEFAULT_API_VERSION.to_string(),
        )
    }

    fn build(auth: TokenCache, base_url: String, api_version: String) -> Result<Self> {
        Ok(ApimClient {
            client: build_api_client()?,
            base_url,
            api_version,
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        let separator = if path.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}api-version={}",
            self.base_url, path, separator, self.api_version
        )
    }

    /// Sends an authenticated request and returns the response once its
    /// status is known to be a success.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response> {
        let url = self.url(path);
        debug!(%method, path, "management request");

        let credential = self.auth.credential().await?;
        let resp = self
            .build_request(method.clone(), &url, &credential.token, body)
            .send()
            .await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            debug!(path, "token rejected, refreshing once");
            self.auth.invalidate().await;
            let fresh = self.auth.credential().await?;
            let retry = self
                .build_request(method, &url, &fresh.token, body)
                .send()
                .await?;
            return check_status(retry).await;
        }

        check_status(resp).await
    }

    fn build_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&B>,
    ) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url).bearer_auth(token);
        if let Some(payload) = body {
            req = req.json(payload);
        }
        req
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let resp = self.send(method, path, body).await?;
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Sends an authenticated GET and deserializes the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json::<T, ()>(Method::GET, path, None).await
    }

    /// Like [`get`](Self::get), but maps a 404 to `Ok(None)`.
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sends an authenticated PUT with a JSON body and deserializes the
    /// response.
    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::PUT, path, Some(body)).await
    }

    /// Sends an authenticated PATCH with a JSON body. ARM answers PATCH with
    /// 204 for API Management resources, so the body is discarded.
    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.send(Method::PATCH, path, Some(body)).await?;
        Ok(())
    }

    /// Sends an authenticated PUT with no body, discarding the response.
    pub async fn put_empty(&self, path: &str) -> Result<()> {
        self.send::<()>(Method::PUT, path, None).await?;
        Ok(())
    }

    /// Sends an authenticated POST with no body and deserializes the JSON
    /// response. Used for ARM actions that return data, such as
    /// `listSecrets`.
    pub async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json::<T, ()>(Method::POST, path, None).await
    }

    /// Sends an authenticated POST with no body, discarding the response.
    pub async fn post_empty(&self, path: &str) -> Result<()> {
        self.send::<()>(Method::POST, path, None).await?;
        Ok(())
    }
}

/// Converts a non-success status into `ApimError::Api`, keeping the body.
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApimError::Api { status, body })
}
