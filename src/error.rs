//! Typed error hierarchy for the apim-provision crate.
//!
//! Every variant maps to a real failure boundary:
//! - `Auth` covers the Azure AD token endpoint (login and token fetch).
//! - `Api` covers the API Management REST API and keeps the response body,
//!   which carries ARM's `error.code` / `error.message` diagnostics.
//! - `Precondition` covers input that is rejected before any mutation is
//!   attempted (malformed user record, product that cannot be resolved).
//! - `GroupSync` covers a group synchronisation that stopped part-way and
//!   reports which memberships were already applied.
//!
//! "Not found" is deliberately absent: lookups return `Ok(None)` instead.

use reqwest::StatusCode;

/// Unified error type for all apim-provision operations.
#[derive(Debug, thiserror::Error)]
pub enum ApimError {
    /// Authentication failure while logging in or fetching a token.
    ///
    /// Never retried at this layer. `message` includes the HTTP status and
    /// the Azure AD error body (AADSTS codes) when one was returned.
    #[error("authentication failed: {message}")]
    Auth {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying transport or parse error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The management API returned a non-success HTTP status code.
    #[error("API error {status}: {body}")]
    Api {
        /// The HTTP status code returned by the management API.
        status: StatusCode,
        /// The raw response body text, or an empty string if unreadable.
        body: String,
    },

    /// The operation was rejected before any call was attempted, or a
    /// resource it depends on could not be resolved.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A group membership write failed part-way through a synchronisation.
    ///
    /// Memberships in `added` were applied before the failure and are not
    /// rolled back. Groups after `group` were never attempted.
    #[error("adding user to group {group} failed after adding {added:?}: {source}")]
    GroupSync {
        /// Groups successfully added before the failure, in order.
        added: Vec<String>,
        /// The group whose membership write failed.
        group: String,
        /// The error returned by the failing call.
        #[source]
        source: Box<ApimError>,
    },

    /// The configuration file could not be read or parsed.
    #[error("invalid configuration: {message}")]
    Config {
        /// Which file or field was at fault.
        message: String,
        /// The underlying I/O or TOML error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// JSON deserialization of a response body failed.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Transport-level failure (DNS, TCP, TLS, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ApimError {
    /// Returns `true` if this is an API error with status 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApimError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, ApimError>;
