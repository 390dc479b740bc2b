//! Async Rust client library for Azure API Management provisioning.
//!
//! Wraps the API Management management API (Azure Resource Manager) for the
//! user/group/subscription workflow: resolve a user by email, bind them to a
//! product with an active subscription, rotate subscription keys, and bring
//! their group memberships up to a desired set.
//!
//! # Modules
//!
//! - [`auth`]: Azure AD login, credentials, and the injected token cache.
//! - [`client`]: Authenticated HTTP wrapper scoped to one service instance.
//! - [`config`]: TOML configuration for tenant and service scope.
//! - [`error`]: Typed error hierarchy (`ApimError`).
//! - [`groups`]: Group membership synchronisation.
//! - [`subscriptions`]: Subscription lookup, activation and key rotation.
//! - [`users`]: Directory lookup.
//!
//! # Quick Start
//!
//! ```ignore
//! use apim_provision::auth::{ClientSecretAuth, TokenCache, MANAGEMENT_SCOPE};
//! use apim_provision::client::ApimClient;
//! use apim_provision::config::ApimConfig;
//! use apim_provision::{subscriptions, users};
//!
//! let config = ApimConfig::from_file("apim.toml".as_ref())?;
//! let auth = ClientSecretAuth::new(&config.tenant_id, &config.client_id, &secret, MANAGEMENT_SCOPE);
//! let client = ApimClient::new(TokenCache::new(auth), &config)?;
//! if let Some(user) = users::find_user_by_email(&client, "ada@contoso.com").await? {
//!     subscriptions::add_user_subscription_to_product(&client, &user.name, "starter").await?;
//! }
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod groups;
pub mod subscriptions;
pub mod users;
