//! Subscription management: binding users to products.
//!
//! | Function | API Path |
//! |----------|----------|
//! | [`get_user_subscription`] | GET `subscriptions/{sid}`, POST `subscriptions/{sid}/listSecrets` |
//! | [`list_user_subscriptions`] | GET `users/{uid}/subscriptions` |
//! | [`regenerate_primary_key`] | POST `subscriptions/{sid}/regeneratePrimaryKey` |
//! | [`regenerate_secondary_key`] | POST `subscriptions/{sid}/regenerateSecondaryKey` |
//! | [`add_user_subscription_to_product`] | GET `products/{pid}`, PUT `subscriptions/{ulid}` |
//! | [`cancel_user_subscription`] | PATCH `subscriptions/{sid}` |
//!
//! ## Ownership
//!
//! Every lookup by subscription id is also an authorization check: a
//! subscription owned by another user is reported as absent. Mutating
//! operations run that check first and never touch a subscription that
//! fails it.
//!
//! ## Keys
//!
//! A subscription GET never carries keys. [`get_user_subscription`] fills
//! `primaryKey`/`secondaryKey` from `listSecrets` once ownership is
//! confirmed, so keys are only read for subscriptions the caller owns.
//! Listed subscriptions come back without keys.
//!
//! ## Path segments
//!
//! Subscription, user and product ids are percent-encoded with
//! [`path_segment`] before they are placed in a request path.
//!
//! ## Re-fetch after mutate
//!
//! Key regeneration and cancellation return the record as re-read from the
//! service after the mutation, never a locally patched copy.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use ulid::Ulid;

use crate::client::{path_segment, ApimClient};
use crate::error::{ApimError, Result};
use crate::users::ArmList;

// ── Types ──────────────────────────────────────────────────────────────

/// Lifecycle state of a subscription.
///
/// `Unknown` absorbs any state string the service adds later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Waiting for approval.
    Submitted,
    /// Usable; keys are accepted by the gateway.
    Active,
    /// Temporarily blocked by an administrator.
    Suspended,
    /// Ended by the user or an administrator.
    Cancelled,
    /// Denied on approval.
    Rejected,
    /// Past its expiration date.
    Expired,
    /// Catch-all for unrecognised states.
    #[serde(other)]
    Unknown,
}

/// `properties` of a subscription resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionProperties {
    /// User path of the owner, e.g. `/users/{uid}` or a full ARM user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Product (or API) resource id the subscription grants access to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Lifecycle state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SubscriptionState>,
    /// Primary subscription key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Secondary subscription key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_key: Option<String>,
}

/// A subscription as returned by the management API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Full ARM resource id.
    #[serde(default)]
    pub id: Option<String>,
    /// Subscription identifier (a ULID for subscriptions created here).
    #[serde(default)]
    pub name: Option<String>,
    /// Subscription properties.
    #[serde(default)]
    pub properties: SubscriptionProperties,
}

impl SubscriptionRecord {
    /// Internal id of the owning user: the last segment of `ownerId`.
    pub fn user_id(&self) -> Option<&str> {
        self.properties
            .owner_id
            .as_deref()
            .and_then(|owner| owner.rsplit('/').next())
            .filter(|id| !id.is_empty())
    }

    /// Resource id of the product this subscription is bound to.
    pub fn product_id(&self) -> Option<&str> {
        self.properties.scope.as_deref()
    }

    /// Current lifecycle state, `Unknown` when absent.
    pub fn state(&self) -> SubscriptionState {
        self.properties
            .state
            .clone()
            .unwrap_or(SubscriptionState::Unknown)
    }

    fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// A product as returned by the management API.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRecord {
    /// Full ARM resource id.
    #[serde(default)]
    pub id: Option<String>,
    /// Product identifier.
    #[serde(default)]
    pub name: Option<String>,
    /// Product properties.
    #[serde(default)]
    pub properties: ProductProperties,
}

/// `properties` of a product resource.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductProperties {
    /// Human-readable product name.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Response of `listSecrets`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionKeys {
    /// Primary subscription key.
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Secondary subscription key.
    #[serde(default)]
    pub secondary_key: Option<String>,
}

/// Body of the create-or-update PUT.
#[derive(Debug, Serialize)]
pub struct SubscriptionCreate {
    /// Properties of the new subscription.
    pub properties: SubscriptionProperties,
}

/// Which of the two subscription keys to rotate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// The primary key.
    Primary,
    /// The secondary key.
    Secondary,
}

impl KeyKind {
    fn action(self) -> &'static str {
        match self {
            KeyKind::Primary => "regeneratePrimaryKey",
            KeyKind::Secondary => "regenerateSecondaryKey",
        }
    }
}

// ── Endpoint functions ─────────────────────────────────────────────────

/// GET plus ownership check, without keys.
async fn owned_subscription(
    client: &ApimClient,
    subscription_path: &str,
    user_id: &str,
) -> Result<Option<SubscriptionRecord>> {
    let Some(record) = client
        .get_optional::<SubscriptionRecord>(subscription_path)
        .await?
    else {
        debug!("subscription not found");
        return Ok(None);
    };

    if record.user_id() != Some(user_id) {
        debug!(owner = ?record.user_id(), "subscription owned by another user");
        return Ok(None);
    }
    if !record.has_name() {
        return Ok(None);
    }
    Ok(Some(record))
}

/// Fetches a subscription and returns it, keys included, only if `user_id`
/// owns it.
///
/// Returns `Ok(None)` when the subscription does not exist, belongs to
/// another user, or has no usable name. `listSecrets` is only called once
/// ownership is confirmed.
///
/// # Errors
///
/// - `ApimError::Precondition`: `subscription_id` is empty or a dot segment.
/// - `ApimError::Api`: non-success status other than 404 on the GET, or any
///   non-success status from `listSecrets`.
/// - `ApimError::Auth`: token acquisition failed.
/// - `ApimError::Network`: transport-level failure.
#[instrument(skip(client))]
pub async fn get_user_subscription(
    client: &ApimClient,
    subscription_id: &str,
    user_id: &str,
) -> Result<Option<SubscriptionRecord>> {
    let path = format!("subscriptions/{}", path_segment(subscription_id)?);
    let Some(mut record) = owned_subscription(client, &path, user_id).await? else {
        return Ok(None);
    };

    let keys: SubscriptionKeys = client.post_json(&format!("{path}/listSecrets")).await?;
    record.properties.primary_key = keys.primary_key;
    record.properties.secondary_key = keys.secondary_key;
    Ok(Some(record))
}

/// Lists a user's subscriptions.
///
/// Only the first page is returned; `nextLink` is not followed. Keys are
/// not included.
#[instrument(skip(client))]
pub async fn list_user_subscriptions(
    client: &ApimClient,
    user_id: &str,
) -> Result<Vec<SubscriptionRecord>> {
    let path = format!("users/{}/subscriptions", path_segment(user_id)?);
    let page: ArmList<SubscriptionRecord> = client.get(&path).await?;
    if page.next_link.is_some() {
        debug!("more subscriptions available, only the first page is returned");
    }
    Ok(page.value)
}

/// Regenerates one key of a subscription owned by `user_id` and returns the
/// record as re-read afterwards.
///
/// If the ownership check fails, returns `Ok(None)` without issuing the
/// regenerate call.
#[instrument(skip(client))]
pub async fn regenerate_key(
    client: &ApimClient,
    subscription_id: &str,
    user_id: &str,
    key: KeyKind,
) -> Result<Option<SubscriptionRecord>> {
    let path = format!("subscriptions/{}", path_segment(subscription_id)?);
    if owned_subscription(client, &path, user_id).await?.is_none() {
        return Ok(None);
    }

    client
        .post_empty(&format!("{path}/{}", key.action()))
        .await?;
    debug!("key regenerated");

    get_user_subscription(client, subscription_id, user_id).await
}

/// Regenerates the primary key. See [`regenerate_key`].
pub async fn regenerate_primary_key(
    client: &ApimClient,
    subscription_id: &str,
    user_id: &str,
) -> Result<Option<SubscriptionRecord>> {
    regenerate_key(client, subscription_id, user_id, KeyKind::Primary).await
}

/// Regenerates the secondary key. See [`regenerate_key`].
pub async fn regenerate_secondary_key(
    client: &ApimClient,
    subscription_id: &str,
    user_id: &str,
) -> Result<Option<SubscriptionRecord>> {
    regenerate_key(client, subscription_id, user_id, KeyKind::Secondary).await
}

/// Creates an active subscription binding `user_id` to the product named
/// `product_name`, under a freshly generated ULID.
///
/// Existing subscriptions are not consulted: calling this again for a user
/// whose subscription was cancelled gives them a new active one.
///
/// # Errors
///
/// - `ApimError::Precondition`: the product does not exist or has no id, or
///   `user_id` or `product_name` is empty or a dot segment.
/// - `ApimError::Api`: the product lookup or the PUT failed.
/// - `ApimError::Auth` / `ApimError::Network`: as for every call.
#[instrument(skip(client))]
pub async fn add_user_subscription_to_product(
    client: &ApimClient,
    user_id: &str,
    product_name: &str,
) -> Result<SubscriptionRecord> {
    let owner_id = format!("/users/{}", path_segment(user_id)?);
    let product_path = format!("products/{}", path_segment(product_name)?);
    let product: Option<ProductRecord> = client.get_optional(&product_path).await?;
    let Some(product) = product else {
        return Err(ApimError::Precondition(format!(
            "product {product_name} not found"
        )));
    };
    let Some(product_id) = product.id.filter(|id| !id.is_empty()) else {
        return Err(ApimError::Precondition(format!(
            "product {product_name} has no id"
        )));
    };

    let subscription_id = Ulid::new().to_string();
    let display_name = product
        .properties
        .display_name
        .unwrap_or_else(|| product_name.to_string());

    let body = SubscriptionCreate {
        properties: SubscriptionProperties {
            owner_id: Some(owner_id),
            scope: Some(product_id),
            display_name: Some(display_name),
            state: Some(SubscriptionState::Active),
            primary_key: None,
            secondary_key: None,
        },
    };

    debug!(%subscription_id, "creating subscription");
    client
        .put(&format!("subscriptions/{subscription_id}"), &body)
        .await
}

/// Cancels a subscription owned by `user_id` and returns the re-read
/// record. Returns `Ok(None)` without mutating if the ownership check fails.
#[instrument(skip(client))]
pub async fn cancel_user_subscription(
    client: &ApimClient,
    subscription_id: &str,
    user_id: &str,
) -> Result<Option<SubscriptionRecord>> {
    let path = format!("subscriptions/{}", path_segment(subscription_id)?);
    if owned_subscription(client, &path, user_id).await?.is_none() {
        return Ok(None);
    }

    let body = SubscriptionCreate {
        properties: SubscriptionProperties {
            state: Some(SubscriptionState::Cancelled),
            ..Default::default()
        },
    };
    client.patch(&path, &body).await?;

    get_user_subscription(client, subscription_id, user_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> SubscriptionRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn subscription_deserializes_full_response() {
        let sub = record(
            r#"{
                "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ApiManagement/service/svc/subscriptions/01HZX",
                "type": "Microsoft.ApiManagement/service/subscriptions",
                "name": "01HZX",
                "properties": {
                    "ownerId": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ApiManagement/service/svc/users/u-1",
                    "scope": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ApiManagement/service/svc/products/starter",
                    "displayName": "Starter",
                    "state": "active",
                    "createdDate": "2020-01-01T00:00:00Z"
                }
            }"#,
        );
        assert_eq!(sub.name.as_deref(), Some("01HZX"));
        assert_eq!(sub.user_id(), Some("u-1"));
        assert!(sub.product_id().unwrap().ends_with("/products/starter"));
        assert_eq!(sub.state(), SubscriptionState::Active);
        assert!(sub.properties.primary_key.is_none());
    }

    #[test]
    fn list_secrets_response_deserializes() {
        let keys: SubscriptionKeys =
            serde_json::from_str(r#"{"primaryKey": "pk", "secondaryKey": "sk"}"#).unwrap();
        assert_eq!(keys.primary_key.as_deref(), Some("pk"));
        assert_eq!(keys.secondary_key.as_deref(), Some("sk"));
    }

    #[test]
    fn short_owner_path_yields_user_id() {
        let sub = record(r#"{"name": "s", "properties": {"ownerId": "/users/u-9"}}"#);
        assert_eq!(sub.user_id(), Some("u-9"));
    }

    #[test]
    fn missing_owner_yields_no_user_id() {
        let sub = record(r#"{"name": "s", "properties": {}}"#);
        assert_eq!(sub.user_id(), None);
        assert_eq!(sub.state(), SubscriptionState::Unknown);
    }

    #[test]
    fn unknown_state_is_tolerated() {
        let sub = record(r#"{"name": "s", "properties": {"state": "archived"}}"#);
        assert_eq!(sub.state(), SubscriptionState::Unknown);
    }

    #[test]
    fn create_body_serializes_camel_case_and_omits_keys() {
        let body = SubscriptionCreate {
            properties: SubscriptionProperties {
                owner_id: Some("/users/u-1".to_string()),
                scope: Some("/products/starter".to_string()),
                display_name: Some("Starter".to_string()),
                state: Some(SubscriptionState::Active),
                primary_key: None,
                secondary_key: None,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["properties"]["ownerId"], "/users/u-1");
        assert_eq!(json["properties"]["scope"], "/products/starter");
        assert_eq!(json["properties"]["state"], "active");
        assert!(json["properties"].get("primaryKey").is_none());
    }

    #[test]
    fn key_kind_maps_to_action_path() {
        assert_eq!(KeyKind::Primary.action(), "regeneratePrimaryKey");
        assert_eq!(KeyKind::Secondary.action(), "regenerateSecondaryKey");
    }
}
