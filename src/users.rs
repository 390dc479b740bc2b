//! Directory lookup: resolving API Management users.
//!
//! - [`find_user_by_email`]: exact-match email filter, first result wins.
//! - [`get_user`]: fetch by internal user id.
//!
//! Both return `Ok(None)` rather than an error when no usable record
//! exists. Records are never cached; every call goes to the service.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::client::{path_segment, ApimClient};
use crate::error::Result;

// ── Wire types ─────────────────────────────────────────────────────────

/// ARM collection wrapper: `{ "value": [...], "nextLink": "..." }`.
///
/// `next_link` is only surfaced so callers can log that a page was
/// dropped; continuation is not followed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmList<T> {
    /// Items on this page.
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    /// URL of the next page, if any.
    #[serde(default)]
    pub next_link: Option<String>,
}

/// An identity linked to an API Management user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Identity provider, e.g. `"Azure"` or `"Basic"`.
    #[serde(default)]
    pub provider: Option<String>,
    /// The provider's id for the user (Azure AD object id for `"Azure"`).
    #[serde(default)]
    pub id: Option<String>,
}

/// `properties` of a user resource.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProperties {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    identities: Vec<UserIdentity>,
}

/// A user resource as returned by the management API.
#[derive(Debug, Deserialize)]
pub struct UserContract {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: UserProperties,
}

// ── Record ─────────────────────────────────────────────────────────────

/// A resolved directory principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Identity provider's id (Azure AD object id), when linked.
    pub external_id: Option<String>,
    /// Internal user id: the resource `name`, used in all user paths.
    pub name: String,
    /// Full ARM resource id.
    pub id: String,
    /// First and last name joined by a space.
    pub display_name: String,
    /// Email address as stored by the service.
    pub email: String,
}

impl UserRecord {
    /// Builds a record from a contract, or `None` if the contract lacks an
    /// id or a name.
    pub fn from_contract(contract: UserContract) -> Option<Self> {
        let id = contract.id.filter(|s| !s.is_empty())?;
        let name = contract.name.filter(|s| !s.is_empty())?;
        let props = contract.properties;

        let display_name = [props.first_name, props.last_name]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let external_id = props
            .identities
            .iter()
            .find(|i| i.provider.as_deref() == Some("Azure"))
            .or_else(|| props.identities.first())
            .and_then(|i| i.id.clone());

        Some(UserRecord {
            external_id,
            name,
            id,
            display_name,
            email: props.email.unwrap_or_default(),
        })
    }
}

/// OData string literal: single quotes are escaped by doubling.
fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ── Endpoint functions ─────────────────────────────────────────────────

/// Finds the user whose email exactly matches `email`.
///
/// When several users share the address the first one returned by the
/// service is used and a warning is logged.
///
/// # Errors
///
/// - `ApimError::Api`: non-success status from the management API.
/// - `ApimError::Auth`: token acquisition failed.
/// - `ApimError::Network`: transport-level failure.
#[instrument(skip(client))]
pub async fn find_user_by_email(client: &ApimClient, email: &str) -> Result<Option<UserRecord>> {
    let filter = format!("email eq {}", odata_literal(email));
    let path = format!("users?$filter={}", urlencoding::encode(&filter));
    let page: ArmList<UserContract> = client.get(&path).await?;

    if page.value.len() > 1 {
        warn!(
            matches = page.value.len(),
            "several users share this email, using the first"
        );
    }

    let user = page
        .value
        .into_iter()
        .next()
        .and_then(UserRecord::from_contract);
    debug!(found = user.is_some(), "directory lookup finished");
    Ok(user)
}

/// Fetches a user by internal id. A 404 or a record without id/name
/// yields `Ok(None)`.
///
/// # Errors
///
/// - `ApimError::Precondition`: `user_id` is empty or a dot segment.
/// - Otherwise as for [`find_user_by_email`].
pub async fn get_user(client: &ApimClient, user_id: &str) -> Result<Option<UserRecord>> {
    let path = format!("users/{}", path_segment(user_id)?);
    let contract: Option<UserContract> = client.get_optional(&path).await?;
    Ok(contract.and_then(UserRecord::from_contract))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(json: &str) -> UserContract {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn full_contract_maps_to_record() {
        let user = UserRecord::from_contract(contract(
            r#"{
                "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ApiManagement/service/svc/users/u-1",
                "type": "Microsoft.ApiManagement/service/users",
                "name": "u-1",
                "properties": {
                    "firstName": "Ada",
                    "lastName": "Lovelace",
                    "email": "ada@contoso.com",
                    "state": "active",
                    "identities": [
                        {"provider": "Basic", "id": "ada@contoso.com"},
                        {"provider": "Azure", "id": "aad-object-1"}
                    ]
                }
            }"#,
        ))
        .unwrap();

        assert_eq!(user.name, "u-1");
        assert!(user.id.ends_with("/users/u-1"));
        assert_eq!(user.display_name, "Ada Lovelace");
        assert_eq!(user.email, "ada@contoso.com");
        assert_eq!(user.external_id.as_deref(), Some("aad-object-1"));
    }

    #[test]
    fn contract_without_name_is_rejected() {
        assert!(UserRecord::from_contract(contract(r#"{"id": "/users/u-1"}"#)).is_none());
    }

    #[test]
    fn contract_without_id_is_rejected() {
        assert!(UserRecord::from_contract(contract(r#"{"name": "u-1"}"#)).is_none());
    }

    #[test]
    fn sparse_properties_default_cleanly() {
        let user = UserRecord::from_contract(contract(
            r#"{"id": "/users/u-2", "name": "u-2", "properties": {"lastName": "Hopper"}}"#,
        ))
        .unwrap();
        assert_eq!(user.display_name, "Hopper");
        assert_eq!(user.email, "");
        assert!(user.external_id.is_none());
    }

    #[test]
    fn odata_literal_doubles_single_quotes() {
        assert_eq!(odata_literal("o'brien@contoso.com"), "'o''brien@contoso.com'");
    }

    #[test]
    fn arm_list_tolerates_missing_value() {
        let list: ArmList<UserContract> = serde_json::from_str("{}").unwrap();
        assert!(list.value.is_empty());
        assert!(list.next_link.is_none());
    }
}
