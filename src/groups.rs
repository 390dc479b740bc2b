//! Group membership synchronisation.
//!
//! [`add_user_to_groups`] brings a user's memberships up to a desired set
//! by adding whatever is missing. It never removes memberships.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::client::{path_segment, ApimClient};
use crate::error::{ApimError, Result};
use crate::users::{ArmList, UserRecord};

/// A group as returned by the management API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Full ARM resource id.
    #[serde(default)]
    pub id: Option<String>,
    /// Group identifier, e.g. `"developers"`.
    #[serde(default)]
    pub name: Option<String>,
    /// Group properties.
    #[serde(default)]
    pub properties: GroupProperties,
}

/// `properties` of a group resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupProperties {
    /// Human-readable group name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// `true` for the built-in administrators/developers/guests groups.
    #[serde(default)]
    pub built_in: bool,
}

/// Lists the groups `user_id` belongs to (first page only).
pub async fn list_user_groups(client: &ApimClient, user_id: &str) -> Result<Vec<GroupRecord>> {
    let path = format!("users/{}/groups", path_segment(user_id)?);
    let page: ArmList<GroupRecord> = client.get(&path).await?;
    Ok(page.value)
}

/// Desired groups the user is not yet a member of, in set order.
fn missing_groups(desired: &BTreeSet<String>, current: &[GroupRecord]) -> Vec<String> {
    let current: BTreeSet<&str> = current.iter().filter_map(|g| g.name.as_deref()).collect();
    desired
        .iter()
        .filter(|g| !current.contains(g.as_str()))
        .cloned()
        .collect()
}

/// Adds `user` to every group in `desired` it is not already a member of,
/// returning the groups added in the order they were applied.
///
/// # Errors
///
/// - `ApimError::Precondition`: `user` has no name, or the user name or a
///   missing group id is empty or a dot segment. No membership is written.
/// - `ApimError::GroupSync`: a membership write failed. `added` lists the
///   groups applied before it; they are left in place.
/// - Errors from reading current memberships are returned as-is.
#[instrument(skip(client, user), fields(user = %user.name))]
pub async fn add_user_to_groups(
    client: &ApimClient,
    user: &UserRecord,
    desired: &BTreeSet<String>,
) -> Result<Vec<String>> {
    if user.name.trim().is_empty() {
        return Err(ApimError::Precondition(
            "user record has no name".to_string(),
        ));
    }

    let current = list_user_groups(client, &user.name).await?;
    let missing = missing_groups(desired, &current);
    if missing.is_empty() {
        debug!("user already in all desired groups");
        return Ok(Vec::new());
    }

    let user_segment = path_segment(&user.name)?;
    let paths = missing
        .iter()
        .map(|group| -> Result<String> {
            Ok(format!("groups/{}/users/{user_segment}", path_segment(group)?))
        })
        .collect::<Result<Vec<_>>>()?;

    // One membership write at a time. The service races when the same
    // user's memberships are written concurrently, so each PUT must
    // complete before the next is sent. Do not turn this into a join.
    let mut added = Vec::with_capacity(missing.len());
    for (group, path) in missing.into_iter().zip(paths) {
        if let Err(source) = client.put_empty(&path).await {
            return Err(ApimError::GroupSync {
                added,
                group,
                source: Box::new(source),
            });
        }
        debug!(%group, "added to group");
        added.push(group);
    }

    Ok(added)
}
