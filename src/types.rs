use serde::{Deserialize, Serialize};

use crate::metadata::Registry;
use crate::PackageType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    User,
    ServiceAccount,
    Service,
}

/// The actor behind a user-initiated mutation. Background jobs act without one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub uid: String,
    pub email: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub principal_type: PrincipalType,
}

impl Principal {
    pub fn user(id: i64, uid: &str, email: &str, display_name: &str) -> Self {
        Self {
            id,
            uid: uid.to_string(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            principal_type: PrincipalType::User,
        }
    }
}

/// A registry resolved by the caller before invoking deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryInfo {
    pub registry_id: i64,
    pub registry_name: String,
    pub package_type: PackageType,
    /// Identifier of the account (root space) owning the registry.
    pub root_identifier: String,
    /// Slash separated space path of the registry's parent, eg `acct/org/project`.
    pub parent_ref: String,
}

impl From<&Registry> for RegistryInfo {
    fn from(r: &Registry) -> Self {
        Self {
            registry_id: r.id,
            registry_name: r.name.clone(),
            package_type: r.package_type.clone(),
            root_identifier: r.account_identifier.clone(),
            parent_ref: r.parent_ref.clone(),
        }
    }
}
