//! Read-model row shapes (spec.md §3 "Core read entities").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrgState {
    Unspecified,
    Active,
    Inactive,
}

#[derive(Debug, Clone)]
pub struct OrgRow {
    pub id: Uuid,
    pub instance_id: InstanceId,
    pub name: String,
    pub state: OrgState,
    pub primary_domain: Option<String>,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMethod {
    Http,
    Dns,
}

#[derive(Debug, Clone)]
pub struct OrgDomainRow {
    pub org_id: Uuid,
    pub instance_id: InstanceId,
    pub domain: String,
    pub verified: bool,
    pub primary: bool,
    pub validation_method: Option<ValidationMethod>,
    pub validation_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Unspecified,
    Active,
    Inactive,
    Deleted,
    Locked,
    Suspended,
    Initial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    Human,
    Machine,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub instance_id: InstanceId,
    pub resource_owner: Uuid,
    pub state: UserState,
    pub user_type: UserType,
    pub username: String,
    pub email_verified: bool,
    pub phone_verified: bool,
}

#[derive(Debug, Clone)]
pub struct UserGrantRow {
    pub id: Uuid,
    pub instance_id: InstanceId,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub project_grant_id: Option<Uuid>,
    pub roles: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginPolicyRow {
    pub instance_id: InstanceId,
    /// `None` for the instance-level default policy.
    pub org_id: Option<Uuid>,
    pub allow_username_password: bool,
    pub allow_registration: bool,
    pub allow_external_idp: bool,
    pub force_mfa: bool,
    pub force_mfa_local_only: bool,
    pub second_factors: Vec<String>,
    pub multi_factors: Vec<String>,
    pub linked_idps: Vec<String>,
}

/// The resolved policy handed back by [`crate::policy::PolicyResolver`]: the
/// winning row plus which level won, per spec.md §4.5 ("the winning level
/// supplies the whole policy").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveLoginPolicy {
    pub policy: LoginPolicyRow,
    pub is_default: bool,
    pub is_org_policy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordComplexityPolicyRow {
    pub instance_id: InstanceId,
    pub org_id: Option<Uuid>,
    pub min_length: u32,
    pub has_uppercase: bool,
    pub has_lowercase: bool,
    pub has_number: bool,
    pub has_symbol: bool,
}

impl PasswordComplexityPolicyRow {
    /// Built-in default per spec.md §4.4: min length 8, upper+lower+digit required, symbol optional.
    pub fn built_in_default(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            org_id: None,
            min_length: 8,
            has_uppercase: true,
            has_lowercase: true,
            has_number: true,
            has_symbol: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceFeaturesRow {
    pub instance_id: Option<InstanceId>,
    pub login_default_org: bool,
    pub oidc_trigger_introspection_projection: bool,
    /// Wire name is `improveredPerformance` (kept verbatim for compatibility,
    /// spec.md §9 Open Question (b)); `#[serde(rename)]` preserves that typo
    /// on the wire while the field itself carries the corrected spelling.
    #[serde(rename = "improveredPerformance")]
    pub improved_performance: bool,
    pub user_schema: bool,
}
