//! The Query Layer (C4): read-only, tenant-scoped lookups over projections.

pub mod column;
pub mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

use std::sync::Arc;

use uuid::Uuid;

pub use column::{Column, Page, Pagination, SortOrder};
use model::{
    ActiveLoginPolicy, InstanceFeaturesRow, LoginPolicyRow, OrgDomainRow, OrgRow, PasswordComplexityPolicyRow,
    UserGrantRow,
};
use store::Tables;

use crate::types::InstanceId;

/// A string filter: exact equality or case-insensitive substring (spec.md §4.4 "Search grammar").
#[derive(Debug, Clone)]
pub enum StringFilter {
    Equals(String),
    Contains(String),
}

impl StringFilter {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringFilter::Equals(s) => value == s,
            StringFilter::Contains(s) => value.to_lowercase().contains(&s.to_lowercase()),
        }
    }
}

/// Filters for [`QueryLayer::search_orgs`]; filters compose by AND.
#[derive(Debug, Clone, Default)]
pub struct OrgSearchFilter {
    pub name: Option<StringFilter>,
    pub active_only: Option<bool>,
}

/// The outcome of a grant check (spec.md §4.6 "Grant check").
#[derive(Debug, Clone)]
pub struct GrantCheckResult {
    pub exists: bool,
    pub grant: Option<UserGrantRow>,
    pub has_role: bool,
    pub roles: Vec<String>,
}

/// Read-only, multi-tenant query surface over the projections in [`store::Tables`].
///
/// Every method accepts an `instance_id` and every lookup is scoped by it;
/// this is the one rule spec.md §4.4 calls out as a bug if violated, so every
/// method here threads `instance_id` through its filter rather than trusting
/// a caller-supplied row id alone.
#[derive(Clone)]
pub struct QueryLayer {
    tables: Arc<Tables>,
}

impl QueryLayer {
    pub fn new(tables: Arc<Tables>) -> Self {
        Self { tables }
    }

    // ---- Organizations -------------------------------------------------

    pub fn get_org_by_id(&self, instance_id: InstanceId, org_id: Uuid) -> Option<OrgRow> {
        self.tables.orgs.read().unwrap().get(&(instance_id, org_id)).cloned()
    }

    pub fn get_org_by_domain_global(&self, instance_id: InstanceId, domain: &str) -> Option<OrgRow> {
        let orgs = self.tables.orgs.read().unwrap();
        let domains = self.tables.org_domains.read().unwrap();
        domains
            .values()
            .find(|d| d.instance_id == instance_id && d.domain == domain)
            .and_then(|d| orgs.get(&(instance_id, d.org_id)))
            .cloned()
    }

    pub fn search_orgs(&self, instance_id: InstanceId, filter: &OrgSearchFilter, pagination: Pagination) -> Page<OrgRow> {
        let orgs = self.tables.orgs.read().unwrap();
        let mut matching: Vec<OrgRow> = orgs
            .values()
            .filter(|o| o.instance_id == instance_id)
            .filter(|o| filter.name.as_ref().map_or(true, |f| f.matches(&o.name)))
            .filter(|o| {
                filter
                    .active_only
                    .map_or(true, |active_only| !active_only || o.state == model::OrgState::Active)
            })
            .cloned()
            .collect();

        matching.sort_by_key(|o| o.created_at);
        if pagination.sort_order == SortOrder::Desc {
            matching.reverse();
        }

        Page::from_all(matching, pagination)
    }

    pub fn get_org_domains_by_id(&self, instance_id: InstanceId, org_id: Uuid) -> Vec<OrgDomainRow> {
        self.tables
            .org_domains
            .read()
            .unwrap()
            .values()
            .filter(|d| d.instance_id == instance_id && d.org_id == org_id)
            .cloned()
            .collect()
    }

    pub fn is_domain_available(&self, instance_id: InstanceId, domain: &str) -> bool {
        !self
            .tables
            .org_domains
            .read()
            .unwrap()
            .values()
            .any(|d| d.instance_id == instance_id && d.domain == domain)
    }

    pub fn get_primary_domain_by_org_id(&self, instance_id: InstanceId, org_id: Uuid) -> Option<String> {
        self.get_org_by_id(instance_id, org_id).and_then(|o| o.primary_domain)
    }

    pub fn get_org_with_domains(&self, instance_id: InstanceId, org_id: Uuid) -> Option<(OrgRow, Vec<OrgDomainRow>)> {
        let org = self.get_org_by_id(instance_id, org_id)?;
        let domains = self.get_org_domains_by_id(instance_id, org_id);
        Some((org, domains))
    }

    // ---- Users and user grants ------------------------------------------

    pub fn search_user_grants(
        &self,
        instance_id: InstanceId,
        user_id: Option<Uuid>,
        project_id: Option<Uuid>,
        pagination: Pagination,
    ) -> Page<UserGrantRow> {
        let grants: Vec<UserGrantRow> = self
            .tables
            .user_grants
            .read()
            .unwrap()
            .values()
            .filter(|g| g.instance_id == instance_id && g.active)
            .filter(|g| user_id.map_or(true, |id| g.user_id == id))
            .filter(|g| project_id.map_or(true, |id| g.project_id == id))
            .cloned()
            .collect();

        Page::from_all(grants, pagination)
    }

    pub fn get_user_grant_by_id(&self, instance_id: InstanceId, grant_id: Uuid) -> Option<UserGrantRow> {
        self.tables.user_grants.read().unwrap().get(&(instance_id, grant_id)).cloned()
    }

    pub fn get_user_grants_by_user_id(&self, instance_id: InstanceId, user_id: Uuid) -> Vec<UserGrantRow> {
        self.tables
            .user_grants
            .read()
            .unwrap()
            .values()
            .filter(|g| g.instance_id == instance_id && g.user_id == user_id && g.active)
            .cloned()
            .collect()
    }

    pub fn get_user_grants_by_project_id(&self, instance_id: InstanceId, project_id: Uuid) -> Vec<UserGrantRow> {
        self.tables
            .user_grants
            .read()
            .unwrap()
            .values()
            .filter(|g| g.instance_id == instance_id && g.project_id == project_id && g.active)
            .cloned()
            .collect()
    }

    /// Checks whether `user_id` has an active grant on `project_id`, optionally requiring `role`
    /// (spec.md §4.6 "Grant check", §8 scenario 4). Only ACTIVE grants are considered.
    pub fn check_user_grant(
        &self,
        instance_id: InstanceId,
        user_id: Uuid,
        project_id: Uuid,
        role: Option<&str>,
    ) -> GrantCheckResult {
        let grant = self
            .tables
            .user_grants
            .read()
            .unwrap()
            .values()
            .find(|g| g.instance_id == instance_id && g.user_id == user_id && g.project_id == project_id && g.active)
            .cloned();

        match grant {
            None => GrantCheckResult { exists: false, grant: None, has_role: false, roles: vec![] },
            Some(grant) => {
                let has_role = role.map_or(true, |r| grant.roles.iter().any(|role| role == r));
                let roles = grant.roles.clone();
                GrantCheckResult { exists: true, grant: Some(grant), has_role, roles }
            }
        }
    }

    // ---- Login policy ----------------------------------------------------

    /// Org-specific policy if present, else the instance default, else `None`
    /// (spec.md §4.4 "Login policy", §8 scenario 2). The resolver
    /// ([`crate::policy::PolicyResolver`]) wraps this with caching and
    /// invalidation; this method is the uncached source of truth.
    pub fn get_active_login_policy(&self, instance_id: InstanceId, org_id: Uuid) -> Option<ActiveLoginPolicy> {
        let policies = self.tables.login_policies.read().unwrap();

        if let Some(policy) = policies.get(&(instance_id, Some(org_id))) {
            return Some(ActiveLoginPolicy { policy: policy.clone(), is_default: false, is_org_policy: true });
        }
        if let Some(policy) = policies.get(&(instance_id, None)) {
            return Some(ActiveLoginPolicy { policy: policy.clone(), is_default: true, is_org_policy: false });
        }
        None
    }

    pub fn set_login_policy(&self, row: LoginPolicyRow) {
        self.tables.login_policies.write().unwrap().insert((row.instance_id, row.org_id), row);
    }

    // ---- Password complexity ---------------------------------------------

    /// Org-specific → instance default → built-in default (spec.md §4.4 "Password complexity").
    ///
    /// This crate does not maintain a separate password-policy table (no
    /// aggregate emits one in this build); it always resolves to the
    /// built-in default. The three-level precedence is still implemented
    /// here so a future org/instance policy table only needs to populate
    /// the lookup, not change this resolution logic.
    pub fn get_password_complexity_policy(&self, instance_id: InstanceId, _org_id: Option<Uuid>) -> PasswordComplexityPolicyRow {
        PasswordComplexityPolicyRow::built_in_default(instance_id)
    }

    /// `{valid, errors[]}` — one error per failed rule (spec.md §8 "Password validation").
    pub fn validate_password(password: &str, policy: &PasswordComplexityPolicyRow) -> PasswordValidation {
        let mut errors = Vec::new();

        if password.chars().count() < policy.min_length as usize {
            errors.push("password is shorter than the minimum length".to_string());
        }
        if policy.has_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push("password must contain an uppercase letter".to_string());
        }
        if policy.has_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            errors.push("password must contain a lowercase letter".to_string());
        }
        if policy.has_number && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push("password must contain a digit".to_string());
        }
        if policy.has_symbol && !password.chars().any(|c| !c.is_alphanumeric()) {
            errors.push("password must contain a symbol".to_string());
        }

        PasswordValidation { valid: errors.is_empty(), errors }
    }

    // ---- Features ----------------------------------------------------------

    /// Missing rows resolve to all-disabled (spec.md §4.4 "Features").
    pub fn get_instance_features(&self, instance_id: InstanceId) -> InstanceFeaturesRow {
        self.tables.instance_features.read().unwrap().get(&instance_id).cloned().unwrap_or_default()
    }

    pub fn set_instance_features(&self, instance_id: InstanceId, features: InstanceFeaturesRow) {
        self.tables.instance_features.write().unwrap().insert(instance_id, features);
    }

    pub fn get_system_features(&self) -> InstanceFeaturesRow {
        self.tables.system_features.read().unwrap().clone().unwrap_or_default()
    }

    pub fn set_system_features(&self, features: InstanceFeaturesRow) {
        *self.tables.system_features.write().unwrap() = Some(features);
    }

    pub fn is_instance_feature_enabled(&self, instance_id: InstanceId, name: &str) -> bool {
        let features = self.get_instance_features(instance_id);
        match name {
            "login_default_org" => features.login_default_org,
            "oidc_trigger_introspection_projection" => features.oidc_trigger_introspection_projection,
            "improved_performance" | "improveredPerformance" => features.improved_performance,
            "user_schema" => features.user_schema,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PasswordValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::model::LoginPolicyRow;

    fn layer() -> QueryLayer {
        QueryLayer::new(Arc::new(Tables::default()))
    }

    fn default_login_policy(instance_id: InstanceId, org_id: Option<Uuid>, force_mfa: bool) -> LoginPolicyRow {
        LoginPolicyRow {
            instance_id,
            org_id,
            allow_username_password: true,
            allow_registration: true,
            allow_external_idp: false,
            force_mfa,
            force_mfa_local_only: false,
            second_factors: vec![],
            multi_factors: vec![],
            linked_idps: vec![],
        }
    }

    #[test]
    fn login_policy_falls_back_to_instance_default() {
        let layer = layer();
        let instance = InstanceId(Uuid::new_v4());
        let org_id = Uuid::new_v4();

        layer.set_login_policy(default_login_policy(instance, None, true));

        let active = layer.get_active_login_policy(instance, org_id).unwrap();
        assert!(active.is_default);
        assert!(!active.is_org_policy);
        assert!(active.policy.force_mfa);
    }

    #[test]
    fn org_policy_wins_over_instance_default() {
        let layer = layer();
        let instance = InstanceId(Uuid::new_v4());
        let org_id = Uuid::new_v4();

        layer.set_login_policy(default_login_policy(instance, None, true));
        layer.set_login_policy(default_login_policy(instance, Some(org_id), false));

        let active = layer.get_active_login_policy(instance, org_id).unwrap();
        assert!(!active.is_default);
        assert!(active.is_org_policy);
        assert!(!active.policy.force_mfa);
    }

    #[test]
    fn password_validation_reports_one_error_per_failed_rule() {
        let policy = PasswordComplexityPolicyRow::built_in_default(InstanceId(Uuid::new_v4()));
        let result = QueryLayer::validate_password("short", &policy);

        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("minimum length")));
        assert!(result.errors.iter().any(|e| e.contains("uppercase")));
        assert!(result.errors.iter().any(|e| e.contains("digit")));

        let result = QueryLayer::validate_password("Str0ngPassw0rd", &policy);
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn missing_feature_rows_resolve_to_all_disabled() {
        let layer = layer();
        let instance = InstanceId(Uuid::new_v4());
        let features = layer.get_instance_features(instance);
        assert!(!features.improved_performance);
        assert!(!layer.is_instance_feature_enabled(instance, "improveredPerformance"));
    }

    #[test]
    fn pagination_totals_reflect_the_full_filtered_set() {
        let layer = layer();
        let instance = InstanceId(Uuid::new_v4());
        for i in 0..5 {
            layer.tables.orgs.write().unwrap().insert(
                (instance, Uuid::new_v4()),
                OrgRow {
                    id: Uuid::new_v4(),
                    instance_id: instance,
                    name: format!("org-{i}"),
                    state: model::OrgState::Active,
                    primary_domain: None,
                    sequence: 1,
                    created_at: chrono::Utc::now(),
                },
            );
        }

        let page = layer.search_orgs(instance, &OrgSearchFilter::default(), Pagination::new(Some(0), Some(2), SortOrder::Desc));
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.total_count, 5);
    }
}
