//! The policy resolver (C5, second half): a cache-memoized wrapper around
//! [`QueryLayer`]'s policy lookups, so repeated authorization checks don't
//! keep hammering the read model (spec.md §4.5 "Policy resolution").
//!
//! Per spec.md §9 Open Question (a), resolution is a single call: the winning
//! level supplies the whole policy, never a field-by-field merge across
//! levels.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::cache::Cache;
use crate::query::model::{ActiveLoginPolicy, PasswordComplexityPolicyRow};
use crate::query::QueryLayer;
use crate::types::InstanceId;

/// Default TTL for cached policy lookups. Short enough that a stale read
/// after a policy change self-heals quickly even if invalidation is missed.
pub const DEFAULT_POLICY_TTL: Duration = Duration::from_secs(60);

pub struct PolicyResolver {
    query: QueryLayer,
    cache: Arc<Cache>,
}

fn login_policy_cache_key(instance_id: InstanceId, org_id: Uuid) -> String {
    format!("policy:login:{instance_id}:{org_id}")
}

fn password_policy_cache_key(instance_id: InstanceId, org_id: Option<Uuid>) -> String {
    match org_id {
        Some(org_id) => format!("policy:password:{instance_id}:{org_id}"),
        None => format!("policy:password:{instance_id}:instance"),
    }
}

impl PolicyResolver {
    pub fn new(query: QueryLayer, cache: Arc<Cache>) -> Self {
        Self { query, cache }
    }

    /// Org policy if set, else the instance default, else `None` — resolved
    /// and cached in a single call, never assembled field-by-field across
    /// levels.
    #[tracing::instrument(skip_all, fields(instance_id = %instance_id, org_id = %org_id))]
    pub fn resolve_login_policy(&self, instance_id: InstanceId, org_id: Uuid) -> Option<ActiveLoginPolicy> {
        let key = login_policy_cache_key(instance_id, org_id);

        if let Some(cached) = self.cache.get(&key) {
            return serde_json::from_value(cached).ok();
        }

        let resolved = self.query.get_active_login_policy(instance_id, org_id);
        if let Some(policy) = &resolved {
            if let Ok(value) = serde_json::to_value(policy) {
                self.cache.set(key, value, Some(DEFAULT_POLICY_TTL));
            }
        }
        resolved
    }

    /// Org → instance → built-in default; always resolves to a concrete
    /// policy (spec.md §4.4 "Password complexity").
    #[tracing::instrument(skip_all, fields(instance_id = %instance_id, org_id = ?org_id))]
    pub fn resolve_password_complexity_policy(
        &self,
        instance_id: InstanceId,
        org_id: Option<Uuid>,
    ) -> PasswordComplexityPolicyRow {
        let key = password_policy_cache_key(instance_id, org_id);

        if let Some(cached) = self.cache.get(&key) {
            if let Ok(policy) = serde_json::from_value(cached) {
                return policy;
            }
        }

        let resolved = self.query.get_password_complexity_policy(instance_id, org_id);
        if let Ok(value) = serde_json::to_value(&resolved) {
            self.cache.set(key, value, Some(DEFAULT_POLICY_TTL));
        }
        resolved
    }

    /// Drops the cached login policy for one org; called when an org's own
    /// policy changes or when the instance default it might fall back to
    /// changes.
    pub fn invalidate_login_policy(&self, instance_id: InstanceId, org_id: Uuid) {
        self.cache.delete(&login_policy_cache_key(instance_id, org_id));
    }

    /// There is no per-org enumeration to invalidate individually when the
    /// instance-wide default changes, so every cached login policy for this
    /// instance is dropped via a glob match on the key prefix.
    pub fn invalidate_login_policy_instance_wide(&self, instance_id: InstanceId) {
        let pattern = format!("policy:login:{instance_id}:*");
        for key in self.cache.keys(&pattern) {
            self.cache.delete(&key);
        }
    }

    pub fn invalidate_password_complexity_policy(&self, instance_id: InstanceId, org_id: Option<Uuid>) {
        self.cache.delete(&password_policy_cache_key(instance_id, org_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::model::LoginPolicyRow;
    use crate::query::store::Tables;

    fn resolver() -> (PolicyResolver, QueryLayer) {
        let tables = Arc::new(Tables::default());
        let query = QueryLayer::new(tables);
        let cache = Arc::new(Cache::new(Duration::from_secs(300)));
        (PolicyResolver::new(query.clone(), cache), query)
    }

    fn login_policy(instance_id: InstanceId, org_id: Option<Uuid>, force_mfa: bool) -> LoginPolicyRow {
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
    fn resolved_policy_is_cached_and_survives_underlying_mutation() {
        let (resolver, query) = resolver();
        let instance = InstanceId(Uuid::new_v4());
        let org_id = Uuid::new_v4();

        query.set_login_policy(login_policy(instance, Some(org_id), false));
        let first = resolver.resolve_login_policy(instance, org_id).unwrap();
        assert!(!first.policy.force_mfa);

        // Mutate the underlying store directly without invalidating: the
        // resolver must keep serving the cached value.
        query.set_login_policy(login_policy(instance, Some(org_id), true));
        let still_cached = resolver.resolve_login_policy(instance, org_id).unwrap();
        assert!(!still_cached.policy.force_mfa);

        resolver.invalidate_login_policy(instance, org_id);
        let fresh = resolver.resolve_login_policy(instance, org_id).unwrap();
        assert!(fresh.policy.force_mfa);
    }

    #[test]
    fn password_complexity_falls_back_to_built_in_default() {
        let (resolver, _query) = resolver();
        let instance = InstanceId(Uuid::new_v4());

        let policy = resolver.resolve_password_complexity_policy(instance, None);
        assert_eq!(policy.min_length, 8);
        assert!(policy.has_uppercase);
    }

    #[test]
    fn instance_wide_invalidation_drops_every_cached_org_entry() {
        let (resolver, query) = resolver();
        let instance = InstanceId(Uuid::new_v4());
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        query.set_login_policy(login_policy(instance, None, false));
        resolver.resolve_login_policy(instance, org_a);
        resolver.resolve_login_policy(instance, org_b);

        query.set_login_policy(login_policy(instance, None, true));
        resolver.invalidate_login_policy_instance_wide(instance);

        let a = resolver.resolve_login_policy(instance, org_a).unwrap();
        let b = resolver.resolve_login_policy(instance, org_b).unwrap();
        assert!(a.policy.force_mfa);
        assert!(b.policy.force_mfa);
    }
}
