//! In-memory read-model tables and the [`Projection`]s that populate them.
//!
//! Used as the fast test double for [`crate::query::postgres`], which keeps
//! the same `(instance_id, aggregate_id)` keying and the same tenant-scoping
//! discipline against real `projections_*` tables instead of these
//! `HashMap`s.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{Event, EventPayload};
use crate::projection::Projection;
use crate::query::model::{
    InstanceFeaturesRow, LoginPolicyRow, OrgDomainRow, OrgRow, OrgState, UserGrantRow, UserRow, UserState, UserType,
};
use crate::types::InstanceId;

#[derive(Default)]
pub struct Tables {
    pub orgs: std::sync::RwLock<HashMap<(InstanceId, Uuid), OrgRow>>,
    pub org_domains: std::sync::RwLock<HashMap<(InstanceId, Uuid, String), OrgDomainRow>>,
    pub users: std::sync::RwLock<HashMap<(InstanceId, Uuid), UserRow>>,
    pub user_grants: std::sync::RwLock<HashMap<(InstanceId, Uuid), UserGrantRow>>,
    pub login_policies: std::sync::RwLock<HashMap<(InstanceId, Option<Uuid>), LoginPolicyRow>>,
    pub instance_features: std::sync::RwLock<HashMap<InstanceId, InstanceFeaturesRow>>,
    pub system_features: std::sync::RwLock<Option<InstanceFeaturesRow>>,
}

pub struct OrgProjection {
    pub tables: Arc<Tables>,
}

#[async_trait]
impl Projection for OrgProjection {
    fn name(&self) -> &'static str {
        "orgs"
    }

    fn event_types(&self) -> &[&'static str] {
        &[
            "org.created",
            "org.renamed",
            "org.state_changed",
            "org.domain_added",
            "org.domain_verified",
            "org.domain_primary_set",
            "org.domain_removed",
        ]
    }

    async fn apply(&self, event: &Event) -> Result<(), DomainError> {
        let key = (event.instance_id, event.aggregate_id);
        match &event.payload {
            EventPayload::OrgCreated { name } => {
                let mut orgs = self.tables.orgs.write().unwrap();
                let row = orgs.entry(key).or_insert_with(|| OrgRow {
                    id: event.aggregate_id,
                    instance_id: event.instance_id,
                    name: name.clone(),
                    state: OrgState::Active,
                    primary_domain: None,
                    sequence: event.sequence,
                    created_at: event.created_at,
                });
                row.name = name.clone();
                row.state = OrgState::Active;
                row.sequence = event.sequence;
                Ok(())
            }
            EventPayload::OrgRenamed { name } => {
                if let Some(row) = self.tables.orgs.write().unwrap().get_mut(&key) {
                    row.name = name.clone();
                    row.sequence = event.sequence;
                }
                Ok(())
            }
            EventPayload::OrgStateChanged { state } => {
                if let Some(row) = self.tables.orgs.write().unwrap().get_mut(&key) {
                    row.state = match state.as_str() {
                        "ACTIVE" => OrgState::Active,
                        "INACTIVE" => OrgState::Inactive,
                        _ => OrgState::Unspecified,
                    };
                    row.sequence = event.sequence;
                }
                Ok(())
            }
            EventPayload::OrgDomainAdded { domain, verified, primary } => {
                let mut domains = self.tables.org_domains.write().unwrap();
                if *primary {
                    for (k, d) in domains.iter_mut() {
                        if k.0 == event.instance_id && k.1 == event.aggregate_id {
                            d.primary = false;
                        }
                    }
                }
                domains.insert(
                    (event.instance_id, event.aggregate_id, domain.clone()),
                    OrgDomainRow {
                        org_id: event.aggregate_id,
                        instance_id: event.instance_id,
                        domain: domain.clone(),
                        verified: *verified,
                        primary: *primary,
                        validation_method: None,
                        validation_code: None,
                    },
                );
                if *primary {
                    if let Some(row) = self.tables.orgs.write().unwrap().get_mut(&key) {
                        row.primary_domain = Some(domain.clone());
                    }
                }
                Ok(())
            }
            EventPayload::OrgDomainVerified { domain } => {
                if let Some(row) = self
                    .tables
                    .org_domains
                    .write()
                    .unwrap()
                    .get_mut(&(event.instance_id, event.aggregate_id, domain.clone()))
                {
                    row.verified = true;
                }
                Ok(())
            }
            EventPayload::OrgDomainPrimarySet { domain } => {
                let mut domains = self.tables.org_domains.write().unwrap();
                for (k, d) in domains.iter_mut() {
                    if k.0 == event.instance_id && k.1 == event.aggregate_id {
                        d.primary = k.2 == *domain;
                    }
                }
                if let Some(row) = self.tables.orgs.write().unwrap().get_mut(&key) {
                    row.primary_domain = Some(domain.clone());
                }
                Ok(())
            }
            EventPayload::OrgDomainRemoved { domain } => {
                self.tables
                    .org_domains
                    .write()
                    .unwrap()
                    .remove(&(event.instance_id, event.aggregate_id, domain.clone()));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<(), DomainError> {
        self.tables.orgs.write().unwrap().clear();
        self.tables.org_domains.write().unwrap().clear();
        Ok(())
    }
}

pub struct UserProjection {
    pub tables: Arc<Tables>,
}

#[async_trait]
impl Projection for UserProjection {
    fn name(&self) -> &'static str {
        "users"
    }

    fn event_types(&self) -> &[&'static str] {
        &["user.created", "user.state_changed", "user.email_verified", "user.phone_verified"]
    }

    async fn apply(&self, event: &Event) -> Result<(), DomainError> {
        let key = (event.instance_id, event.aggregate_id);
        let mut users = self.tables.users.write().unwrap();
        match &event.payload {
            EventPayload::UserCreated { username, user_type } => {
                users.insert(
                    key,
                    UserRow {
                        id: event.aggregate_id,
                        instance_id: event.instance_id,
                        resource_owner: event.resource_owner.0,
                        state: UserState::Initial,
                        user_type: if user_type == "HUMAN" { UserType::Human } else { UserType::Machine },
                        username: username.clone(),
                        email_verified: false,
                        phone_verified: false,
                    },
                );
                Ok(())
            }
            EventPayload::UserStateChanged { state } => {
                if let Some(row) = users.get_mut(&key) {
                    row.state = match state.as_str() {
                        "ACTIVE" => UserState::Active,
                        "INACTIVE" => UserState::Inactive,
                        "DELETED" => UserState::Deleted,
                        "LOCKED" => UserState::Locked,
                        "SUSPENDED" => UserState::Suspended,
                        "INITIAL" => UserState::Initial,
                        _ => UserState::Unspecified,
                    };
                }
                Ok(())
            }
            EventPayload::UserEmailVerified { .. } => {
                if let Some(row) = users.get_mut(&key) {
                    row.email_verified = true;
                }
                Ok(())
            }
            EventPayload::UserPhoneVerified { .. } => {
                if let Some(row) = users.get_mut(&key) {
                    row.phone_verified = true;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<(), DomainError> {
        self.tables.users.write().unwrap().clear();
        Ok(())
    }
}

pub struct UserGrantProjection {
    pub tables: Arc<Tables>,
}

#[async_trait]
impl Projection for UserGrantProjection {
    fn name(&self) -> &'static str {
        "user_grants"
    }

    fn event_types(&self) -> &[&'static str] {
        &["user_grant.added", "user_grant.roles_changed", "user_grant.deactivated", "user_grant.reactivated"]
    }

    async fn apply(&self, event: &Event) -> Result<(), DomainError> {
        let key = (event.instance_id, event.aggregate_id);
        let mut grants = self.tables.user_grants.write().unwrap();
        match &event.payload {
            EventPayload::UserGrantAdded { project_id, project_grant_id, roles } => {
                // The user_grant aggregate id is the grant id; the owning user
                // is carried as the event's resource_owner in this simplified
                // model (a real deployment would add a dedicated field).
                grants.insert(
                    key,
                    UserGrantRow {
                        id: event.aggregate_id,
                        instance_id: event.instance_id,
                        user_id: event.resource_owner.0,
                        project_id: *project_id,
                        project_grant_id: *project_grant_id,
                        roles: roles.clone(),
                        active: true,
                    },
                );
                Ok(())
            }
            EventPayload::UserGrantRolesChanged { roles } => {
                if let Some(row) = grants.get_mut(&key) {
                    row.roles = roles.clone();
                }
                Ok(())
            }
            EventPayload::UserGrantDeactivated => {
                if let Some(row) = grants.get_mut(&key) {
                    row.active = false;
                }
                Ok(())
            }
            EventPayload::UserGrantReactivated => {
                if let Some(row) = grants.get_mut(&key) {
                    row.active = true;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<(), DomainError> {
        self.tables.user_grants.write().unwrap().clear();
        Ok(())
    }
}
