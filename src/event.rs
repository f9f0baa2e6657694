//! The immutable event record appended to and replayed from the [`crate::store::EventStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{InstanceId, Position, ResourceOwner, SequenceNumber};

/// A single immutable fact recorded against an aggregate.
///
/// Invariants (spec.md §3): `(aggregate_type, aggregate_id, sequence)` is
/// unique; `position` is strictly increasing across the entire store; events
/// are never updated or deleted once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub position: Position,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub sequence: SequenceNumber,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub editor: Option<String>,
    pub resource_owner: ResourceOwner,
    pub instance_id: InstanceId,
    pub payload: EventPayload,
}

/// An event yet to be appended: everything an aggregate knows about the fact
/// before the store assigns it a `position` and a persisted timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub editor: Option<String>,
    pub resource_owner: ResourceOwner,
    pub instance_id: InstanceId,
    pub payload: EventPayload,
}

/// Dynamically-typed event payload.
///
/// Per the design note "Dynamic payloads": the source represents payloads as
/// ad-hoc dynamically typed blobs. We keep a tagged variant per well-known
/// event type plus an opaque fallback so projections can validate the shape
/// they expect at the read boundary, while still round-tripping event types
/// this build doesn't know about (forward compatibility across deploys).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    OrgCreated { name: String },
    OrgRenamed { name: String },
    OrgStateChanged { state: String },
    OrgDomainAdded { domain: String, verified: bool, primary: bool },
    OrgDomainVerified { domain: String },
    OrgDomainPrimarySet { domain: String },
    OrgDomainRemoved { domain: String },

    UserCreated { username: String, user_type: String },
    UserStateChanged { state: String },
    UserEmailVerified { email: String },
    UserPhoneVerified { phone: String },

    SessionCreated { user_id: Uuid, expires_at: Option<DateTime<Utc>> },
    SessionTerminated,

    UserGrantAdded { project_id: Uuid, project_grant_id: Option<Uuid>, roles: Vec<String> },
    UserGrantRolesChanged { roles: Vec<String> },
    UserGrantDeactivated,
    UserGrantReactivated,

    LoginPolicySet {
        allow_username_password: bool,
        allow_registration: bool,
        allow_external_idp: bool,
        force_mfa: bool,
        force_mfa_local_only: bool,
    },

    /// Forward-compatible fallback for event types this build does not yet
    /// model explicitly. Projections must reject (not silently drop) unknown
    /// types they are required to understand; they may skip types they don't
    /// consume.
    Unknown(serde_json::Value),
}

impl EventPayload {
    /// The event type name this payload would be stored under, used when
    /// constructing a [`NewEvent`] without repeating the tag as a string.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::OrgCreated { .. } => "org.created",
            EventPayload::OrgRenamed { .. } => "org.renamed",
            EventPayload::OrgStateChanged { .. } => "org.state_changed",
            EventPayload::OrgDomainAdded { .. } => "org.domain_added",
            EventPayload::OrgDomainVerified { .. } => "org.domain_verified",
            EventPayload::OrgDomainPrimarySet { .. } => "org.domain_primary_set",
            EventPayload::OrgDomainRemoved { .. } => "org.domain_removed",
            EventPayload::UserCreated { .. } => "user.created",
            EventPayload::UserStateChanged { .. } => "user.state_changed",
            EventPayload::UserEmailVerified { .. } => "user.email_verified",
            EventPayload::UserPhoneVerified { .. } => "user.phone_verified",
            EventPayload::SessionCreated { .. } => "session.created",
            EventPayload::SessionTerminated => "session.terminated",
            EventPayload::UserGrantAdded { .. } => "user_grant.added",
            EventPayload::UserGrantRolesChanged { .. } => "user_grant.roles_changed",
            EventPayload::UserGrantDeactivated => "user_grant.deactivated",
            EventPayload::UserGrantReactivated => "user_grant.reactivated",
            EventPayload::LoginPolicySet { .. } => "login_policy.set",
            EventPayload::Unknown(_) => "unknown",
        }
    }
}

/// Filter used by [`crate::store::EventStore::query`] and friends.
///
/// Every field is optional and filters compose by AND; an absent field means
/// "no restriction on this dimension". `instance_ids` is intentionally not
/// optional-by-convention at the call site: every caller in this crate is
/// required to set it (see spec.md §4.4 tenancy rule), but the type itself
/// allows an empty filter for store-internal maintenance tasks such as
/// `distinct_instance_ids`.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub instance_ids: Vec<InstanceId>,
    pub aggregate_types: Vec<String>,
    pub aggregate_ids: Vec<Uuid>,
    pub event_types: Vec<String>,
    pub editor: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub position_after: Option<Position>,
    pub position_before: Option<Position>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_ids.push(instance_id);
        self
    }

    pub fn with_aggregate(mut self, aggregate_type: impl Into<String>, aggregate_id: Uuid) -> Self {
        self.aggregate_types.push(aggregate_type.into());
        self.aggregate_ids.push(aggregate_id);
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.instance_ids.is_empty() && !self.instance_ids.contains(&event.instance_id) {
            return false;
        }
        if !self.aggregate_types.is_empty() && !self.aggregate_types.contains(&event.aggregate_type) {
            return false;
        }
        if !self.aggregate_ids.is_empty() && !self.aggregate_ids.contains(&event.aggregate_id) {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(editor) = &self.editor {
            if event.editor.as_deref() != Some(editor.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if event.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if event.created_at > before {
                return false;
            }
        }
        if let Some(after) = self.position_after {
            if event.position <= after {
                return false;
            }
        }
        if let Some(before) = self.position_before {
            if event.position >= before {
                return false;
            }
        }
        true
    }
}
