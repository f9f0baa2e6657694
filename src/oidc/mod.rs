//! The AuthN/AuthZ surface (C6): OAuth/OIDC request validation, session and
//! token lifecycle, and the grant checks that gate every protected call.

pub mod jar;
pub mod session;
pub mod token;

use uuid::Uuid;

use crate::error::DomainError;
use crate::query::QueryLayer;
use crate::types::InstanceId;

/// Wraps [`QueryLayer::check_user_grant`] with the Table E error mapping
/// (spec.md §7): a missing grant or missing role is PERMISSION_DENIED, never
/// NOT_FOUND, since disclosing "this project doesn't exist" to a caller with
/// no grant on it would leak its existence.
#[tracing::instrument(skip_all, fields(instance_id = %instance_id, user_id = %user_id, project_id = %project_id), err)]
pub fn authorize_grant(
    query: &QueryLayer,
    instance_id: InstanceId,
    user_id: Uuid,
    project_id: Uuid,
    role: Option<&str>,
) -> Result<(), DomainError> {
    let result = query.check_user_grant(instance_id, user_id, project_id, role);

    if !result.exists {
        return Err(DomainError::permission_denied("GRANT_MISSING", "no active grant on this project"));
    }
    if !result.has_role {
        return Err(DomainError::permission_denied("GRANT_ROLE_MISSING", "grant does not include the required role"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::aggregates::user_grant::{UserGrant, UserGrantCommand};
    use crate::error::Status;
    use crate::manager::AggregateRepository;
    use crate::projection::Projection;
    use crate::query::store::{Tables, UserGrantProjection};
    use crate::store::memory::MemoryEventStore;
    use crate::store::EventStore;
    use crate::types::ResourceOwner;

    // The user grant aggregate's resource_owner is set to the granted user,
    // matching what UserGrantProjection reads `user_id` from.
    async fn seed_grant(
        store: &Arc<MemoryEventStore>,
        tables: &Arc<Tables>,
        instance_id: InstanceId,
        user_id: Uuid,
        project_id: Uuid,
        roles: Vec<String>,
    ) {
        let repo: AggregateRepository<UserGrant, MemoryEventStore> = AggregateRepository::new(store.clone());
        let grant_id = Uuid::new_v4();

        repo.handle_command(
            instance_id,
            ResourceOwner(user_id),
            grant_id,
            None,
            UserGrantCommand::Add { project_id, project_grant_id: None, roles },
        )
        .await
        .unwrap()
        .unwrap();

        let events = store.query(&crate::event::EventFilter::new().with_aggregate(UserGrant::NAME, grant_id)).await.unwrap();
        let projection = UserGrantProjection { tables: tables.clone() };
        for event in &events {
            projection.apply(event).await.unwrap();
        }
    }

    #[tokio::test]
    async fn missing_grant_is_permission_denied_not_found() {
        let tables = Arc::new(Tables::default());
        let query = QueryLayer::new(tables);
        let instance_id = InstanceId(Uuid::new_v4());

        let err = authorize_grant(&query, instance_id, Uuid::new_v4(), Uuid::new_v4(), None).unwrap_err();
        assert_eq!(err.status(), Status::PermissionDenied);
        assert_eq!(err.code, "GRANT_MISSING");
    }

    #[tokio::test]
    async fn grant_without_required_role_is_permission_denied() {
        let store = Arc::new(MemoryEventStore::new());
        let tables = Arc::new(Tables::default());
        let user_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let instance_id = InstanceId(Uuid::new_v4());

        seed_grant(&store, &tables, instance_id, user_id, project_id, vec!["viewer".to_string()]).await;

        let query = QueryLayer::new(tables);
        let err = authorize_grant(&query, instance_id, user_id, project_id, Some("admin")).unwrap_err();
        assert_eq!(err.code, "GRANT_ROLE_MISSING");
    }

    #[tokio::test]
    async fn matching_grant_and_role_authorizes() {
        let store = Arc::new(MemoryEventStore::new());
        let tables = Arc::new(Tables::default());
        let user_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let instance_id = InstanceId(Uuid::new_v4());

        seed_grant(&store, &tables, instance_id, user_id, project_id, vec!["admin".to_string()]).await;

        let query = QueryLayer::new(tables);
        assert!(authorize_grant(&query, instance_id, user_id, project_id, Some("admin")).is_ok());
    }
}
