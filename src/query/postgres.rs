//! Postgres-backed read model for the query layer (C4): real `projections_*`
//! tables (spec.md §6 `projections.<name>`) instead of the in-memory
//! `Tables` in [`crate::query::store`], which stays as the fast test double.
//!
//! Generalizes [`crate::store::postgres::PgEventStore`]'s pattern (a
//! `sqlx::PgPool`-backed implementation of a trait the in-memory type also
//! satisfies) to the read side: [`PgOrgProjection`]/[`PgUserProjection`]/
//! [`PgUserGrantProjection`] implement the same [`Projection`] trait
//! `src/query/store.rs`'s in-memory projections do, and [`PgQueryLayer`]
//! answers the same questions [`crate::query::QueryLayer`] does, over real
//! tables instead of `HashMap`s.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{Event, EventPayload};
use crate::projection::Projection;
use crate::query::column::{Column, Page, Pagination, SortOrder};
use crate::query::model::{OrgDomainRow, OrgRow, OrgState, UserGrantRow};
use crate::query::{GrantCheckResult, OrgSearchFilter};
use crate::types::InstanceId;

fn map_sqlx_err(err: sqlx::Error) -> DomainError {
    DomainError::internal("QUERY_STORE_FAILED", err.to_string())
}

fn org_state_from_str(state: &str) -> OrgState {
    match state {
        "ACTIVE" => OrgState::Active,
        "INACTIVE" => OrgState::Inactive,
        _ => OrgState::Unspecified,
    }
}

/// Upserts into `projections_orgs`/`projections_org_domains` (spec.md §4.3 "org" projections).
pub struct PgOrgProjection {
    pool: PgPool,
}

impl PgOrgProjection {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Projection for PgOrgProjection {
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

    #[tracing::instrument(skip_all, fields(event_type = %event.event_type, aggregate_id = %event.aggregate_id, instance_id = %event.instance_id), err)]
    async fn apply(&self, event: &Event) -> Result<(), DomainError> {
        match &event.payload {
            EventPayload::OrgCreated { name } => {
                sqlx::query(
                    "INSERT INTO projections_orgs (instance_id, id, name, state, primary_domain, sequence, created_at)
                     VALUES ($1, $2, $3, 'ACTIVE', NULL, $4, $5)
                     ON CONFLICT (instance_id, id) DO UPDATE SET name = $3, state = 'ACTIVE', sequence = $4",
                )
                .bind(event.instance_id.0)
                .bind(event.aggregate_id)
                .bind(name)
                .bind(event.sequence)
                .bind(event.created_at)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::OrgRenamed { name } => {
                sqlx::query("UPDATE projections_orgs SET name = $1, sequence = $2 WHERE instance_id = $3 AND id = $4")
                    .bind(name)
                    .bind(event.sequence)
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::OrgStateChanged { state } => {
                sqlx::query("UPDATE projections_orgs SET state = $1, sequence = $2 WHERE instance_id = $3 AND id = $4")
                    .bind(state)
                    .bind(event.sequence)
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::OrgDomainAdded { domain, verified, primary } => {
                let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
                if *primary {
                    sqlx::query("UPDATE projections_org_domains SET is_primary = FALSE WHERE instance_id = $1 AND org_id = $2")
                        .bind(event.instance_id.0)
                        .bind(event.aggregate_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_err)?;
                }
                sqlx::query(
                    "INSERT INTO projections_org_domains (instance_id, org_id, domain, verified, is_primary)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (instance_id, org_id, domain) DO UPDATE SET verified = $4, is_primary = $5",
                )
                .bind(event.instance_id.0)
                .bind(event.aggregate_id)
                .bind(domain)
                .bind(verified)
                .bind(primary)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
                if *primary {
                    sqlx::query("UPDATE projections_orgs SET primary_domain = $1 WHERE instance_id = $2 AND id = $3")
                        .bind(domain)
                        .bind(event.instance_id.0)
                        .bind(event.aggregate_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_err)?;
                }
                tx.commit().await.map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::OrgDomainVerified { domain } => {
                sqlx::query(
                    "UPDATE projections_org_domains SET verified = TRUE
                     WHERE instance_id = $1 AND org_id = $2 AND domain = $3",
                )
                .bind(event.instance_id.0)
                .bind(event.aggregate_id)
                .bind(domain)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::OrgDomainPrimarySet { domain } => {
                let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
                sqlx::query(
                    "UPDATE projections_org_domains SET is_primary = (domain = $1)
                     WHERE instance_id = $2 AND org_id = $3",
                )
                .bind(domain)
                .bind(event.instance_id.0)
                .bind(event.aggregate_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
                sqlx::query("UPDATE projections_orgs SET primary_domain = $1 WHERE instance_id = $2 AND id = $3")
                    .bind(domain)
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_err)?;
                tx.commit().await.map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::OrgDomainRemoved { domain } => {
                sqlx::query("DELETE FROM projections_org_domains WHERE instance_id = $1 AND org_id = $2 AND domain = $3")
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .bind(domain)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<(), DomainError> {
        sqlx::query("TRUNCATE projections_orgs, projections_org_domains")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

/// Upserts into `projections_users` (spec.md §4.3 "user" projection).
pub struct PgUserProjection {
    pool: PgPool,
}

impl PgUserProjection {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Projection for PgUserProjection {
    fn name(&self) -> &'static str {
        "users"
    }

    fn event_types(&self) -> &[&'static str] {
        &["user.created", "user.state_changed", "user.email_verified", "user.phone_verified"]
    }

    #[tracing::instrument(skip_all, fields(event_type = %event.event_type, aggregate_id = %event.aggregate_id, instance_id = %event.instance_id), err)]
    async fn apply(&self, event: &Event) -> Result<(), DomainError> {
        match &event.payload {
            EventPayload::UserCreated { username, user_type } => {
                sqlx::query(
                    "INSERT INTO projections_users
                     (instance_id, id, resource_owner, state, user_type, username, email_verified, phone_verified)
                     VALUES ($1, $2, $3, 'INITIAL', $4, $5, FALSE, FALSE)
                     ON CONFLICT (instance_id, id) DO UPDATE SET username = $5, user_type = $4",
                )
                .bind(event.instance_id.0)
                .bind(event.aggregate_id)
                .bind(event.resource_owner.0)
                .bind(user_type)
                .bind(username)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::UserStateChanged { state } => {
                sqlx::query("UPDATE projections_users SET state = $1 WHERE instance_id = $2 AND id = $3")
                    .bind(state)
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::UserEmailVerified { .. } => {
                sqlx::query("UPDATE projections_users SET email_verified = TRUE WHERE instance_id = $1 AND id = $2")
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::UserPhoneVerified { .. } => {
                sqlx::query("UPDATE projections_users SET phone_verified = TRUE WHERE instance_id = $1 AND id = $2")
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<(), DomainError> {
        sqlx::query("TRUNCATE projections_users").execute(&self.pool).await.map_err(map_sqlx_err)?;
        Ok(())
    }
}

/// Upserts into `projections_user_grants` (spec.md §4.3 "user_grant" projection).
pub struct PgUserGrantProjection {
    pool: PgPool,
}

impl PgUserGrantProjection {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Projection for PgUserGrantProjection {
    fn name(&self) -> &'static str {
        "user_grants"
    }

    fn event_types(&self) -> &[&'static str] {
        &["user_grant.added", "user_grant.roles_changed", "user_grant.deactivated", "user_grant.reactivated"]
    }

    #[tracing::instrument(skip_all, fields(event_type = %event.event_type, aggregate_id = %event.aggregate_id, instance_id = %event.instance_id), err)]
    async fn apply(&self, event: &Event) -> Result<(), DomainError> {
        match &event.payload {
            EventPayload::UserGrantAdded { project_id, project_grant_id, roles } => {
                sqlx::query(
                    "INSERT INTO projections_user_grants
                     (instance_id, id, user_id, project_id, project_grant_id, roles, active)
                     VALUES ($1, $2, $3, $4, $5, $6, TRUE)
                     ON CONFLICT (instance_id, id) DO UPDATE SET roles = $6, active = TRUE",
                )
                .bind(event.instance_id.0)
                .bind(event.aggregate_id)
                .bind(event.resource_owner.0)
                .bind(project_id)
                .bind(project_grant_id)
                .bind(roles)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::UserGrantRolesChanged { roles } => {
                sqlx::query("UPDATE projections_user_grants SET roles = $1 WHERE instance_id = $2 AND id = $3")
                    .bind(roles)
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::UserGrantDeactivated => {
                sqlx::query("UPDATE projections_user_grants SET active = FALSE WHERE instance_id = $1 AND id = $2")
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(())
            }
            EventPayload::UserGrantReactivated => {
                sqlx::query("UPDATE projections_user_grants SET active = TRUE WHERE instance_id = $1 AND id = $2")
                    .bind(event.instance_id.0)
                    .bind(event.aggregate_id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<(), DomainError> {
        sqlx::query("TRUNCATE projections_user_grants").execute(&self.pool).await.map_err(map_sqlx_err)?;
        Ok(())
    }
}

const ORGS_TABLE: &str = "projections_orgs";

const ORG_ID: Column = Column::of(ORGS_TABLE, "id");
const ORG_NAME: Column = Column::of(ORGS_TABLE, "name");
const ORG_STATE: Column = Column::of(ORGS_TABLE, "state");
const ORG_PRIMARY_DOMAIN: Column = Column::of(ORGS_TABLE, "primary_domain");
const ORG_SEQUENCE: Column = Column::of(ORGS_TABLE, "sequence");
const ORG_CREATED_AT: Column = Column::of(ORGS_TABLE, "created_at");

/// Read-only query surface over the Postgres-backed `projections_*` tables;
/// the Postgres sibling of [`crate::query::QueryLayer`]. Only the lookups
/// that exercise real SQL composition (org search, pagination, grant check)
/// are implemented here; the rest of C4's surface is shared with the
/// in-memory layer's row types and has no Postgres-specific logic worth
/// duplicating.
#[derive(Clone)]
pub struct PgQueryLayer {
    pool: PgPool,
}

impl PgQueryLayer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip_all, fields(instance_id = %instance_id, org_id = %org_id), err)]
    pub async fn get_org_by_id(&self, instance_id: InstanceId, org_id: Uuid) -> Result<Option<OrgRow>, DomainError> {
        let row = sqlx::query(&format!(
            "SELECT {}, {}, {}, {}, {}, {} FROM {ORGS_TABLE} WHERE instance_id = $1 AND {} = $2",
            ORG_ID.select(),
            ORG_NAME.select(),
            ORG_STATE.select(),
            ORG_PRIMARY_DOMAIN.select(),
            ORG_SEQUENCE.select(),
            ORG_CREATED_AT.select(),
            ORG_ID.identifier(),
        ))
        .bind(instance_id.0)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(|row| org_row_from_row(instance_id, &row)).transpose()
    }

    /// Builds the `SELECT`/`ORDER BY` clauses from [`Column`] and the rest of
    /// the filter through bound parameters via `sqlx::QueryBuilder` (the same
    /// composition approach `store::postgres::PgEventStore::query` uses for
    /// `EventFilter`), and applies [`Pagination`]'s clamped `offset`/`limit`
    /// (spec.md §4.4 "Search grammar", "Pagination").
    #[tracing::instrument(skip_all, fields(instance_id = %instance_id, offset = pagination.offset, limit = pagination.limit), err)]
    pub async fn search_orgs(
        &self,
        instance_id: InstanceId,
        filter: &OrgSearchFilter,
        pagination: Pagination,
    ) -> Result<Page<OrgRow>, DomainError> {
        let select_list = [ORG_ID, ORG_NAME, ORG_STATE, ORG_PRIMARY_DOMAIN, ORG_SEQUENCE, ORG_CREATED_AT]
            .iter()
            .map(Column::select)
            .collect::<Vec<_>>()
            .join(", ");

        let push_where = |builder: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>| {
            builder.push(" WHERE instance_id = ").push_bind(instance_id.0);
            if filter.active_only == Some(true) {
                builder.push(" AND ").push(ORG_STATE.identifier()).push(" = 'ACTIVE'");
            }
            match &filter.name {
                Some(crate::query::StringFilter::Equals(name)) => {
                    builder.push(" AND ").push(ORG_NAME.identifier()).push(" = ").push_bind(name.clone());
                }
                Some(crate::query::StringFilter::Contains(needle)) => {
                    builder
                        .push(" AND ")
                        .push(ORG_NAME.identifier())
                        .push(" ILIKE ")
                        .push_bind(format!("%{needle}%"));
                }
                None => {}
            }
        };

        let mut count_builder = sqlx::QueryBuilder::new(format!("SELECT COUNT(*) AS total FROM {ORGS_TABLE}"));
        push_where(&mut count_builder);
        let total_count: i64 = count_builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .try_get("total")
            .map_err(map_sqlx_err)?;

        let mut page_builder = sqlx::QueryBuilder::new(format!("SELECT {select_list} FROM {ORGS_TABLE}"));
        push_where(&mut page_builder);
        page_builder.push(" ORDER BY ").push(ORG_CREATED_AT.order_by());
        page_builder.push(match pagination.sort_order {
            SortOrder::Asc => " ASC",
            SortOrder::Desc => " DESC",
        });
        page_builder
            .push(" OFFSET ")
            .push_bind(pagination.offset as i64)
            .push(" LIMIT ")
            .push_bind(pagination.limit as i64);

        let rows = page_builder.build().fetch_all(&self.pool).await.map_err(map_sqlx_err)?;

        let orgs = rows
            .iter()
            .map(|row| org_row_from_row(instance_id, row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            rows: orgs,
            total_count: total_count as u64,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    /// Active grants only (spec.md §4.6 "Grant check", §8 scenario 4).
    #[tracing::instrument(skip_all, fields(instance_id = %instance_id, user_id = %user_id, project_id = %project_id), err)]
    pub async fn check_user_grant(
        &self,
        instance_id: InstanceId,
        user_id: Uuid,
        project_id: Uuid,
        role: Option<&str>,
    ) -> Result<GrantCheckResult, DomainError> {
        let row = sqlx::query(
            "SELECT id, user_id, project_id, project_grant_id, roles, active
             FROM projections_user_grants
             WHERE instance_id = $1 AND user_id = $2 AND project_id = $3 AND active = TRUE",
        )
        .bind(instance_id.0)
        .bind(user_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let Some(row) = row else {
            return Ok(GrantCheckResult { exists: false, grant: None, has_role: false, roles: vec![] });
        };

        let roles: Vec<String> = row.try_get("roles").map_err(map_sqlx_err)?;
        let grant = UserGrantRow {
            id: row.try_get("id").map_err(map_sqlx_err)?,
            instance_id,
            user_id: row.try_get("user_id").map_err(map_sqlx_err)?,
            project_id: row.try_get("project_id").map_err(map_sqlx_err)?,
            project_grant_id: row.try_get("project_grant_id").map_err(map_sqlx_err)?,
            roles: roles.clone(),
            active: row.try_get("active").map_err(map_sqlx_err)?,
        };
        let has_role = role.map_or(true, |r| roles.iter().any(|role| role == r));

        Ok(GrantCheckResult { exists: true, grant: Some(grant), has_role, roles })
    }

    #[tracing::instrument(skip_all, fields(instance_id = %instance_id, org_id = %org_id), err)]
    pub async fn get_org_domains_by_id(&self, instance_id: InstanceId, org_id: Uuid) -> Result<Vec<OrgDomainRow>, DomainError> {
        let rows = sqlx::query(
            "SELECT org_id, domain, verified, is_primary FROM projections_org_domains
             WHERE instance_id = $1 AND org_id = $2",
        )
        .bind(instance_id.0)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.iter()
            .map(|row| {
                Ok(OrgDomainRow {
                    org_id: row.try_get("org_id").map_err(map_sqlx_err)?,
                    instance_id,
                    domain: row.try_get("domain").map_err(map_sqlx_err)?,
                    verified: row.try_get("verified").map_err(map_sqlx_err)?,
                    primary: row.try_get("is_primary").map_err(map_sqlx_err)?,
                    validation_method: None,
                    validation_code: None,
                })
            })
            .collect()
    }
}

fn org_row_from_row(instance_id: InstanceId, row: &sqlx::postgres::PgRow) -> Result<OrgRow, DomainError> {
    let state: String = row.try_get("state").map_err(map_sqlx_err)?;
    Ok(OrgRow {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        instance_id,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        state: org_state_from_str(&state),
        primary_domain: row.try_get("primary_domain").map_err(map_sqlx_err)?,
        sequence: row.try_get("sequence").map_err(map_sqlx_err)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_err)?,
    })
}
