//! Default Postgres implementation of [`EventStore`].
//!
//! Generalizes the teacher library's `PgStore`: a single `events` table
//! shared by every aggregate type (spec.md's persisted state layout, §6),
//! rather than one table per aggregate as the teacher's per-aggregate
//! `{name}_events` convention does — this crate serves many aggregate types
//! behind one tenant-scoped store, so a shared table with an
//! `(instance_id, aggregate_type, aggregate_id)` index is the natural fit.

use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::{Event, EventFilter, NewEvent};
use crate::sql::event::DbEvent;
use crate::store::EventStore;
use crate::types::{InstanceId, Position, SequenceNumber};

fn map_sqlx_err(err: sqlx::Error) -> DomainError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.constraint() == Some("events_aggregate_sequence_key") => {
            DomainError::concurrency_conflict(db_err.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => DomainError::unavailable("UNAVAILABLE", err.to_string()),
        _ => DomainError::internal("EVENTSTORE_QUERY_FAILED", err.to_string()),
    }
}

/// Postgres-backed [`EventStore`]. Cheaply cloneable: internally just a pooled connection handle.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the DDL in [`crate::sql::migrations::all`] against this store's pool.
    pub async fn run_migrations(&self) -> Result<(), DomainError> {
        for statement in crate::sql::migrations::all() {
            sqlx::query(statement).execute(&self.pool).await.map_err(map_sqlx_err)?;
        }
        Ok(())
    }

    async fn current_sequence(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<SequenceNumber, DomainError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) AS max_seq FROM events WHERE aggregate_type = $1 AND aggregate_id = $2",
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.try_get::<i64, _>("max_seq").map_err(map_sqlx_err)?)
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[tracing::instrument(
        skip_all,
        fields(
            aggregate_type = %events.first().map(|e| e.aggregate_type.as_str()).unwrap_or_default(),
            aggregate_id = %events.first().map(|e| e.aggregate_id).unwrap_or(Uuid::nil()),
            instance_id = %events.first().map(|e| e.instance_id.0).unwrap_or(Uuid::nil()),
        ),
        err
    )]
    async fn append(
        &self,
        events: Vec<NewEvent>,
        expected_sequence: Option<SequenceNumber>,
    ) -> Result<Vec<Event>, DomainError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let aggregate_type = events[0].aggregate_type.clone();
        let aggregate_id = events[0].aggregate_id;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let current_sequence = self.current_sequence(&mut tx, &aggregate_type, aggregate_id).await?;
        if let Some(expected) = expected_sequence {
            if expected != current_sequence {
                return Err(DomainError::concurrency_conflict(format!(
                    "expected sequence {expected} for {aggregate_type}/{aggregate_id}, found {current_sequence}"
                )));
            }
        }

        let mut next_sequence = current_sequence + 1;
        let mut appended = Vec::with_capacity(events.len());

        for new_event in events {
            let row: DbEvent = sqlx::query_as(
                "INSERT INTO events
                 (aggregate_type, aggregate_id, sequence, event_type, payload, editor, resource_owner, instance_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING position, aggregate_type, aggregate_id, sequence, event_type, payload,
                           editor, resource_owner, instance_id, created_at",
            )
            .bind(&new_event.aggregate_type)
            .bind(new_event.aggregate_id)
            .bind(next_sequence)
            .bind(&new_event.event_type)
            .bind(Json(&new_event.payload))
            .bind(&new_event.editor)
            .bind(new_event.resource_owner.0)
            .bind(new_event.instance_id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            appended.push(row.try_into()?);
            next_sequence += 1;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(appended)
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>, DomainError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT position, aggregate_type, aggregate_id, sequence, event_type, payload,
                    editor, resource_owner, instance_id, created_at FROM events WHERE 1=1",
        );
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY position ASC");

        let rows: Vec<DbEvent> = builder.build_query_as().fetch_all(&self.pool).await.map_err(map_sqlx_err)?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn latest_position(&self, filter: &EventFilter) -> Result<Option<Position>, DomainError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT MAX(position) AS max_pos FROM events WHERE 1=1");
        push_filter(&mut builder, filter);

        let row = builder.build().fetch_one(&self.pool).await.map_err(map_sqlx_err)?;
        Ok(row.try_get::<Option<i64>, _>("max_pos").map_err(map_sqlx_err)?)
    }

    async fn latest_event(&self, aggregate_type: &str, aggregate_id: Uuid) -> Result<Option<Event>, DomainError> {
        let row: Option<DbEvent> = sqlx::query_as(
            "SELECT position, aggregate_type, aggregate_id, sequence, event_type, payload,
                    editor, resource_owner, instance_id, created_at
             FROM events WHERE aggregate_type = $1 AND aggregate_id = $2
             ORDER BY sequence DESC LIMIT 1",
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(Event::try_from).transpose()
    }

    async fn count(&self, filter: &EventFilter) -> Result<u64, DomainError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) AS total FROM events WHERE 1=1");
        push_filter(&mut builder, filter);

        let row = builder.build().fetch_one(&self.pool).await.map_err(map_sqlx_err)?;
        let total: i64 = row.try_get("total").map_err(map_sqlx_err)?;
        Ok(total as u64)
    }

    async fn events_after_position(&self, position: Position, limit: u32) -> Result<Vec<Event>, DomainError> {
        let rows: Vec<DbEvent> = sqlx::query_as(
            "SELECT position, aggregate_type, aggregate_id, sequence, event_type, payload,
                    editor, resource_owner, instance_id, created_at
             FROM events WHERE position > $1 ORDER BY position ASC LIMIT $2",
        )
        .bind(position)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn distinct_instance_ids(&self) -> Result<Vec<InstanceId>, DomainError> {
        let rows = sqlx::query("SELECT DISTINCT instance_id FROM events ORDER BY instance_id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        rows.into_iter()
            .map(|row| row.try_get::<Uuid, _>("instance_id").map(InstanceId).map_err(map_sqlx_err))
            .collect()
    }
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a EventFilter) {
    if !filter.instance_ids.is_empty() {
        let ids: Vec<Uuid> = filter.instance_ids.iter().map(|i| i.0).collect();
        builder.push(" AND instance_id = ANY(").push_bind(ids).push(")");
    }
    if !filter.aggregate_types.is_empty() {
        builder.push(" AND aggregate_type = ANY(").push_bind(filter.aggregate_types.clone()).push(")");
    }
    if !filter.aggregate_ids.is_empty() {
        builder.push(" AND aggregate_id = ANY(").push_bind(filter.aggregate_ids.clone()).push(")");
    }
    if !filter.event_types.is_empty() {
        builder.push(" AND event_type = ANY(").push_bind(filter.event_types.clone()).push(")");
    }
    if let Some(editor) = &filter.editor {
        builder.push(" AND editor = ").push_bind(editor.clone());
    }
    if let Some(after) = filter.created_after {
        builder.push(" AND created_at > ").push_bind(after);
    }
    if let Some(before) = filter.created_before {
        builder.push(" AND created_at < ").push_bind(before);
    }
    if let Some(after) = filter.position_after {
        builder.push(" AND position > ").push_bind(after);
    }
    if let Some(before) = filter.position_before {
        builder.push(" AND position < ").push_bind(before);
    }
}
