//! The row shape `events` is read back as, and its conversion to the domain [`Event`].

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{Event, EventPayload};
use crate::types::{InstanceId, ResourceOwner};

#[derive(FromRow)]
pub struct DbEvent {
    pub position: i64,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub sequence: i64,
    pub event_type: String,
    pub payload: Json<EventPayload>,
    pub editor: Option<String>,
    pub resource_owner: Uuid,
    pub instance_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbEvent> for Event {
    type Error = DomainError;

    fn try_from(row: DbEvent) -> Result<Self, Self::Error> {
        Ok(Event {
            position: row.position,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            sequence: row.sequence,
            event_type: row.event_type,
            created_at: row.created_at,
            editor: row.editor,
            resource_owner: ResourceOwner(row.resource_owner),
            instance_id: InstanceId(row.instance_id),
            payload: row.payload.0,
        })
    }
}
