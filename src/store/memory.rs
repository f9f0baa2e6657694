//! An in-memory [`EventStore`], used as a fast test double for the Postgres implementation.
//!
//! It upholds the same invariants (dense per-aggregate sequences, strictly
//! increasing global position, atomic multi-event appends) so code exercised
//! against it behaves identically against [`crate::store::postgres::PgEventStore`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{Event, EventFilter, NewEvent};
use crate::store::EventStore;
use crate::types::{InstanceId, Position, SequenceNumber};

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    keys: HashSet<(String, Uuid, SequenceNumber)>,
}

/// In-memory, process-local event store. Cloning shares the underlying log via [`Arc`].
#[derive(Clone, Default)]
pub struct MemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(
        &self,
        events: Vec<NewEvent>,
        expected_sequence: Option<SequenceNumber>,
    ) -> Result<Vec<Event>, DomainError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut inner = self.inner.write().await;

        let aggregate_type = events[0].aggregate_type.clone();
        let aggregate_id = events[0].aggregate_id;
        let current_sequence = inner
            .events
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .map(|e| e.sequence)
            .max()
            .unwrap_or(0);

        if let Some(expected) = expected_sequence {
            if expected != current_sequence {
                return Err(DomainError::concurrency_conflict(format!(
                    "expected sequence {expected} for {aggregate_type}/{aggregate_id}, found {current_sequence}"
                )));
            }
        }

        let mut next_position = inner.events.iter().map(|e| e.position).max().unwrap_or(0) + 1;
        let mut next_sequence = current_sequence + 1;
        let now = Utc::now();

        let mut appended = Vec::with_capacity(events.len());
        for new_event in events {
            if new_event.aggregate_type != aggregate_type || new_event.aggregate_id != aggregate_id {
                return Err(DomainError::internal(
                    "MULTI_AGGREGATE_APPEND",
                    "a single append call must target exactly one aggregate",
                ));
            }

            let key = (aggregate_type.clone(), aggregate_id, next_sequence);
            if inner.keys.contains(&key) {
                return Err(DomainError::concurrency_conflict(format!(
                    "duplicate sequence {next_sequence} for {aggregate_type}/{aggregate_id}"
                )));
            }

            let event = Event {
                position: next_position,
                aggregate_type: new_event.aggregate_type,
                aggregate_id: new_event.aggregate_id,
                sequence: next_sequence,
                event_type: new_event.event_type,
                created_at: now,
                editor: new_event.editor,
                resource_owner: new_event.resource_owner,
                instance_id: new_event.instance_id,
                payload: new_event.payload,
            };

            inner.keys.insert(key);
            appended.push(event.clone());
            inner.events.push(event);

            next_position += 1;
            next_sequence += 1;
        }

        Ok(appended)
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>, DomainError> {
        let inner = self.inner.read().await;
        let mut results: Vec<Event> = inner.events.iter().filter(|e| filter.matches(e)).cloned().collect();
        results.sort_by_key(|e| e.position);
        Ok(results)
    }

    async fn latest_position(&self, filter: &EventFilter) -> Result<Option<Position>, DomainError> {
        let inner = self.inner.read().await;
        Ok(inner.events.iter().filter(|e| filter.matches(e)).map(|e| e.position).max())
    }

    async fn latest_event(&self, aggregate_type: &str, aggregate_id: Uuid) -> Result<Option<Event>, DomainError> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .max_by_key(|e| e.sequence)
            .cloned())
    }

    async fn count(&self, filter: &EventFilter) -> Result<u64, DomainError> {
        let inner = self.inner.read().await;
        Ok(inner.events.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn events_after_position(&self, position: Position, limit: u32) -> Result<Vec<Event>, DomainError> {
        let inner = self.inner.read().await;
        let mut results: Vec<Event> = inner.events.iter().filter(|e| e.position > position).cloned().collect();
        results.sort_by_key(|e| e.position);
        results.truncate(limit as usize);
        Ok(results)
    }

    async fn distinct_instance_ids(&self) -> Result<Vec<InstanceId>, DomainError> {
        let inner = self.inner.read().await;
        let mut ids: Vec<InstanceId> = inner
            .events
            .iter()
            .map(|e| e.instance_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::types::ResourceOwner;

    fn new_event(aggregate_id: Uuid, instance: InstanceId) -> NewEvent {
        NewEvent {
            aggregate_type: "org".to_string(),
            aggregate_id,
            event_type: "org.created".to_string(),
            editor: Some("tester".to_string()),
            resource_owner: ResourceOwner(aggregate_id),
            instance_id: instance,
            payload: EventPayload::OrgCreated { name: "acme".to_string() },
        }
    }

    #[tokio::test]
    async fn append_assigns_dense_sequence_and_monotonic_position() {
        let store = MemoryEventStore::new();
        let instance = InstanceId(Uuid::new_v4());
        let aggregate_id = Uuid::new_v4();

        let first = store.append(vec![new_event(aggregate_id, instance)], None).await.unwrap();
        assert_eq!(first[0].sequence, 1);

        let second = store
            .append(vec![new_event(aggregate_id, instance)], Some(1))
            .await
            .unwrap();
        assert_eq!(second[0].sequence, 2);
        assert!(second[0].position > first[0].position);
    }

    #[tokio::test]
    async fn stale_expected_sequence_is_a_concurrency_conflict() {
        let store = MemoryEventStore::new();
        let instance = InstanceId(Uuid::new_v4());
        let aggregate_id = Uuid::new_v4();

        store.append(vec![new_event(aggregate_id, instance)], None).await.unwrap();

        let err = store
            .append(vec![new_event(aggregate_id, instance)], Some(0))
            .await
            .unwrap_err();
        assert_eq!(err.code, "CONCURRENCY_CONFLICT");
    }

    #[tokio::test]
    async fn query_scopes_by_instance_and_orders_by_position() {
        let store = MemoryEventStore::new();
        let instance_a = InstanceId(Uuid::new_v4());
        let instance_b = InstanceId(Uuid::new_v4());

        store.append(vec![new_event(Uuid::new_v4(), instance_a)], None).await.unwrap();
        store.append(vec![new_event(Uuid::new_v4(), instance_b)], None).await.unwrap();

        let filter = EventFilter::new().with_instance(instance_a);
        let results = store.query(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].instance_id, instance_a);
    }
}
