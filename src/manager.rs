//! The Aggregate Repository (C2): loads an aggregate by replaying its event stream.

use std::marker::PhantomData;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{EventFilter, NewEvent};
use crate::state::AggregateState;
use crate::store::EventStore;
use crate::types::{InstanceId, ResourceOwner};
use crate::Aggregate;

/// Loads aggregates of a single type `A` by replaying their event stream,
/// and appends the events that command handling produces (spec.md §4.2).
///
/// The repository never mutates state itself: `load` is read-only, and
/// `append_events` is a thin pass-through to the store that exists so
/// callers don't need to depend on [`EventStore`] directly. The actual
/// command-validation step belongs to [`Aggregate::handle_command`], called
/// by the caller before `append_events`.
pub struct AggregateRepository<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    store: Arc<S>,
    _aggregate: PhantomData<A>,
}

impl<A, S> Clone for AggregateRepository<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _aggregate: PhantomData,
        }
    }
}

impl<A, S> AggregateRepository<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store, _aggregate: PhantomData }
    }

    /// Loads aggregate `id`, or `None` if it has never emitted an event.
    #[tracing::instrument(skip_all, fields(aggregate_type = A::NAME, aggregate_id = %id, instance_id = %instance_id), err)]
    pub async fn load(&self, instance_id: InstanceId, id: Uuid) -> Result<Option<AggregateState<A::State>>, DomainError> {
        let filter = EventFilter::new()
            .with_instance(instance_id)
            .with_aggregate(A::NAME, id);

        let events = self.store.query(&filter).await?;
        if events.is_empty() {
            return Ok(None);
        }

        Ok(Some(AggregateState::with_id(id).apply_events::<A>(&events)))
    }

    /// Like [`Self::load`], but fails with a `NOT_FOUND` [`DomainError`] instead of returning `None`.
    pub async fn load_or_throw(&self, instance_id: InstanceId, id: Uuid) -> Result<AggregateState<A::State>, DomainError> {
        self.load(instance_id, id).await?.ok_or_else(|| {
            DomainError::not_found(
                "AGGREGATE_NOT_FOUND",
                format!("{} {id} does not exist", A::NAME),
            )
        })
    }

    /// Whether aggregate `id` has ever emitted an event.
    pub async fn exists(&self, instance_id: InstanceId, id: Uuid) -> Result<bool, DomainError> {
        Ok(self.load(instance_id, id).await?.is_some())
    }

    /// Validates `command` against the current state of aggregate `id` and
    /// persists the resulting events with optimistic concurrency control.
    ///
    /// Returns `Ok(Err(_))` for a domain-rejected command (the aggregate
    /// handled it but said no) and `Err(_)` for a technical failure appending
    /// to the store (e.g. a lost concurrency race — the caller should reload
    /// and retry, per spec.md §4.1).
    #[tracing::instrument(skip_all, fields(aggregate_type = A::NAME, aggregate_id = %id, instance_id = %instance_id), err)]
    pub async fn handle_command(
        &self,
        instance_id: InstanceId,
        resource_owner: ResourceOwner,
        id: Uuid,
        editor: Option<String>,
        command: A::Command,
    ) -> Result<Result<AggregateState<A::State>, A::Error>, DomainError> {
        let state = self.load(instance_id, id).await?.unwrap_or_else(|| AggregateState::with_id(id));

        let payloads = match A::handle_command(state.inner(), command) {
            Ok(payloads) => payloads,
            Err(domain_error) => return Ok(Err(domain_error)),
        };

        let new_events: Vec<NewEvent> = payloads
            .into_iter()
            .map(|payload| NewEvent {
                aggregate_type: A::NAME.to_string(),
                aggregate_id: id,
                event_type: payload.type_name().to_string(),
                editor: editor.clone(),
                resource_owner,
                instance_id,
                payload,
            })
            .collect();

        if new_events.is_empty() {
            return Ok(Ok(state));
        }

        let expected_sequence = Some(state.sequence_number());
        let appended = self.store.append(new_events, expected_sequence).await?;

        Ok(Ok(state.apply_events::<A>(&appended)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::org::{Org, OrgCommand, OrgError};
    use crate::store::memory::MemoryEventStore;

    #[tokio::test]
    async fn handle_command_then_load_round_trips_state() {
        let store = Arc::new(MemoryEventStore::new());
        let repo: AggregateRepository<Org, MemoryEventStore> = AggregateRepository::new(store);
        let instance = InstanceId(Uuid::new_v4());
        let org_id = Uuid::new_v4();

        let outcome = repo
            .handle_command(
                instance,
                ResourceOwner(org_id),
                org_id,
                Some("tester".to_string()),
                OrgCommand::Create { name: "acme".to_string() },
            )
            .await
            .unwrap();

        let state = outcome.unwrap();
        assert_eq!(state.inner().name, "acme");
        assert_eq!(state.sequence_number(), 1);

        let loaded = repo.load(instance, org_id).await.unwrap().unwrap();
        assert_eq!(loaded.inner().name, "acme");
    }

    #[tokio::test]
    async fn double_create_is_rejected_by_the_aggregate_not_the_store() {
        let store = Arc::new(MemoryEventStore::new());
        let repo: AggregateRepository<Org, MemoryEventStore> = AggregateRepository::new(store);
        let instance = InstanceId(Uuid::new_v4());
        let org_id = Uuid::new_v4();

        repo.handle_command(instance, ResourceOwner(org_id), org_id, None, OrgCommand::Create { name: "acme".to_string() })
            .await
            .unwrap()
            .unwrap();

        let result = repo
            .handle_command(instance, ResourceOwner(org_id), org_id, None, OrgCommand::Create { name: "other".to_string() })
            .await
            .unwrap();

        assert!(matches!(result, Err(OrgError::AlreadyExists)));
    }
}
