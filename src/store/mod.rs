//! The append-only event log (C1) and its optimistic concurrency contract.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::{Event, EventFilter, NewEvent};
use crate::types::{InstanceId, Position, SequenceNumber};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// An append-only, ordered log of domain events with optimistic concurrency
/// and filtered replay (spec.md §4.1).
///
/// Implementations MUST uphold:
/// - (a) within an aggregate, sequences are dense and strictly increasing;
/// - (b) global `position` is strictly increasing across the whole store;
/// - (c) all events in one `append` call commit as a single atomic unit;
/// - (d) `(aggregate_type, aggregate_id, sequence)` never repeats.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to a single aggregate's stream.
    ///
    /// When `expected_sequence` is `Some(n)`, the first new event must land
    /// at sequence `n + 1`; otherwise the store returns a
    /// [`DomainError::concurrency_conflict`] and appends nothing. Callers
    /// must reload the aggregate and retry (spec.md §4.1 "Concurrency control").
    async fn append(
        &self,
        events: Vec<NewEvent>,
        expected_sequence: Option<SequenceNumber>,
    ) -> Result<Vec<Event>, DomainError>;

    /// Returns events matching `filter`, ordered by `position` ascending.
    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>, DomainError>;

    /// The highest `position` among events matching `filter`, if any.
    async fn latest_position(&self, filter: &EventFilter) -> Result<Option<Position>, DomainError>;

    /// The most recently appended event for a specific aggregate, if it exists.
    async fn latest_event(&self, aggregate_type: &str, aggregate_id: uuid::Uuid) -> Result<Option<Event>, DomainError>;

    /// The number of events matching `filter`.
    async fn count(&self, filter: &EventFilter) -> Result<u64, DomainError>;

    /// Cursor-style scan for projections: events with `position > position`, oldest first, bounded by `limit`.
    async fn events_after_position(&self, position: Position, limit: u32) -> Result<Vec<Event>, DomainError>;

    /// Enumerates every distinct tenant with at least one event in the store.
    async fn distinct_instance_ids(&self) -> Result<Vec<InstanceId>, DomainError>;
}
