//! [`AggregateState`], the in-memory replay target for a single aggregate instance.

use uuid::Uuid;

use crate::event::Event;
use crate::types::SequenceNumber;
use crate::Aggregate;

/// The state of a single aggregate instance, folded left-to-right from its
/// event stream. `sequence_number` always equals the number of events folded
/// into `inner` so far (spec.md §3: "current sequence equal to the count of
/// its events").
#[derive(Clone)]
pub struct AggregateState<S: Default + Clone> {
    id: Uuid,
    sequence_number: SequenceNumber,
    inner: S,
}

impl<S: Default + Clone> AggregateState<S> {
    /// A fresh, not-yet-persisted aggregate instance with a random id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence_number: 0,
            inner: Default::default(),
        }
    }

    /// A fresh, not-yet-persisted aggregate instance with a caller-chosen id.
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            sequence_number: 0,
            inner: Default::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    /// The sequence number the next appended event for this aggregate must carry.
    pub fn next_sequence_number(&self) -> SequenceNumber {
        self.sequence_number + 1
    }

    /// Folds a single already-persisted [`Event`] into this state, advancing
    /// the sequence number. Panics (per [`Aggregate::apply_event`]'s contract)
    /// if the event cannot be applied, which should never happen for events
    /// that genuinely belong to this aggregate's stream.
    pub fn apply<A>(mut self, event: &Event) -> Self
    where
        A: Aggregate<State = S>,
    {
        self.inner = A::apply_event(self.inner, event.payload.clone());
        self.sequence_number = event.sequence;
        self
    }

    /// Folds an ordered batch of events into this state (used by
    /// [`crate::manager::AggregateRepository::load`]).
    pub fn apply_events<A>(self, events: &[Event]) -> Self
    where
        A: Aggregate<State = S>,
    {
        events.iter().fold(self, |state, event| state.apply::<A>(event))
    }
}

impl<S: Default + Clone> Default for AggregateState<S> {
    fn default() -> Self {
        Self::new()
    }
}
