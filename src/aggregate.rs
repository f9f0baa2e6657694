//! The [`Aggregate`] trait: command validation and event application, purely in memory.

use crate::event::EventPayload;

/// Responsible for validating commands, mapping commands to events, and
/// applying events onto the state (spec.md §3 "Aggregate").
///
/// An aggregate should be able to derive its own state from nothing but its
/// initial configuration and its event stream: applying the same events, in
/// the same order, to the same aggregate, must always yield an identical
/// state. This trait is purposefully synchronous — if handling a command
/// needs I/O, that I/O belongs in the caller, before the command is built.
pub trait Aggregate {
    /// Unique name for this aggregate type. Aggregates and their events are
    /// linked by `(NAME, aggregate_id)`; changing `NAME` severs that link.
    const NAME: &'static str;

    /// In-memory projection of the aggregate's event stream, used to validate commands.
    type State: Default + Clone + Send + Sync;

    /// An action the caller can request; validated against `State`, yields zero or more events.
    type Command: Send;

    /// The domain error returned when a command is rejected.
    type Error: std::error::Error;

    /// Validates `command` against `state` and returns the events it causes, or a domain error.
    ///
    /// # Errors
    /// Returns `Err` only for business-rule violations — never for technical
    /// failures, which are the event store's responsibility.
    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<EventPayload>, Self::Error>;

    /// Folds a single event onto `state`. Assumes the event can be applied;
    /// implementations may panic if handed a payload they don't recognize,
    /// since that can only happen if the event store's type-to-aggregate
    /// routing is broken.
    fn apply_event(state: Self::State, payload: EventPayload) -> Self::State;
}
