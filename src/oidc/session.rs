//! Session read-path semantics (spec.md §4.6 "Session state machine").
//!
//! States: ACTIVE -> TERMINATED. An expired ACTIVE session is reported as
//! terminated to any reader, but the underlying aggregate is never rewritten
//! just because it was read — only an explicit `Terminate` command appends a
//! termination event.

use chrono::{DateTime, Utc};

use crate::aggregates::session::{SessionAggregateState, SessionState};

/// What a caller sees when it asks "is this session usable right now?",
/// without implying anything about what's stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedSessionState {
    Active,
    Terminated,
}

/// Projects the stored state through "terminated on read" without touching
/// the aggregate: an expired ACTIVE session reads as terminated, but no event
/// is appended and `state.state` is left as-is.
pub fn observe(state: &SessionAggregateState, now: DateTime<Utc>) -> ObservedSessionState {
    if state.state == SessionState::Active && state.is_active(now) {
        ObservedSessionState::Active
    } else {
        ObservedSessionState::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    #[test]
    fn expired_active_session_reads_as_terminated_without_being_rewritten() {
        let state = SessionAggregateState {
            created: true,
            user_id: Uuid::new_v4(),
            state: SessionState::Active,
            expires_at: Some(Utc::now() - Duration::seconds(1)),
        };

        assert_eq!(observe(&state, Utc::now()), ObservedSessionState::Terminated);
        // The read projects the state, it never mutates what's stored.
        assert_eq!(state.state, SessionState::Active);
    }

    #[test]
    fn live_active_session_reads_as_active() {
        let state = SessionAggregateState {
            created: true,
            user_id: Uuid::new_v4(),
            state: SessionState::Active,
            expires_at: None,
        };
        assert_eq!(observe(&state, Utc::now()), ObservedSessionState::Active);
    }

    #[test]
    fn terminated_session_reads_as_terminated() {
        let state = SessionAggregateState {
            created: true,
            user_id: Uuid::new_v4(),
            state: SessionState::Terminated,
            expires_at: None,
        };
        assert_eq!(observe(&state, Utc::now()), ObservedSessionState::Terminated);
    }
}
