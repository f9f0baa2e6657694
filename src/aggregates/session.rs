//! The `Session` aggregate and its state machine (spec.md §4.6 "Session state machine").

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::event::EventPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unspecified,
    Active,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct SessionAggregateState {
    pub created: bool,
    pub user_id: Uuid,
    pub state: SessionState,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for SessionAggregateState {
    fn default() -> Self {
        Self {
            created: false,
            user_id: Uuid::nil(),
            state: SessionState::Unspecified,
            expires_at: None,
        }
    }
}

impl SessionAggregateState {
    /// Active iff state=ACTIVE AND (no expiry OR expiry>now) — spec.md §3 "Session".
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state == SessionState::Active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

pub struct Session;

pub enum SessionCommand {
    Create { user_id: Uuid, expires_at: Option<DateTime<Utc>> },
    Terminate,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session already exists")]
    AlreadyExists,
    #[error("session does not exist yet")]
    NotFound,
}

impl Aggregate for Session {
    const NAME: &'static str = "session";

    type State = SessionAggregateState;
    type Command = SessionCommand;
    type Error = SessionError;

    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<EventPayload>, Self::Error> {
        match command {
            SessionCommand::Create { user_id, expires_at } => {
                if state.created {
                    return Err(SessionError::AlreadyExists);
                }
                Ok(vec![EventPayload::SessionCreated { user_id, expires_at }])
            }
            SessionCommand::Terminate => {
                if !state.created {
                    return Err(SessionError::NotFound);
                }
                // Idempotent per spec.md §4.6: re-terminating a TERMINATED session is a no-op.
                if state.state == SessionState::Terminated {
                    return Ok(vec![]);
                }
                Ok(vec![EventPayload::SessionTerminated])
            }
        }
    }

    fn apply_event(mut state: Self::State, payload: EventPayload) -> Self::State {
        match payload {
            EventPayload::SessionCreated { user_id, expires_at } => {
                state.created = true;
                state.user_id = user_id;
                state.state = SessionState::Active;
                state.expires_at = expires_at;
            }
            EventPayload::SessionTerminated => state.state = SessionState::Terminated,
            _ => {}
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn session_is_active_iff_active_state_and_unexpired() {
        let mut state = SessionAggregateState::default();
        state = Session::apply_event(state, EventPayload::SessionCreated { user_id: Uuid::new_v4(), expires_at: None });
        assert!(state.is_active(Utc::now()));

        let expiring = SessionAggregateState {
            expires_at: Some(Utc::now() - Duration::seconds(1)),
            ..state.clone()
        };
        assert!(!expiring.is_active(Utc::now()));
    }

    #[test]
    fn re_terminating_is_a_no_op() {
        let mut state = SessionAggregateState::default();
        state = Session::apply_event(state, EventPayload::SessionCreated { user_id: Uuid::new_v4(), expires_at: None });
        state = Session::apply_event(state, EventPayload::SessionTerminated);

        let events = Session::handle_command(&state, SessionCommand::Terminate).unwrap();
        assert!(events.is_empty());
    }
}
