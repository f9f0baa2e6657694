//! The `User` aggregate (spec.md §3 "User").

use thiserror::Error;

use crate::aggregate::Aggregate;
use crate::event::EventPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Unspecified,
    Active,
    Inactive,
    Deleted,
    Locked,
    Suspended,
    Initial,
}

#[derive(Debug, Clone)]
pub struct UserAggregateState {
    pub created: bool,
    pub username: String,
    pub user_type: String,
    pub state: UserState,
    pub email_verified: bool,
    pub phone_verified: bool,
}

impl Default for UserAggregateState {
    fn default() -> Self {
        Self {
            created: false,
            username: String::new(),
            user_type: String::new(),
            state: UserState::Unspecified,
            email_verified: false,
            phone_verified: false,
        }
    }
}

pub struct User;

pub enum UserCommand {
    Create { username: String, human: bool },
    VerifyEmail { email: String },
    VerifyPhone { phone: String },
    SetState { state: UserState },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UserError {
    #[error("user already exists")]
    AlreadyExists,
    #[error("user does not exist yet")]
    NotFound,
    #[error("user is deleted")]
    Deleted,
}

impl Aggregate for User {
    const NAME: &'static str = "user";

    type State = UserAggregateState;
    type Command = UserCommand;
    type Error = UserError;

    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<EventPayload>, Self::Error> {
        match command {
            UserCommand::Create { username, human } => {
                if state.created {
                    return Err(UserError::AlreadyExists);
                }
                Ok(vec![EventPayload::UserCreated {
                    username,
                    user_type: if human { "HUMAN".to_string() } else { "MACHINE".to_string() },
                }])
            }
            _ if !state.created => Err(UserError::NotFound),
            _ if state.state == UserState::Deleted => Err(UserError::Deleted),
            UserCommand::VerifyEmail { email } => Ok(vec![EventPayload::UserEmailVerified { email }]),
            UserCommand::VerifyPhone { phone } => Ok(vec![EventPayload::UserPhoneVerified { phone }]),
            UserCommand::SetState { state: new_state } => Ok(vec![EventPayload::UserStateChanged {
                state: state_name(new_state).to_string(),
            }]),
        }
    }

    fn apply_event(mut state: Self::State, payload: EventPayload) -> Self::State {
        match payload {
            EventPayload::UserCreated { username, user_type } => {
                state.created = true;
                state.username = username;
                state.user_type = user_type;
                state.state = UserState::Initial;
            }
            EventPayload::UserStateChanged { state: new_state } => {
                state.state = parse_state(&new_state);
            }
            EventPayload::UserEmailVerified { .. } => state.email_verified = true,
            EventPayload::UserPhoneVerified { .. } => state.phone_verified = true,
            _ => {}
        }
        state
    }
}

fn state_name(state: UserState) -> &'static str {
    match state {
        UserState::Unspecified => "UNSPECIFIED",
        UserState::Active => "ACTIVE",
        UserState::Inactive => "INACTIVE",
        UserState::Deleted => "DELETED",
        UserState::Locked => "LOCKED",
        UserState::Suspended => "SUSPENDED",
        UserState::Initial => "INITIAL",
    }
}

fn parse_state(s: &str) -> UserState {
    match s {
        "ACTIVE" => UserState::Active,
        "INACTIVE" => UserState::Inactive,
        "DELETED" => UserState::Deleted,
        "LOCKED" => UserState::Locked,
        "SUSPENDED" => UserState::Suspended,
        "INITIAL" => UserState::Initial,
        _ => UserState::Unspecified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_users_reject_further_commands() {
        let mut state = UserAggregateState::default();
        state = User::apply_event(state, EventPayload::UserCreated {
            username: "alice".to_string(),
            user_type: "HUMAN".to_string(),
        });
        state = User::apply_event(state, EventPayload::UserStateChanged { state: "DELETED".to_string() });

        let err = User::handle_command(&state, UserCommand::VerifyEmail { email: "a@b.com".to_string() }).unwrap_err();
        assert_eq!(err, UserError::Deleted);
    }
}
