//! The `UserGrant` aggregate (spec.md §3 "UserGrant"): user + project [+ project grant] + roles.

use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::event::EventPayload;

#[derive(Debug, Clone)]
pub struct UserGrantAggregateState {
    pub created: bool,
    pub project_id: Uuid,
    pub project_grant_id: Option<Uuid>,
    pub roles: Vec<String>,
    pub active: bool,
}

impl Default for UserGrantAggregateState {
    fn default() -> Self {
        Self {
            created: false,
            project_id: Uuid::nil(),
            project_grant_id: None,
            roles: Vec::new(),
            active: false,
        }
    }
}

pub struct UserGrant;

pub enum UserGrantCommand {
    Add { project_id: Uuid, project_grant_id: Option<Uuid>, roles: Vec<String> },
    ChangeRoles { roles: Vec<String> },
    Deactivate,
    Reactivate,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UserGrantError {
    #[error("user grant already exists")]
    AlreadyExists,
    #[error("user grant does not exist yet")]
    NotFound,
}

impl Aggregate for UserGrant {
    const NAME: &'static str = "user_grant";

    type State = UserGrantAggregateState;
    type Command = UserGrantCommand;
    type Error = UserGrantError;

    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<EventPayload>, Self::Error> {
        match command {
            UserGrantCommand::Add { project_id, project_grant_id, roles } => {
                if state.created {
                    return Err(UserGrantError::AlreadyExists);
                }
                Ok(vec![EventPayload::UserGrantAdded { project_id, project_grant_id, roles }])
            }
            _ if !state.created => Err(UserGrantError::NotFound),
            UserGrantCommand::ChangeRoles { roles } => Ok(vec![EventPayload::UserGrantRolesChanged { roles }]),
            UserGrantCommand::Deactivate => Ok(vec![EventPayload::UserGrantDeactivated]),
            UserGrantCommand::Reactivate => Ok(vec![EventPayload::UserGrantReactivated]),
        }
    }

    fn apply_event(mut state: Self::State, payload: EventPayload) -> Self::State {
        match payload {
            EventPayload::UserGrantAdded { project_id, project_grant_id, roles } => {
                state.created = true;
                state.project_id = project_id;
                state.project_grant_id = project_grant_id;
                state.roles = roles;
                state.active = true;
            }
            EventPayload::UserGrantRolesChanged { roles } => state.roles = roles,
            EventPayload::UserGrantDeactivated => state.active = false,
            EventPayload::UserGrantReactivated => state.active = true,
            _ => {}
        }
        state
    }
}
