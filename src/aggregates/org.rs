//! The `Organization` aggregate (spec.md §3 "Organization", "OrgDomain").

use thiserror::Error;

use crate::aggregate::Aggregate;
use crate::event::EventPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrgState {
    Unspecified,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Default)]
pub struct OrgDomainState {
    pub domain: String,
    pub verified: bool,
    pub primary: bool,
}

#[derive(Debug, Clone)]
pub struct OrgAggregateState {
    pub created: bool,
    pub name: String,
    pub state: OrgState,
    pub domains: Vec<OrgDomainState>,
}

impl Default for OrgAggregateState {
    fn default() -> Self {
        Self {
            created: false,
            name: String::new(),
            state: OrgState::Unspecified,
            domains: Vec::new(),
        }
    }
}

pub struct Org;

pub enum OrgCommand {
    Create { name: String },
    Rename { name: String },
    SetState { active: bool },
    AddDomain { domain: String, primary: bool },
    VerifyDomain { domain: String },
    SetPrimaryDomain { domain: String },
    RemoveDomain { domain: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrgError {
    #[error("organization already exists")]
    AlreadyExists,
    #[error("organization does not exist yet")]
    NotFound,
    #[error("domain {0} already registered")]
    DomainAlreadyExists(String),
    #[error("domain {0} is not registered")]
    DomainNotFound(String),
    #[error("cannot remove the primary domain")]
    CannotRemovePrimaryDomain,
}

impl Aggregate for Org {
    const NAME: &'static str = "org";

    type State = OrgAggregateState;
    type Command = OrgCommand;
    type Error = OrgError;

    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<EventPayload>, Self::Error> {
        match command {
            OrgCommand::Create { name } => {
                if state.created {
                    return Err(OrgError::AlreadyExists);
                }
                Ok(vec![EventPayload::OrgCreated { name }])
            }
            _ if !state.created => Err(OrgError::NotFound),
            OrgCommand::Rename { name } => Ok(vec![EventPayload::OrgRenamed { name }]),
            OrgCommand::SetState { active } => Ok(vec![EventPayload::OrgStateChanged {
                state: if active { "ACTIVE".to_string() } else { "INACTIVE".to_string() },
            }]),
            OrgCommand::AddDomain { domain, primary } => {
                if state.domains.iter().any(|d| d.domain == domain) {
                    return Err(OrgError::DomainAlreadyExists(domain));
                }
                Ok(vec![EventPayload::OrgDomainAdded { domain, verified: false, primary }])
            }
            OrgCommand::VerifyDomain { domain } => {
                if !state.domains.iter().any(|d| d.domain == domain) {
                    return Err(OrgError::DomainNotFound(domain));
                }
                Ok(vec![EventPayload::OrgDomainVerified { domain }])
            }
            OrgCommand::SetPrimaryDomain { domain } => {
                if !state.domains.iter().any(|d| d.domain == domain) {
                    return Err(OrgError::DomainNotFound(domain));
                }
                Ok(vec![EventPayload::OrgDomainPrimarySet { domain }])
            }
            OrgCommand::RemoveDomain { domain } => match state.domains.iter().find(|d| d.domain == domain) {
                None => Err(OrgError::DomainNotFound(domain)),
                Some(d) if d.primary => Err(OrgError::CannotRemovePrimaryDomain),
                Some(_) => Ok(vec![EventPayload::OrgDomainRemoved { domain }]),
            },
        }
    }

    fn apply_event(mut state: Self::State, payload: EventPayload) -> Self::State {
        match payload {
            EventPayload::OrgCreated { name } => {
                state.created = true;
                state.name = name;
                state.state = OrgState::Active;
            }
            EventPayload::OrgRenamed { name } => state.name = name,
            EventPayload::OrgStateChanged { state: new_state } => {
                state.state = match new_state.as_str() {
                    "ACTIVE" => OrgState::Active,
                    "INACTIVE" => OrgState::Inactive,
                    _ => OrgState::Unspecified,
                };
            }
            EventPayload::OrgDomainAdded { domain, verified, primary } => {
                if primary {
                    for d in state.domains.iter_mut() {
                        d.primary = false;
                    }
                }
                state.domains.push(OrgDomainState { domain, verified, primary });
            }
            EventPayload::OrgDomainVerified { domain } => {
                if let Some(d) = state.domains.iter_mut().find(|d| d.domain == domain) {
                    d.verified = true;
                }
            }
            EventPayload::OrgDomainPrimarySet { domain } => {
                for d in state.domains.iter_mut() {
                    d.primary = d.domain == domain;
                }
            }
            EventPayload::OrgDomainRemoved { domain } => {
                state.domains.retain(|d| d.domain != domain);
            }
            _ => {}
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creating_twice_is_rejected() {
        let state = OrgAggregateState::default();
        let events = Org::handle_command(&state, OrgCommand::Create { name: "acme".to_string() }).unwrap();
        let state = events.into_iter().fold(state, Org::apply_event);

        let err = Org::handle_command(&state, OrgCommand::Create { name: "acme".to_string() }).unwrap_err();
        assert_eq!(err, OrgError::AlreadyExists);
    }

    #[test]
    fn adding_a_primary_domain_demotes_the_previous_one() {
        let mut state = OrgAggregateState::default();
        state = Org::apply_event(state, EventPayload::OrgCreated { name: "acme".to_string() });
        state = Org::apply_event(state, EventPayload::OrgDomainAdded {
            domain: "a.example.com".to_string(),
            verified: false,
            primary: true,
        });
        state = Org::apply_event(state, EventPayload::OrgDomainAdded {
            domain: "b.example.com".to_string(),
            verified: false,
            primary: true,
        });

        assert!(!state.domains[0].primary);
        assert!(state.domains[1].primary);
    }
}
