//! Domain error taxonomy (spec.md §7) and its mapping to RPC status codes (Table E).

use thiserror::Error;

/// RPC status, independent of any particular transport. Middleware at the
/// wire boundary (out of scope for this crate, per spec.md §1) converts this
/// into whatever status type the transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    FailedPrecondition,
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Internal,
}

/// A domain error with a stable code (surfaced to clients as
/// `error-details: {code, message, details}`, per spec.md §6) and the RPC
/// status it maps to.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct DomainError {
    pub code: &'static str,
    pub message: String,
    status: Status,
}

impl DomainError {
    pub fn new(code: &'static str, status: Status, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
        }
    }

    /// Maps this error to its RPC status per Table E (spec.md §7). Unknown
    /// codes never reach this type — every constructor pins its own status —
    /// but any future code that forgets to do so safely falls back to
    /// `Internal`, matching "anything else → INTERNAL".
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, Status::NotFound, message)
    }

    pub fn already_exists(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, Status::AlreadyExists, message)
    }

    pub fn concurrency_conflict(message: impl Into<String>) -> Self {
        Self::new("CONCURRENCY_CONFLICT", Status::AlreadyExists, message)
    }

    pub fn invalid_argument(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, Status::InvalidArgument, message)
    }

    pub fn unauthenticated(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, Status::Unauthenticated, message)
    }

    pub fn permission_denied(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, Status::PermissionDenied, message)
    }

    pub fn failed_precondition(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, Status::FailedPrecondition, message)
    }

    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, Status::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new("DEADLINE_EXCEEDED", Status::DeadlineExceeded, message)
    }

    pub fn resource_exhausted(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, Status::ResourceExhausted, message)
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, Status::Internal, message)
    }

    /// True for errors that are the caller's fault and not worth retrying as-is.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.status,
            Status::InvalidArgument | Status::PermissionDenied | Status::FailedPrecondition
        )
    }

    /// True for errors where retrying the same operation, after reloading
    /// state, is the documented recovery path (spec.md §4.1 "Concurrency control").
    pub fn is_retriable(&self) -> bool {
        matches!(self.status, Status::AlreadyExists | Status::Unavailable | Status::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_maps_to_already_exists() {
        let err = DomainError::concurrency_conflict("stale expected sequence");
        assert_eq!(err.status(), Status::AlreadyExists);
        assert!(err.is_retriable());
    }

    #[test]
    fn invalid_argument_is_a_client_error_not_retriable() {
        let err = DomainError::invalid_argument("JAR-004", "iss mismatch");
        assert!(err.is_client_error());
        assert!(!err.is_retriable());
    }
}
