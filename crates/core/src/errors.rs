use thiserror::Error;

use crate::domain::escrow::EscrowRecordId;
use crate::domain::quote::QuoteId;
use crate::domain::time_entry::{TimeEntryId, TimeEntryStatus};
use crate::money::Currency;

/// How the caller should react to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller-correctable; surface immediately, no retry.
    Validation,
    /// The action is no longer possible; caller must re-fetch state.
    Conflict,
    /// A broken financial invariant; escalate, never swallow.
    Invariant,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("quote {quote_id} is not open")]
    QuoteClosed { quote_id: QuoteId },
    #[error("time entry {entry_id} is not loggable (status {})", .status.as_str())]
    EntryNotLoggable { entry_id: TimeEntryId, status: TimeEntryStatus },
    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidStateTransition { entity: &'static str, from: &'static str, to: &'static str },
    #[error("{entity} {id} does not belong to order {order_id}")]
    ForeignAggregateMember { entity: &'static str, id: String, order_id: String },
    #[error("{actor} is not a party to this {entity}")]
    NotAParty { actor: String, entity: &'static str },

    #[error("quote {quote_id} was accepted by a concurrent request")]
    ConcurrentAcceptance { quote_id: QuoteId },
    #[error("{entity} {id} was changed by a concurrent request")]
    StaleAggregate { entity: &'static str, id: String },

    #[error("escrow {escrow_id} holds {held_minor} minor units, {requested_minor} requested")]
    InsufficientEscrowBalance { escrow_id: EscrowRecordId, held_minor: i64, requested_minor: i64 },
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },
    #[error("amount overflow during {context}")]
    AmountOverflow { context: &'static str },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::QuoteClosed { .. }
            | Self::EntryNotLoggable { .. }
            | Self::InvalidStateTransition { .. }
            | Self::ForeignAggregateMember { .. }
            | Self::NotAParty { .. } => ErrorClass::Validation,
            Self::ConcurrentAcceptance { .. } | Self::StaleAggregate { .. } => {
                ErrorClass::Conflict
            }
            Self::InsufficientEscrowBalance { .. }
            | Self::CurrencyMismatch { .. }
            | Self::AmountOverflow { .. }
            | Self::InvariantViolation(_) => ErrorClass::Invariant,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("payment capture failed after retries: {0}")]
    CaptureFailed(String),
    #[error("payout transfer failed after retries: {0}")]
    PayoutFailed(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("entity not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "This action is no longer possible. Refresh and review the current state."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(domain) => match domain.class() {
                ErrorClass::Validation => Self::BadRequest {
                    message: domain.to_string(),
                    correlation_id: unassigned(),
                },
                ErrorClass::Conflict => {
                    Self::Conflict { message: domain.to_string(), correlation_id: unassigned() }
                }
                ErrorClass::Invariant => {
                    Self::Internal { message: domain.to_string(), correlation_id: unassigned() }
                }
            },
            ApplicationError::NotFound { entity, id } => Self::BadRequest {
                message: format!("{entity} {id} was not found"),
                correlation_id: unassigned(),
            },
            ApplicationError::Persistence(message)
            | ApplicationError::CaptureFailed(message)
            | ApplicationError::PayoutFailed(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApplicationError, DomainError, ErrorClass, InterfaceError};
    use crate::domain::escrow::EscrowRecordId;
    use crate::domain::quote::QuoteId;

    #[test]
    fn validation_errors_map_to_bad_request() {
        let interface = ApplicationError::from(DomainError::QuoteClosed {
            quote_id: QuoteId("q-1".to_owned()),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn concurrent_acceptance_is_a_conflict() {
        let error = DomainError::ConcurrentAcceptance { quote_id: QuoteId("q-1".to_owned()) };
        assert_eq!(error.class(), ErrorClass::Conflict);

        let interface = ApplicationError::from(error).into_interface("req-2");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(
            interface.user_message(),
            "This action is no longer possible. Refresh and review the current state."
        );
    }

    #[test]
    fn broken_invariants_escalate_to_internal() {
        let error = DomainError::InsufficientEscrowBalance {
            escrow_id: EscrowRecordId("esc-1".to_owned()),
            held_minor: 100,
            requested_minor: 500,
        };
        assert_eq!(error.class(), ErrorClass::Invariant);

        let interface = ApplicationError::from(error).into_interface("req-3");
        assert!(matches!(interface, InterfaceError::Internal { .. }));
    }

    #[test]
    fn transfer_failures_surface_as_service_unavailable() {
        let interface = ApplicationError::PayoutFailed("transfer timed out".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
