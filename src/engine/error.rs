use thiserror::Error;
use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid time format (use 'YYYY-MM-DD HH:mm'), got: {0:?}")]
    MalformedTimestamp(String),
    #[error("invalid window: {0}")]
    InvalidWindow(&'static str),
    #[error("resource not found: {0}")]
    ResourceNotFound(Ulid),
    #[error("resource already exists: {0}")]
    ResourceExists(Ulid),
    #[error("reservation not found: {0}")]
    ReservationNotFound(Ulid),
    #[error("slot already booked by reservation {0}")]
    SlotConflict(Ulid),
    #[error("cannot move reservation from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl EngineError {
    /// Storage hiccups are worth resubmitting; everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::PersistenceFailure(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MalformedTimestamp(_) => "malformed_timestamp",
            EngineError::InvalidWindow(_) => "invalid_window",
            EngineError::ResourceNotFound(_) => "resource_not_found",
            EngineError::ResourceExists(_) => "resource_exists",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::SlotConflict(_) => "slot_conflict",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::PersistenceFailure(_) => "persistence_failure",
        }
    }
}
