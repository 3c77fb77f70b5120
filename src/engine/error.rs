use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, Ms};
use crate::time::{TimeError, TimeOfDay};

use super::lifecycle::BookingAction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("discriminator mismatch: {0}")]
    DiscriminatorMismatch(&'static str),
    #[error("end time {end} must be after start time {start}")]
    InvalidTimeOrder { start: TimeOfDay, end: TimeOfDay },
    #[error("window overlaps existing availability {existing} ({start}-{end})")]
    OverlapDetected {
        existing: Ulid,
        start: TimeOfDay,
        end: TimeOfDay,
    },
    #[error("invalid {0}")]
    InvalidField(&'static str),
    #[error(transparent)]
    Time(#[from] TimeError),
}

/// Coarse classification a transport layer can map to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    State,
    Transient,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("{0} not found: {1}")]
    NotFound(&'static str, Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("service not found: {0}")]
    ServiceNotFound(Ulid),
    #[error("provider {provider_id} has no open slot covering [{start}, {end})")]
    ProviderUnavailable { provider_id: Ulid, start: Ms, end: Ms },
    #[error("slot conflict with booking {0}")]
    SlotConflict(Ulid),
    #[error("cannot {action} a {from} booking")]
    InvalidTransition {
        from: BookingStatus,
        action: BookingAction,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("timed out waiting for provider {0}")]
    Timeout(Ulid),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::NotFound(..) | EngineError::ServiceNotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_)
            | EngineError::ProviderUnavailable { .. }
            | EngineError::SlotConflict(_) => ErrorKind::Conflict,
            EngineError::InvalidTransition { .. } => ErrorKind::State,
            EngineError::Storage(_) | EngineError::Timeout(_) => ErrorKind::Transient,
        }
    }

    /// Only infrastructure failures are worth retrying; everything else needs a different request.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        EngineError::Validation(ValidationError::Time(e))
    }
}
