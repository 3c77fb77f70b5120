use std::fmt;

use crate::model::BookingStatus;

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    Confirm,
    Complete,
    Cancel,
}

impl BookingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingAction::Confirm => "confirm",
            BookingAction::Complete => "complete",
            BookingAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for BookingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next status for `action` taken on a booking in `from`.
///
/// ```text
/// pending ──confirm──▶ confirmed ──complete──▶ completed
///    │                     │
///    └──────cancel─────────┴──────▶ cancelled
/// ```
///
/// Completed and cancelled are terminal. Nothing skips a state.
pub fn transition(from: BookingStatus, action: BookingAction) -> Result<BookingStatus, EngineError> {
    use BookingStatus::*;
    match (from, action) {
        (Pending, BookingAction::Confirm) => Ok(Confirmed),
        (Confirmed, BookingAction::Complete) => Ok(Completed),
        (Pending | Confirmed, BookingAction::Cancel) => Ok(Cancelled),
        _ => Err(EngineError::InvalidTransition { from, action }),
    }
}
