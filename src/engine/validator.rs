use crate::model::{Availability, Recurrence, WindowInput};
use crate::time::{parse_date, parse_time_of_day, range_overlaps, DayOfWeek, TimeOfDay};

use super::error::ValidationError;

/// A window that passed every check, in canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedWindow {
    pub recurrence: Recurrence,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Turn the `is_recurring` / `day_of_week` / `date` triple into a [`Recurrence`].
///
/// Recurring needs a weekday and no date; one-time needs a date and no weekday.
pub fn resolve_recurrence(input: &WindowInput) -> Result<Recurrence, ValidationError> {
    let day = present(&input.day_of_week);
    let date = present(&input.date);
    if input.is_recurring {
        let Some(day) = day else {
            return Err(ValidationError::DiscriminatorMismatch(
                "recurring availability requires day_of_week",
            ));
        };
        if date.is_some() {
            return Err(ValidationError::DiscriminatorMismatch(
                "recurring availability must not have a date",
            ));
        }
        Ok(Recurrence::Weekly(day.parse::<DayOfWeek>()?))
    } else {
        let Some(date) = date else {
            return Err(ValidationError::DiscriminatorMismatch(
                "one-time availability requires a date",
            ));
        };
        if day.is_some() {
            return Err(ValidationError::DiscriminatorMismatch(
                "one-time availability must not have day_of_week",
            ));
        }
        Ok(Recurrence::Once(parse_date(date)?))
    }
}

/// Check a candidate window against its siblings.
///
/// `siblings` must already be narrowed to the same provider and the same
/// weekday/date, without the candidate itself when updating.
pub fn validate(
    candidate: &WindowInput,
    siblings: &[&Availability],
) -> Result<ValidatedWindow, ValidationError> {
    let recurrence = resolve_recurrence(candidate)?;

    let start_time = parse_time_of_day(&candidate.start_time)?;
    let end_time = parse_time_of_day(&candidate.end_time)?;
    if start_time >= end_time {
        return Err(ValidationError::InvalidTimeOrder {
            start: start_time,
            end: end_time,
        });
    }

    if let Some(hit) = siblings
        .iter()
        .find(|s| range_overlaps(start_time, end_time, s.start_time, s.end_time))
    {
        return Err(ValidationError::OverlapDetected {
            existing: hit.id,
            start: hit.start_time,
            end: hit.end_time,
        });
    }

    Ok(ValidatedWindow {
        recurrence,
        start_time,
        end_time,
    })
}
