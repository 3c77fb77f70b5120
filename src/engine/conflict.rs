use chrono::{FixedOffset, NaiveDate, Timelike};
use ulid::Ulid;

use crate::model::*;
use crate::time::{wall_clock, TimeOfDay};

use super::slots::covers;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Any active booking overlapping `span` is a conflict.
pub(crate) fn check_no_conflict(ps: &ProviderState, span: &Span) -> Result<(), EngineError> {
    match ps.overlapping(span).find(|b| b.is_active()) {
        Some(existing) => Err(EngineError::SlotConflict(existing.id)),
        None => Ok(()),
    }
}

/// Local date and minute-precision `[start, end)` of `span` at `offset`.
///
/// The start is floored and the end ceiled to whole minutes. Spans that
/// cross local midnight have no single wall-clock day and yield `None`.
pub(crate) fn wall_clock_interval(
    span: &Span,
    offset: FixedOffset,
) -> Option<(NaiveDate, TimeOfDay, TimeOfDay)> {
    let start = wall_clock(span.start, offset)?;
    let last = wall_clock(span.end - 1, offset)?;
    if start.date_naive() != last.date_naive() {
        return None;
    }
    let start_tod = TimeOfDay::from_hm(start.hour(), start.minute())?;
    let end_tod = TimeOfDay::from_minutes(last.hour() * 60 + last.minute() + 1)?;
    Some((start.date_naive(), start_tod, end_tod))
}

/// First window applying on `date` whose slots cover `[start, end)` without a gap.
pub(crate) fn find_covering_window(
    ps: &ProviderState,
    date: NaiveDate,
    start: TimeOfDay,
    end: TimeOfDay,
) -> Option<Ulid> {
    ps.windows
        .iter()
        .filter(|w| w.recurrence.matches_date(date))
        .find(|w| {
            let slots: Vec<_> = w.slots.iter().map(|s| (s.start_time, s.end_time)).collect();
            covers(&slots, start, end)
        })
        .map(|w| w.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::slots::generate_slots;
    use crate::time::{parse_time_of_day, DayOfWeek};

    const M: Ms = MS_PER_MINUTE;
    // 2025-09-22T00:00:00Z, a Monday
    const MONDAY: Ms = 1_758_499_200_000;

    fn t(s: &str) -> TimeOfDay {
        parse_time_of_day(s).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn window(provider: &ProviderState, recurrence: Recurrence, start: &str, end: &str) -> Availability {
        let id = Ulid::new();
        Availability {
            id,
            provider_id: provider.id,
            recurrence,
            start_time: t(start),
            end_time: t(end),
            slot_minutes: 30,
            slots: generate_slots(t(start), t(end), 30)
                .unwrap()
                .into_iter()
                .map(|(s, e)| AvailabilitySlot {
                    id: Ulid::new(),
                    availability_id: id,
                    start_time: s,
                    end_time: e,
                    is_booked: false,
                    booked_at: None,
                })
                .collect(),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn booking(ps: &ProviderState, start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            patient_id: Ulid::new(),
            provider_id: ps.id,
            service_id: Ulid::new(),
            availability_id: None,
            span: Span::new(start, end),
            status,
            notes: None,
            amount_cents: 1000,
            payment_status: PaymentStatus::Unpaid,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn active_overlap_conflicts() {
        let mut ps = ProviderState::new(Ulid::new(), None);
        let held = booking(&ps, MONDAY + 540 * M, MONDAY + 570 * M, BookingStatus::Pending);
        let held_id = held.id;
        ps.insert_booking(held);

        let result = check_no_conflict(&ps, &Span::new(MONDAY + 555 * M, MONDAY + 585 * M));
        assert!(matches!(result, Err(EngineError::SlotConflict(id)) if id == held_id));
    }

    #[test]
    fn adjacent_booking_no_conflict() {
        let mut ps = ProviderState::new(Ulid::new(), None);
        ps.insert_booking(booking(&ps, MONDAY + 540 * M, MONDAY + 570 * M, BookingStatus::Confirmed));
        assert!(check_no_conflict(&ps, &Span::new(MONDAY + 570 * M, MONDAY + 600 * M)).is_ok());
    }

    #[test]
    fn inactive_bookings_do_not_hold_time() {
        let mut ps = ProviderState::new(Ulid::new(), None);
        ps.insert_booking(booking(&ps, MONDAY + 540 * M, MONDAY + 570 * M, BookingStatus::Cancelled));
        ps.insert_booking(booking(&ps, MONDAY + 540 * M, MONDAY + 570 * M, BookingStatus::Completed));
        assert!(check_no_conflict(&ps, &Span::new(MONDAY + 540 * M, MONDAY + 570 * M)).is_ok());
    }

    #[test]
    fn span_limits() {
        assert!(validate_span(&Span::new(MONDAY, MONDAY + M)).is_ok());
        assert!(matches!(
            validate_span(&Span::new(0, M)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn wall_clock_in_utc() {
        let (date, start, end) =
            wall_clock_interval(&Span::new(MONDAY + 540 * M, MONDAY + 570 * M), utc()).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 9, 22).unwrap());
        assert_eq!(start, t("09:00"));
        assert_eq!(end, t("09:30"));
    }

    #[test]
    fn wall_clock_with_offset() {
        // 07:00Z is 09:00 at +02:00
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let (_, start, end) =
            wall_clock_interval(&Span::new(MONDAY + 420 * M, MONDAY + 450 * M), plus_two).unwrap();
        assert_eq!(start, t("09:00"));
        assert_eq!(end, t("09:30"));
    }

    #[test]
    fn wall_clock_rounds_outward() {
        let (_, start, end) = wall_clock_interval(
            &Span::new(MONDAY + 540 * M + 30_000, MONDAY + 570 * M + 30_000),
            utc(),
        )
        .unwrap();
        assert_eq!(start, t("09:00"));
        assert_eq!(end, t("09:31"));
    }

    #[test]
    fn wall_clock_across_midnight_is_none() {
        assert!(wall_clock_interval(&Span::new(MONDAY - 15 * M, MONDAY + 15 * M), utc()).is_none());
        assert!(wall_clock_interval(&Span::new(MONDAY - 30 * M, MONDAY), utc()).is_none());
    }

    #[test]
    fn covering_window_matches_weekday_and_date() {
        let mut ps = ProviderState::new(Ulid::new(), None);
        let monday = NaiveDate::from_ymd_opt(2025, 9, 22).unwrap();
        let weekly = window(&ps, Recurrence::Weekly(DayOfWeek::Monday), "09:00", "12:00");
        let once = window(&ps, Recurrence::Once(monday), "14:00", "15:00");
        let (weekly_id, once_id) = (weekly.id, once.id);
        ps.upsert_window(weekly);
        ps.upsert_window(once);

        assert_eq!(find_covering_window(&ps, monday, t("09:15"), t("09:45")), Some(weekly_id));
        assert_eq!(find_covering_window(&ps, monday, t("14:00"), t("15:00")), Some(once_id));
        assert_eq!(find_covering_window(&ps, monday, t("12:00"), t("12:30")), None);

        let tuesday = monday.succ_opt().unwrap();
        assert_eq!(find_covering_window(&ps, tuesday, t("09:00"), t("09:30")), None);
    }

    #[test]
    fn covering_window_ignores_dropped_remainder() {
        let mut ps = ProviderState::new(Ulid::new(), None);
        let day = NaiveDate::from_ymd_opt(2025, 9, 20).unwrap();
        ps.upsert_window(window(&ps, Recurrence::Once(day), "09:00", "09:45"));
        assert!(find_covering_window(&ps, day, t("09:00"), t("09:30")).is_some());
        assert!(find_covering_window(&ps, day, t("09:15"), t("09:45")).is_none());
    }
}
