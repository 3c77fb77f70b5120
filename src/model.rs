use std::fmt;

use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::time::{local_instant_ms, DayOfWeek, TimeOfDay};

/// Unix milliseconds, the only absolute time type.
pub type Ms = i64;

pub const MS_PER_MINUTE: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Which days an availability window applies to.
///
/// A window is either weekly (keyed by weekday) or one-time (keyed by date),
/// never both and never neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recurrence {
    Weekly(DayOfWeek),
    Once(NaiveDate),
}

impl Recurrence {
    pub fn is_recurring(&self) -> bool {
        matches!(self, Recurrence::Weekly(_))
    }

    /// Does this window apply on `date`?
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        match self {
            Recurrence::Weekly(day) => *day == DayOfWeek::from(date.weekday()),
            Recurrence::Once(d) => *d == date,
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Weekly(day) => write!(f, "every {day}"),
            Recurrence::Once(date) => write!(f, "on {date}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Ulid,
    pub availability_id: Ulid,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub is_booked: bool,
    pub booked_at: Option<Ms>,
}

/// A provider's declared open window together with the slots carved out of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub recurrence: Recurrence,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub slot_minutes: u32,
    /// Ordered by `start_time`, contiguous, non-overlapping.
    pub slots: Vec<AvailabilitySlot>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Availability {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_recurring()
    }

    pub fn day_of_week(&self) -> Option<DayOfWeek> {
        match self.recurrence {
            Recurrence::Weekly(day) => Some(day),
            Recurrence::Once(_) => None,
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self.recurrence {
            Recurrence::Weekly(_) => None,
            Recurrence::Once(date) => Some(date),
        }
    }

    /// Absolute span of a one-time window; `None` for weekly windows.
    pub fn span(&self, offset: FixedOffset) -> Option<Span> {
        let Recurrence::Once(date) = self.recurrence else {
            return None;
        };
        let start = local_instant_ms(date, self.start_time, offset)?;
        let end = local_instant_ms(date, self.end_time, offset)?;
        (start < end).then(|| Span::new(start, end))
    }

    /// Re-derive `is_booked`/`booked_at` for one-time windows from the active
    /// bookings that overlap each slot. Weekly slots are templates and stay free.
    ///
    /// `bookings` must be sorted by `span.start`.
    pub fn refresh_occupancy(&mut self, bookings: &[Booking], offset: FixedOffset) {
        let Recurrence::Once(date) = self.recurrence else {
            return;
        };
        for slot in &mut self.slots {
            let span = match (
                local_instant_ms(date, slot.start_time, offset),
                local_instant_ms(date, slot.end_time, offset),
            ) {
                (Some(s), Some(e)) if s < e => Span::new(s, e),
                _ => continue,
            };
            let booked_at = overlapping_in(bookings, &span)
                .filter(|b| b.is_active())
                .map(|b| b.created_at)
                .min();
            slot.is_booked = booked_at.is_some();
            slot.booked_at = booked_at;
        }
    }
}

/// Bookings in `sorted` (by `span.start`) whose span overlaps `query`.
/// Uses binary search to skip bookings starting at or after `query.end`.
pub fn overlapping_in<'a>(sorted: &'a [Booking], query: &Span) -> impl Iterator<Item = &'a Booking> {
    let right_bound = sorted.partition_point(|b| b.span.start < query.end);
    let query_start = query.start;
    sorted[..right_bound]
        .iter()
        .filter(move |b| b.span.end > query_start)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub title: String,
    pub duration_minutes: u32,
    pub price_cents: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Pending and confirmed bookings hold provider time.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Payment is settled outside the scheduler.
    Unpaid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub patient_id: Ulid,
    pub provider_id: Ulid,
    pub service_id: Ulid,
    pub availability_id: Option<Ulid>,
    /// `end - start` always equals the service duration.
    pub span: Span,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub amount_cents: u64,
    pub payment_status: PaymentStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: Ulid,
    pub name: Option<String>,
    pub services: Vec<Service>,
    pub windows: Vec<Availability>,
    /// Every booking ever made with this provider, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl ProviderState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            services: Vec::new(),
            windows: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn service(&self, id: Ulid) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        overlapping_in(&self.bookings, query)
    }

    pub fn window(&self, id: Ulid) -> Option<&Availability> {
        self.windows.iter().find(|w| w.id == id)
    }

    /// Replace a window by id, or append it if new.
    pub fn upsert_window(&mut self, window: Availability) {
        match self.windows.iter_mut().find(|w| w.id == window.id) {
            Some(existing) => *existing = window,
            None => self.windows.push(window),
        }
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<Availability> {
        let pos = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(pos))
    }

    /// Windows sharing `recurrence` with a candidate, minus the candidate itself.
    pub fn siblings(&self, recurrence: &Recurrence, exclude: Option<Ulid>) -> Vec<&Availability> {
        self.windows
            .iter()
            .filter(|w| w.recurrence == *recurrence && Some(w.id) != exclude)
            .collect()
    }

    /// Re-derive slot occupancy of the one-time windows that overlap `span`.
    pub fn refresh_occupancy_near(&mut self, span: &Span, offset: FixedOffset) {
        let bookings = &self.bookings;
        for window in &mut self.windows {
            if window.span(offset).is_some_and(|w| w.overlaps(span)) {
                window.refresh_occupancy(bookings, offset);
            }
        }
    }
}

/// WAL record format. Flat, no nesting beyond the entity payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderRegistered {
        id: Ulid,
        name: Option<String>,
    },
    ServiceRegistered {
        service: Service,
    },
    ServiceRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    /// Carries the window together with its freshly generated slots.
    AvailabilityCreated {
        availability: Availability,
    },
    /// Wholesale replacement: the old slots are gone, these are the new ones.
    AvailabilityUpdated {
        availability: Availability,
    },
    AvailabilityDeleted {
        id: Ulid,
        provider_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        provider_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
}

impl Event {
    /// The provider whose state this event touches.
    pub fn provider_id(&self) -> Ulid {
        match self {
            Event::ProviderRegistered { id, .. } => *id,
            Event::ServiceRegistered { service } => service.provider_id,
            Event::AvailabilityCreated { availability }
            | Event::AvailabilityUpdated { availability } => availability.provider_id,
            Event::BookingCreated { booking } => booking.provider_id,
            Event::ServiceRemoved { provider_id, .. }
            | Event::AvailabilityDeleted { provider_id, .. }
            | Event::BookingStatusChanged { provider_id, .. } => *provider_id,
        }
    }
}

// ── Boundary input types ─────────────────────────────────────────

/// Availability window as supplied by a caller. Strings are normalized and
/// validated by the engine; `day_of_week` is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInput {
    pub is_recurring: bool,
    #[serde(default)]
    pub day_of_week: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub slot_minutes: Option<i64>,
}

impl WindowInput {
    pub fn weekly(day: &str, start: &str, end: &str) -> Self {
        Self {
            is_recurring: true,
            day_of_week: Some(day.to_string()),
            date: None,
            start_time: start.to_string(),
            end_time: end.to_string(),
            slot_minutes: None,
        }
    }

    pub fn once(date: &str, start: &str, end: &str) -> Self {
        Self {
            is_recurring: false,
            day_of_week: None,
            date: Some(date.to_string()),
            start_time: start.to_string(),
            end_time: end.to_string(),
            slot_minutes: None,
        }
    }

    pub fn with_slot_minutes(mut self, minutes: i64) -> Self {
        self.slot_minutes = Some(minutes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub patient_id: Ulid,
    pub provider_id: Ulid,
    pub service_id: Ulid,
    /// ISO-8601 with explicit offset, e.g. `2025-09-22T09:00:00Z`.
    pub start_time: String,
    #[serde(default)]
    pub notes: Option<String>,
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub windows: usize,
    pub active_bookings: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityFilter {
    pub provider_id: Option<Ulid>,
    /// Exact date; only one-time windows carry a date.
    pub date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl AvailabilityFilter {
    pub fn matches(&self, window: &Availability) -> bool {
        if self.provider_id.is_some_and(|p| p != window.provider_id) {
            return false;
        }
        let has_date_filter =
            self.date.is_some() || self.start_date.is_some() || self.end_date.is_some();
        if !has_date_filter {
            return true;
        }
        let Some(date) = window.date() else {
            return false;
        };
        self.date.is_none_or(|d| d == date)
            && self.start_date.is_none_or(|d| date >= d)
            && self.end_date.is_none_or(|d| date <= d)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub provider_id: Option<Ulid>,
    pub patient_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.provider_id.is_none_or(|p| p == booking.provider_id)
            && self.patient_id.is_none_or(|p| p == booking.patient_id)
            && self.status.is_none_or(|s| s == booking.status)
    }
}

/// A slot on a concrete date, with occupancy derived from active bookings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedSlot {
    pub availability_id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub span: Span,
    pub is_booked: bool,
}
