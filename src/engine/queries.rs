use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::limits::MAX_HORIZON_DAYS;
use crate::model::*;
use crate::time::local_instant_ms;

use super::{Engine, EngineError, SharedProviderState};

impl Engine {
    pub async fn list_providers(&self) -> Vec<ProviderInfo> {
        let shared: Vec<_> = self.providers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for ps in shared {
            let guard = ps.read().await;
            out.push(ProviderInfo {
                id: guard.id,
                name: guard.name.clone(),
                windows: guard.windows.len(),
                active_bookings: guard.bookings.iter().filter(|b| b.is_active()).count(),
            });
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub async fn get_service(&self, id: Ulid) -> Result<Service, EngineError> {
        let ps = self
            .provider_for_entity(&id)
            .and_then(|pid| self.get_provider(&pid))
            .ok_or(EngineError::NotFound("service", id))?;
        let guard = ps.read().await;
        guard
            .service(id)
            .cloned()
            .ok_or(EngineError::NotFound("service", id))
    }

    pub async fn list_services(&self, provider_id: Ulid) -> Result<Vec<Service>, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound("provider", provider_id))?;
        let guard = ps.read().await;
        Ok(guard.services.clone())
    }

    /// The window together with its current slots.
    pub async fn get_availability(&self, id: Ulid) -> Result<Availability, EngineError> {
        let ps = self
            .provider_for_entity(&id)
            .and_then(|pid| self.get_provider(&pid))
            .ok_or(EngineError::NotFound("availability", id))?;
        let guard = ps.read().await;
        guard
            .window(id)
            .cloned()
            .ok_or(EngineError::NotFound("availability", id))
    }

    /// Windows matching `filter`, grouped by provider, each provider's in
    /// weekday/date then start order.
    pub async fn list_availabilities(&self, filter: &AvailabilityFilter) -> Vec<Availability> {
        let mut shared: Vec<(Ulid, SharedProviderState)> = match filter.provider_id {
            Some(pid) => self.get_provider(&pid).map(|ps| (pid, ps)).into_iter().collect(),
            None => self
                .providers
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
        };
        shared.sort_by_key(|(id, _)| *id);

        let mut out = Vec::new();
        for (_, ps) in shared {
            let guard = ps.read().await;
            let mut windows: Vec<Availability> = guard
                .windows
                .iter()
                .filter(|w| filter.matches(w))
                .cloned()
                .collect();
            windows.sort_by_key(|w| (w.day_of_week().map(|d| d as u8), w.date(), w.start_time));
            out.extend(windows);
        }
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let ps = self
            .provider_for_entity(&id)
            .and_then(|pid| self.get_provider(&pid))
            .ok_or(EngineError::NotFound("booking", id))?;
        let guard = ps.read().await;
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))
    }

    /// Bookings matching `filter`, ordered by start time.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let shared: Vec<SharedProviderState> = match filter.provider_id {
            Some(pid) => self.get_provider(&pid).into_iter().collect(),
            None => self.providers.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for ps in shared {
            let guard = ps.read().await;
            out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        out.sort_by_key(|b| (b.span.start, b.id));
        out
    }

    /// Expand the provider's windows into dated slots for `days_ahead` days
    /// starting at `from`, each marked booked iff an active booking overlaps it.
    pub async fn upcoming_slots(
        &self,
        provider_id: Ulid,
        from: NaiveDate,
        days_ahead: u32,
    ) -> Result<Vec<DatedSlot>, EngineError> {
        if days_ahead > MAX_HORIZON_DAYS {
            return Err(EngineError::LimitExceeded("horizon too far ahead"));
        }
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound("provider", provider_id))?;
        let guard = ps.read().await;
        let offset = self.settings.utc_offset;

        let mut out = Vec::new();
        for day in 0..days_ahead {
            let Some(date) = from.checked_add_days(Days::new(u64::from(day))) else {
                break;
            };
            for window in guard.windows.iter().filter(|w| w.recurrence.matches_date(date)) {
                for slot in &window.slots {
                    let (Some(start), Some(end)) = (
                        local_instant_ms(date, slot.start_time, offset),
                        local_instant_ms(date, slot.end_time, offset),
                    ) else {
                        continue;
                    };
                    let span = Span::new(start, end);
                    out.push(DatedSlot {
                        availability_id: window.id,
                        date,
                        start_time: slot.start_time,
                        end_time: slot.end_time,
                        span,
                        is_booked: guard.overlapping(&span).any(|b| b.is_active()),
                    });
                }
            }
        }
        out.sort_by_key(|s| s.span.start);
        Ok(out)
    }
}
