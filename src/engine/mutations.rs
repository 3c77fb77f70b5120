use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Channel, Notification};
use crate::observability;
use crate::time::parse_instant;

use super::conflict::{check_no_conflict, find_covering_window, now_ms, validate_span, wall_clock_interval};
use super::error::ValidationError;
use super::lifecycle::{transition, BookingAction};
use super::slots::{effective_slot_minutes, generate_slots};
use super::validator::{resolve_recurrence, validate, ValidatedWindow};
use super::{append_event, join_failed, Engine, EngineError, WalCommand};

/// Materialize a validated window with freshly generated slots.
fn build_window(
    id: Ulid,
    provider_id: Ulid,
    window: &ValidatedWindow,
    slot_minutes: u32,
    created_at: Ms,
    updated_at: Ms,
) -> Result<Availability, EngineError> {
    let slots = generate_slots(window.start_time, window.end_time, slot_minutes)?
        .into_iter()
        .map(|(start_time, end_time)| AvailabilitySlot {
            id: Ulid::new(),
            availability_id: id,
            start_time,
            end_time,
            is_booked: false,
            booked_at: None,
        })
        .collect();
    Ok(Availability {
        id,
        provider_id,
        recurrence: window.recurrence,
        start_time: window.start_time,
        end_time: window.end_time,
        slot_minutes,
        slots,
        created_at,
        updated_at,
    })
}

fn booking_outcome(result: &Result<Booking, EngineError>) -> &'static str {
    match result {
        Ok(_) => "created",
        Err(EngineError::SlotConflict(_)) => "conflict",
        Err(EngineError::ProviderUnavailable { .. }) => "unavailable",
        Err(EngineError::Timeout(_)) => "timeout",
        Err(_) => "rejected",
    }
}

impl Engine {
    // ── Providers and services ───────────────────────────────

    pub async fn register_provider(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("provider name too long"));
        }
        let registry = self.registry.clone().lock_owned().await;
        if self.providers.len() >= MAX_PROVIDERS {
            return Err(EngineError::LimitExceeded("too many providers"));
        }
        if self.providers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ProviderRegistered { id, name: name.clone() };
        let wal_tx = self.wal_tx.clone();
        let providers = self.providers.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            let _registry = registry;
            append_event(&wal_tx, &event).await?;
            providers.insert(id, Arc::new(RwLock::new(ProviderState::new(id, name))));
            notify.send(id, &event);
            metrics::gauge!(observability::PROVIDERS_ACTIVE).set(providers.len() as f64);
            Ok::<_, EngineError>(())
        })
        .await
        .map_err(join_failed)??;
        info!(provider_id = %id, "provider registered");
        Ok(())
    }

    pub async fn register_service(&self, service: Service) -> Result<Service, EngineError> {
        if service.title.trim().is_empty() {
            return Err(ValidationError::InvalidField("service title").into());
        }
        if service.title.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service title too long"));
        }
        if service.duration_minutes == 0 {
            return Err(ValidationError::InvalidField("service duration").into());
        }
        if service.duration_minutes > MAX_SERVICE_DURATION_MINUTES {
            return Err(EngineError::LimitExceeded("service too long"));
        }
        if service.price_cents == 0 {
            return Err(ValidationError::InvalidField("service price").into());
        }

        let guard = self.lock_provider(service.provider_id).await?;
        if self.entity_to_provider.contains_key(&service.id) {
            return Err(EngineError::AlreadyExists(service.id));
        }
        if guard.services.len() >= MAX_SERVICES_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many services on provider"));
        }

        let event = Event::ServiceRegistered { service: service.clone() };
        self.persist_and_apply(guard, event).await?;
        info!(service_id = %service.id, provider_id = %service.provider_id, "service registered");
        Ok(service)
    }

    /// Existing bookings keep their reference to a removed service.
    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let guard = self.resolve_entity_write("service", id).await?;
        if guard.service(id).is_none() {
            return Err(EngineError::NotFound("service", id));
        }
        let event = Event::ServiceRemoved { id, provider_id: guard.id };
        self.persist_and_apply(guard, event).await?;
        info!(service_id = %id, "service removed");
        Ok(())
    }

    // ── Availability ─────────────────────────────────────────

    pub async fn create_availability(
        &self,
        provider_id: Ulid,
        input: WindowInput,
    ) -> Result<Availability, EngineError> {
        let recurrence = resolve_recurrence(&input)?;
        let slot_minutes = effective_slot_minutes(input.slot_minutes, self.settings.default_slot_minutes);

        let guard = self.lock_provider(provider_id).await?;
        if guard.windows.len() >= MAX_WINDOWS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many availability windows on provider"));
        }
        let siblings = guard.siblings(&recurrence, None);
        let validated = validate(&input, &siblings).inspect_err(|e| {
            debug!(%provider_id, "availability rejected: {e}");
        })?;

        let id = Ulid::new();
        let now = now_ms();
        let availability = build_window(id, provider_id, &validated, slot_minutes, now, now)?;
        let event = Event::AvailabilityCreated { availability: availability.clone() };
        let guard = self.persist_and_apply(guard, event).await?;

        metrics::counter!(observability::AVAILABILITY_CHANGES_TOTAL, "op" => "create").increment(1);
        info!(
            availability_id = %id,
            %provider_id,
            slots = availability.slots.len(),
            "availability created {}",
            availability.recurrence
        );
        Ok(guard.window(id).cloned().unwrap_or(availability))
    }

    /// Re-validate against every sibling except itself and regenerate the slots
    /// wholesale. Window and slots change in one WAL record.
    pub async fn update_availability(
        &self,
        id: Ulid,
        input: WindowInput,
    ) -> Result<Availability, EngineError> {
        let recurrence = resolve_recurrence(&input)?;
        let slot_minutes = effective_slot_minutes(input.slot_minutes, self.settings.default_slot_minutes);

        let guard = self.resolve_entity_write("availability", id).await?;
        let created_at = guard
            .window(id)
            .map(|w| w.created_at)
            .ok_or(EngineError::NotFound("availability", id))?;
        let provider_id = guard.id;
        let siblings = guard.siblings(&recurrence, Some(id));
        let validated = validate(&input, &siblings).inspect_err(|e| {
            debug!(availability_id = %id, "availability update rejected: {e}");
        })?;

        let availability = build_window(id, provider_id, &validated, slot_minutes, created_at, now_ms())?;
        let event = Event::AvailabilityUpdated { availability: availability.clone() };
        let guard = self.persist_and_apply(guard, event).await?;

        metrics::counter!(observability::AVAILABILITY_CHANGES_TOTAL, "op" => "update").increment(1);
        info!(availability_id = %id, slots = availability.slots.len(), "availability updated");
        Ok(guard.window(id).cloned().unwrap_or(availability))
    }

    /// Deletes the window together with its slots. Bookings made against it stay.
    pub async fn delete_availability(&self, id: Ulid) -> Result<(), EngineError> {
        let guard = self.resolve_entity_write("availability", id).await?;
        if guard.window(id).is_none() {
            return Err(EngineError::NotFound("availability", id));
        }
        let event = Event::AvailabilityDeleted { id, provider_id: guard.id };
        self.persist_and_apply(guard, event).await?;

        metrics::counter!(observability::AVAILABILITY_CHANGES_TOTAL, "op" => "delete").increment(1);
        info!(availability_id = %id, "availability deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Reserve provider time for a patient.
    ///
    /// Service lookup, slot coverage, the conflict check and the WAL append all
    /// run under the provider's write lock, so of two overlapping requests at
    /// most one commits.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.arbitrate(request).await;

        let outcome = booking_outcome(&result);
        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(booking) => {
                info!(
                    booking_id = %booking.id,
                    provider_id = %booking.provider_id,
                    start = booking.span.start,
                    end = booking.span.end,
                    "booking created"
                );
                self.notify_user(Notification {
                    user_id: booking.patient_id,
                    channel: Channel::Email,
                    message: format!("booking {} received, awaiting confirmation", booking.id),
                });
            }
            Err(e) => debug!(outcome, "booking rejected: {e}"),
        }
        result
    }

    async fn arbitrate(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        if let Some(ref notes) = request.notes
            && notes.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let start = parse_instant(&request.start_time)?.timestamp_millis();
        let provider_id = request.provider_id;

        let guard = self.lock_provider(provider_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many bookings on provider"));
        }

        let service = guard
            .service(request.service_id)
            .cloned()
            .ok_or(EngineError::ServiceNotFound(request.service_id))?;
        let end = start + i64::from(service.duration_minutes) * MS_PER_MINUTE;
        let span = Span::new(start, end);
        validate_span(&span)?;

        let unavailable = || EngineError::ProviderUnavailable { provider_id, start, end };
        let (date, from, to) =
            wall_clock_interval(&span, self.settings.utc_offset).ok_or_else(unavailable)?;
        let availability_id = find_covering_window(&guard, date, from, to).ok_or_else(unavailable)?;

        check_no_conflict(&guard, &span)?;

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            patient_id: request.patient_id,
            provider_id,
            service_id: service.id,
            availability_id: Some(availability_id),
            span,
            status: BookingStatus::Pending,
            notes: request.notes,
            amount_cents: service.price_cents,
            payment_status: PaymentStatus::Unpaid,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(guard, event).await?;
        Ok(booking)
    }

    pub async fn confirm_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.advance_booking(id, BookingAction::Confirm).await
    }

    pub async fn complete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.advance_booking(id, BookingAction::Complete).await
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.advance_booking(id, BookingAction::Cancel).await
    }

    async fn advance_booking(&self, id: Ulid, action: BookingAction) -> Result<Booking, EngineError> {
        let guard = self.resolve_entity_write("booking", id).await?;
        let current = guard
            .booking(id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound("booking", id))?;
        let next = transition(current, action).inspect_err(|e| {
            debug!(booking_id = %id, "transition rejected: {e}");
        })?;

        let event = Event::BookingStatusChanged {
            id,
            provider_id: guard.id,
            status: next,
            at: now_ms(),
        };
        let guard = self.persist_and_apply(guard, event).await?;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))?;
        drop(guard);

        metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "to" => next.as_str()).increment(1);
        info!(booking_id = %id, from = %current, to = %next, %action, "booking status changed");
        self.notify_user(Notification {
            user_id: booking.patient_id,
            channel: Channel::Email,
            message: format!("booking {id} is now {next}"),
        });
        Ok(booking)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event set that recreates the current state.
    ///
    /// Registration and every provider's lock are held until the new file is in
    /// place, so no write can land between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let mut ids: Vec<Ulid> = self.providers.iter().map(|e| *e.key()).collect();
        ids.sort();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ps) = self.get_provider(&id) {
                guards.push(ps.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for ps in &guards {
            events.push(Event::ProviderRegistered {
                id: ps.id,
                name: ps.name.clone(),
            });
            for service in &ps.services {
                events.push(Event::ServiceRegistered { service: service.clone() });
            }
            for window in &ps.windows {
                events.push(Event::AvailabilityCreated { availability: window.clone() });
            }
            for booking in &ps.bookings {
                events.push(Event::BookingCreated { booking: booking.clone() });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()));

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => status).increment(1);
        if result.is_ok() {
            info!(events = count, "WAL compacted");
        }
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
