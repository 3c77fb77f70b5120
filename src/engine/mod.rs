mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod slots;
mod validator;

pub use error::{EngineError, ErrorKind, ValidationError};
pub use lifecycle::{transition, BookingAction};
pub use slots::{covers, effective_slot_minutes, generate_slots};
pub use validator::{resolve_recurrence, validate, ValidatedWindow};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinError;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::DEFAULT_SLOT_MINUTES;
use crate::model::*;
use crate::notify::{LogNotifier, Notification, Notifier, NotifyHub};
use crate::observability;
use crate::wal::Wal;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;
pub(super) type ProviderGuard = OwnedRwLockWriteGuard<ProviderState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Slot length used when a window does not ask for one.
    pub default_slot_minutes: u32,
    /// Wall clock that availability windows are declared in.
    pub utc_offset: FixedOffset,
    /// How long a write waits for its provider's lock.
    pub lock_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_slot_minutes: DEFAULT_SLOT_MINUTES,
            utc_offset: Utc.fix(),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!(events = batch.len(), "WAL flush failed: {e}");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

pub struct Engine {
    pub(super) providers: Arc<DashMap<Ulid, SharedProviderState>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) notifier: Arc<dyn Notifier>,
    /// Reverse lookup: entity (service/window/booking) id → provider id
    pub(super) entity_to_provider: Arc<DashMap<Ulid, Ulid>>,
    /// Serializes provider registration against compaction snapshots.
    pub(super) registry: Arc<Mutex<()>>,
    pub settings: EngineSettings,
}

/// Write event to WAL via the background group-commit writer.
pub(super) async fn append_event(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::Storage(e.to_string()))
}

pub(super) fn join_failed(e: JoinError) -> EngineError {
    EngineError::Storage(format!("commit task failed: {e}"))
}

/// Apply an event to a provider's state (caller holds the lock).
fn apply_to_provider(
    ps: &mut ProviderState,
    event: &Event,
    entity_map: &DashMap<Ulid, Ulid>,
    offset: FixedOffset,
) {
    match event {
        Event::ServiceRegistered { service } => {
            ps.services.retain(|s| s.id != service.id);
            ps.services.push(service.clone());
            entity_map.insert(service.id, ps.id);
        }
        Event::ServiceRemoved { id, .. } => {
            ps.services.retain(|s| s.id != *id);
            entity_map.remove(id);
        }
        Event::AvailabilityCreated { availability } | Event::AvailabilityUpdated { availability } => {
            let mut window = availability.clone();
            window.refresh_occupancy(&ps.bookings, offset);
            entity_map.insert(window.id, ps.id);
            ps.upsert_window(window);
        }
        Event::AvailabilityDeleted { id, .. } => {
            ps.remove_window(*id);
            entity_map.remove(id);
        }
        Event::BookingCreated { booking } => {
            entity_map.insert(booking.id, ps.id);
            let span = booking.span;
            ps.insert_booking(booking.clone());
            ps.refresh_occupancy_near(&span, offset);
        }
        Event::BookingStatusChanged { id, status, at, .. } => {
            let Some(booking) = ps.booking_mut(*id) else {
                return;
            };
            booking.status = *status;
            booking.updated_at = *at;
            let span = booking.span;
            ps.refresh_occupancy_near(&span, offset);
        }
        // Registration is handled at the DashMap level, not here
        Event::ProviderRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: EngineSettings, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let entity_to_provider = DashMap::new();
        let mut replayed: HashMap<Ulid, ProviderState> = HashMap::new();
        for event in &events {
            match event {
                Event::ProviderRegistered { id, name } => {
                    replayed.insert(*id, ProviderState::new(*id, name.clone()));
                }
                other => match replayed.get_mut(&other.provider_id()) {
                    Some(ps) => apply_to_provider(ps, other, &entity_to_provider, settings.utc_offset),
                    None => debug!(provider_id = %other.provider_id(), "replay: event for unknown provider skipped"),
                },
            }
        }

        let providers = Arc::new(DashMap::with_capacity(replayed.len()));
        for (id, ps) in replayed {
            providers.insert(id, Arc::new(RwLock::new(ps)));
        }
        metrics::gauge!(observability::PROVIDERS_ACTIVE).set(providers.len() as f64);

        Ok(Self {
            providers,
            wal_tx,
            notify,
            notifier: Arc::new(LogNotifier),
            entity_to_provider: Arc::new(entity_to_provider),
            registry: Arc::new(Mutex::new(())),
            settings,
        })
    }

    /// Replace the user-facing notifier (the default only logs).
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    pub fn provider_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_provider.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + broadcast. Nothing is applied if the append fails.
    ///
    /// The commit runs on its own task holding the provider lock, so a caller
    /// that stops polling cannot leave an event durable but unapplied.
    pub(super) async fn persist_and_apply(
        &self,
        mut guard: ProviderGuard,
        event: Event,
    ) -> Result<ProviderGuard, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let entity_map = self.entity_to_provider.clone();
        let notify = self.notify.clone();
        let offset = self.settings.utc_offset;
        tokio::spawn(async move {
            append_event(&wal_tx, &event).await?;
            apply_to_provider(&mut guard, &event, &entity_map, offset);
            notify.send(guard.id, &event);
            Ok::<_, EngineError>(guard)
        })
        .await
        .map_err(join_failed)?
    }

    /// Acquire a provider's write lock, giving up after `lock_timeout`.
    pub(super) async fn lock_provider(
        &self,
        provider_id: Ulid,
    ) -> Result<ProviderGuard, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound("provider", provider_id))?;
        match tokio::time::timeout(self.settings.lock_timeout, ps.write_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                warn!(%provider_id, "timed out waiting for provider lock");
                Err(EngineError::Timeout(provider_id))
            }
        }
    }

    /// Lookup entity → provider, then acquire that provider's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        kind: &'static str,
        entity_id: Ulid,
    ) -> Result<ProviderGuard, EngineError> {
        let provider_id = self
            .provider_for_entity(&entity_id)
            .ok_or(EngineError::NotFound(kind, entity_id))?;
        self.lock_provider(provider_id).await
    }

    /// Hand a user notification to the notifier in the background.
    /// Failures are logged and counted, never returned.
    pub(super) fn notify_user(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(&notification).await {
                metrics::counter!(
                    observability::NOTIFY_FAILURES_TOTAL,
                    "channel" => notification.channel.to_string()
                )
                .increment(1);
                warn!(
                    user_id = %notification.user_id,
                    channel = %notification.channel,
                    "notification delivery failed: {e}"
                );
            }
        });
    }
}
