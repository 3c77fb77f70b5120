use std::net::SocketAddr;

// ── Booking arbitration ─────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (created, conflict, unavailable, rejected).
pub const BOOKINGS_TOTAL: &str = "appointly_bookings_total";

/// Histogram: create_booking latency in seconds, lock wait included.
pub const BOOKING_DURATION_SECONDS: &str = "appointly_booking_duration_seconds";

/// Counter: applied booking status transitions. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "appointly_booking_transitions_total";

/// Counter: availability window changes. Labels: op (create, update, delete).
pub const AVAILABILITY_CHANGES_TOTAL: &str = "appointly_availability_changes_total";

/// Counter: requests that gave up waiting for a provider lock.
pub const LOCK_TIMEOUTS_TOTAL: &str = "appointly_lock_timeouts_total";

/// Counter: notifications that failed after the change was committed. Labels: channel.
pub const NOTIFY_FAILURES_TOTAL: &str = "appointly_notify_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "appointly_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "appointly_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status (ok, error).
pub const WAL_COMPACTIONS_TOTAL: &str = "appointly_wal_compactions_total";

/// Gauge: registered providers.
pub const PROVIDERS_ACTIVE: &str = "appointly_providers_active";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Install the fmt subscriber, honouring `RUST_LOG`. Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
