use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use tracing::warn;

use crate::engine::EngineSettings;
use crate::limits::DEFAULT_SLOT_MINUTES;
use crate::time::MINUTES_PER_DAY;

pub const WAL_FILE_NAME: &str = "appointly.wal";

/// Process-level settings, read from `APPOINTLY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub data_dir: PathBuf,
    pub slot_minutes: u32,
    pub utc_offset_minutes: i32,
    pub lock_timeout: Duration,
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            slot_minutes: DEFAULT_SLOT_MINUTES,
            utc_offset_minutes: 0,
            lock_timeout: Duration::from_millis(5_000),
            compact_threshold: 1_000,
            compact_interval: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

/// Parse `key` if set; an unparseable value is logged and ignored.
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{key}={raw:?} is not valid, using default");
            None
        }
    }
}

impl SchedulerConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let slot_minutes = match parsed::<u32>(&lookup, "APPOINTLY_SLOT_MINUTES") {
            Some(0) => {
                warn!("APPOINTLY_SLOT_MINUTES must be positive, using default");
                defaults.slot_minutes
            }
            Some(m) => m,
            None => defaults.slot_minutes,
        };
        let utc_offset_minutes = match parsed::<i32>(&lookup, "APPOINTLY_UTC_OFFSET_MINUTES") {
            Some(m) if m.unsigned_abs() < MINUTES_PER_DAY => m,
            Some(_) => {
                warn!("APPOINTLY_UTC_OFFSET_MINUTES out of range, using UTC");
                defaults.utc_offset_minutes
            }
            None => defaults.utc_offset_minutes,
        };
        let compact_interval = match parsed::<u64>(&lookup, "APPOINTLY_COMPACT_INTERVAL_SECS") {
            Some(0) => {
                warn!("APPOINTLY_COMPACT_INTERVAL_SECS must be positive, using default");
                defaults.compact_interval
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.compact_interval,
        };

        Self {
            data_dir: lookup("APPOINTLY_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            slot_minutes,
            utc_offset_minutes,
            lock_timeout: parsed(&lookup, "APPOINTLY_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            compact_threshold: parsed(&lookup, "APPOINTLY_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval,
            metrics_port: parsed(&lookup, "APPOINTLY_METRICS_PORT"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            default_slot_minutes: self.slot_minutes,
            utc_offset: FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or(defaults.utc_offset),
            lock_timeout: self.lock_timeout,
        }
    }
}
