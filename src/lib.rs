//! Appointment scheduling core: availability windows, slot generation,
//! booking arbitration and the booking lifecycle, persisted through a
//! group-commit write-ahead log.

pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod time;
pub mod wal;

pub use config::SchedulerConfig;
pub use engine::{Engine, EngineError, EngineSettings, ErrorKind, ValidationError};
