use crate::model::Ms;

pub const DEFAULT_SLOT_MINUTES: u32 = 30;

pub const MAX_PROVIDERS: usize = 100_000;
pub const MAX_SERVICES_PER_PROVIDER: usize = 256;
pub const MAX_WINDOWS_PER_PROVIDER: usize = 1_024;
pub const MAX_BOOKINGS_PER_PROVIDER: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4_096;

/// One service can last at most a day.
pub const MAX_SERVICE_DURATION_MINUTES: u32 = 24 * 60;

/// `upcoming_slots` never expands recurring windows further than this.
pub const MAX_HORIZON_DAYS: u32 = 92;

/// Largest WAL payload replay will allocate for; anything bigger is corruption.
pub const MAX_WAL_ENTRY_BYTES: usize = 16 * 1024 * 1024;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
