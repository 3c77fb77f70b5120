use crate::limits::DEFAULT_SLOT_MINUTES;
use crate::time::{generate_boundaries, TimeError, TimeOfDay};

/// Resolve a requested slot length: missing or non-positive means the default.
pub fn effective_slot_minutes(requested: Option<i64>, default: u32) -> u32 {
    let fallback = if default == 0 { DEFAULT_SLOT_MINUTES } else { default };
    match requested {
        Some(m) if m > 0 => u32::try_from(m).unwrap_or(u32::MAX),
        _ => fallback,
    }
}

/// Partition `[start, end)` into back-to-back `slot_minutes` slots.
///
/// A trailing remainder shorter than one slot is dropped, so a window shorter
/// than `slot_minutes` yields no slots at all.
pub fn generate_slots(
    start: TimeOfDay,
    end: TimeOfDay,
    slot_minutes: u32,
) -> Result<Vec<(TimeOfDay, TimeOfDay)>, TimeError> {
    let boundaries = generate_boundaries(start, end, i64::from(slot_minutes), true, true)?;
    Ok(boundaries.windows(2).map(|w| (w[0], w[1])).collect())
}

/// Does a contiguous run of `slots` (ordered by start) cover `[start, end)`?
pub fn covers(slots: &[(TimeOfDay, TimeOfDay)], start: TimeOfDay, end: TimeOfDay) -> bool {
    let Some(first) = slots.iter().position(|&(s, e)| s <= start && start < e) else {
        return false;
    };
    let mut reached = slots[first].1;
    for &(s, e) in &slots[first + 1..] {
        if reached >= end {
            break;
        }
        if s != reached {
            return false;
        }
        reached = e;
    }
    reached >= end
}
