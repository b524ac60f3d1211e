//! Clock and scheduling primitives
//!
//! Pure time arithmetic on local wall-clock time: clock validity, next
//! daily fetch, next minute boundary, resync scheduling and the missed
//! daily-update catch-up predicate. No I/O lives here.

use crate::state::PriceState;
use chrono::{DateTime, Duration, TimeZone, Timelike};

/// Epochs at or below this are an unsynchronized boot clock, not real time
pub const MIN_VALID_EPOCH: i64 = 1_700_000_000;

/// Whether an epoch timestamp comes from a synchronized clock
pub fn is_valid_clock(epoch: i64) -> bool {
    epoch > MIN_VALID_EPOCH
}

/// Next occurrence of `hour:minute` local time strictly after `now`.
/// Returns None when the clock is not yet synchronized.
pub fn next_daily_fetch<Tz: TimeZone>(
    now: &DateTime<Tz>,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Tz>> {
    if !is_valid_clock(now.timestamp()) {
        return None;
    }

    let tz = now.timezone();
    let today = now.date_naive();
    for day_offset in 0..2 {
        let date = today + Duration::days(day_offset);
        let naive = date.and_hms_opt(hour, minute, 0)?;
        // DST gaps can swallow the exact local time; take the earliest
        // valid instant at or after it.
        let candidate = match tz.from_local_datetime(&naive).earliest() {
            Some(dt) => dt,
            None => continue,
        };
        if candidate > *now {
            return Some(candidate);
        }
    }
    None
}

/// Start of the next whole minute, as an epoch timestamp
pub fn next_minute_boundary(now_epoch: i64) -> Option<i64> {
    if !is_valid_clock(now_epoch) {
        return None;
    }
    Some((now_epoch - now_epoch.rem_euclid(60)) + 60)
}

/// `now + delay`, used for resync and retry scheduling
pub fn schedule_after(now_epoch: i64, delay_secs: i64) -> Option<i64> {
    if !is_valid_clock(now_epoch) || delay_secs <= 0 {
        return None;
    }
    Some(now_epoch + delay_secs)
}

/// Whether the normal daily refresh window was missed: we are at or past
/// today's fetch cutoff and the cached snapshot has no slot dated
/// tomorrow. Self-heals after offline periods, reboots and long delays.
pub fn should_catch_up_missed_daily_update<Tz: TimeZone>(
    now: &DateTime<Tz>,
    state: &PriceState,
    hour: u32,
    minute: u32,
) -> bool {
    if !is_valid_clock(now.timestamp()) {
        return false;
    }
    if !state.ok || state.points.is_empty() {
        return false;
    }

    let past_cutoff = (now.hour(), now.minute()) >= (hour, minute);
    if !past_cutoff {
        return false;
    }

    let tomorrow = (now.date_naive() + Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    !state
        .points
        .iter()
        .any(|p| p.starts_at.starts_with(&tomorrow))
}
