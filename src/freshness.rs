//! Cache freshness and coverage comparison
//!
//! Two independent predicates guard acceptance of a freshly fetched
//! snapshot against the currently displayed one: does the fetch carry
//! anything new, and would accepting it shrink what the user sees.

use crate::state::{PricePoint, PriceState};

/// Price differences below this are floating round-trip noise
pub const PRICE_TOLERANCE: f64 = 0.0005;

fn is_same_point(lhs: &PricePoint, rhs: &PricePoint) -> bool {
    lhs.starts_at == rhs.starts_at
        && lhs.level == rhs.level
        && (lhs.price - rhs.price).abs() < PRICE_TOLERANCE
}

/// Number of distinct calendar days represented in a snapshot.
/// Points arrive in chronological order, so a day change is a new day.
pub fn day_count(state: &PriceState) -> usize {
    if !state.ok || state.points.is_empty() {
        return 0;
    }

    let mut unique_days = 0;
    let mut last_day = "";
    for point in &state.points {
        // get() rejects short and non-char-boundary prefixes alike;
        // a hand-edited cache must not be able to panic us
        let Some(day) = point.starts_at.get(..10) else {
            continue;
        };
        if day != last_day {
            last_day = day;
            unique_days += 1;
        }
    }
    unique_days
}

/// Whether the fetched snapshot differs from the current one in any
/// point's start time, level, or price beyond the tolerance
pub fn has_new_price_info(fetched: &PriceState, current: &PriceState) -> bool {
    if !fetched.ok || fetched.points.is_empty() {
        return false;
    }
    if !current.ok || current.points.is_empty() {
        return true;
    }
    if fetched.count() != current.count() {
        return true;
    }

    fetched
        .points
        .iter()
        .zip(&current.points)
        .any(|(f, c)| !is_same_point(f, c))
}

/// Whether accepting the fetched snapshot would shrink coverage, by
/// total point count or by distinct calendar days. Guards against a
/// partial upstream response silently truncating the display.
pub fn would_reduce_coverage(fetched: &PriceState, current: &PriceState) -> bool {
    if !fetched.ok || !current.ok || current.points.is_empty() {
        return false;
    }
    if fetched.count() < current.count() {
        return true;
    }
    day_count(fetched) < day_count(current)
}
