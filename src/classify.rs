//! Price level classification
//!
//! Pure mapping from (price, rolling average) to a discrete cheapness
//! level. Bucket boundaries are closed on the cheap side and open on the
//! expensive side, so the five levels partition the ratio axis without
//! gaps or overlaps.

use crate::state::{PriceLevel, PriceState};

/// Averages at or below this are treated as an undefined baseline
pub const MIN_MEANINGFUL_AVERAGE: f64 = 1e-4;

/// Classify one price against the rolling average
pub fn classify_level(price: f64, moving_average: f64) -> PriceLevel {
    if moving_average <= MIN_MEANINGFUL_AVERAGE {
        return PriceLevel::Unknown;
    }

    let ratio = price / moving_average;
    if ratio <= 0.60 {
        PriceLevel::VeryCheap
    } else if ratio <= 0.90 {
        PriceLevel::Cheap
    } else if ratio < 1.15 {
        PriceLevel::Normal
    } else if ratio < 1.40 {
        PriceLevel::Expensive
    } else {
        PriceLevel::VeryExpensive
    }
}

/// Re-label every point of a snapshot against the given average
pub fn apply_levels(state: &mut PriceState, moving_average: f64) {
    for point in &mut state.points {
        point.level = classify_level(point.price, moving_average);
    }
}
