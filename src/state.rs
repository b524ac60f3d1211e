//! Price data model for Elspot
//!
//! Defines the price level taxonomy, the bounded day-ahead price snapshot
//! consumed by display clients, and the slot/interval helpers shared by the
//! fetch pipeline and the orchestration loop.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Hard capacity of a price snapshot (2 days x 96 quarter-hour slots + slack)
pub const MAX_PRICE_POINTS: usize = 240;

/// Relative cheapness of one delivery slot against the rolling average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLevel {
    VeryCheap,
    Cheap,
    Normal,
    Expensive,
    VeryExpensive,
    Unknown,
}

impl PriceLevel {
    pub fn from_label(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "VERY_CHEAP" => Self::VeryCheap,
            "CHEAP" => Self::Cheap,
            "NORMAL" => Self::Normal,
            "EXPENSIVE" => Self::Expensive,
            "VERY_EXPENSIVE" => Self::VeryExpensive,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryCheap => "VERY_CHEAP",
            Self::Cheap => "CHEAP",
            Self::Normal => "NORMAL",
            Self::Expensive => "EXPENSIVE",
            Self::VeryExpensive => "VERY_EXPENSIVE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Origin of the displayed snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    #[serde(rename = "NORDPOOL")]
    NordPool,
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NordPool => "NORDPOOL",
            Self::Offline => "OFFLINE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Slot resolution. Only 15/30/60 minutes exist on the day-ahead market;
/// any other configured value normalizes to hourly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum Resolution {
    Quarter,
    Half,
    Hour,
}

impl Resolution {
    /// Total normalization: maps every input to a supported resolution
    pub fn from_minutes(minutes: u16) -> Self {
        match minutes {
            15 => Self::Quarter,
            30 => Self::Half,
            _ => Self::Hour,
        }
    }

    pub fn minutes(&self) -> u16 {
        match self {
            Self::Quarter => 15,
            Self::Half => 30,
            Self::Hour => 60,
        }
    }
}

impl From<u16> for Resolution {
    fn from(minutes: u16) -> Self {
        Self::from_minutes(minutes)
    }
}

impl From<Resolution> for u16 {
    fn from(r: Resolution) -> u16 {
        r.minutes()
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::Hour
    }
}

/// One delivery slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Local slot start, "YYYY-MM-DDTHH:MM"
    pub starts_at: String,

    /// Cheapness level relative to the rolling average
    pub level: PriceLevel,

    /// Consumer price after the cost formula, major units per kWh
    pub price: f64,

    /// Raw market price per kWh before the formula. Required for
    /// re-deriving `price` under changed formula parameters.
    pub raw_price: Option<f64>,
}

/// Denormalized copy of the slot considered "current"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentSlot {
    pub starts_at: String,
    pub level: Option<PriceLevel>,
    pub price: f64,
}

/// Full price snapshot consumed by display clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceState {
    /// Whether the snapshot carries usable data
    pub ok: bool,

    /// Human-readable fetch error, empty when ok
    pub error: String,

    /// Data source label
    pub source: PriceSource,

    /// Currency code the prices are denominated in
    pub currency: String,

    /// Slot resolution of the points
    pub resolution: Resolution,

    /// Formula-adjusted rolling average used for classification
    pub running_average: Option<f64>,

    /// Chronologically ordered slots, unique starts_at, at most
    /// [`MAX_PRICE_POINTS`] entries
    pub points: Vec<PricePoint>,

    /// Index of the slot whose interval contains "now"
    pub current_index: Option<usize>,

    /// Fast-access copy of the current slot
    pub current: CurrentSlot,
}

impl Default for PriceState {
    fn default() -> Self {
        Self {
            ok: false,
            error: String::new(),
            source: PriceSource::Unknown,
            currency: "SEK".to_string(),
            resolution: Resolution::Hour,
            running_average: None,
            points: Vec::new(),
            current_index: None,
            current: CurrentSlot::default(),
        }
    }
}

impl PriceState {
    /// Fresh snapshot for a fetch attempt against the given source
    pub fn for_fetch(source: PriceSource, currency: &str, resolution: Resolution) -> Self {
        Self {
            source,
            currency: currency.to_string(),
            resolution,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.points.len()
    }

    /// Append a point, refusing growth beyond the fixed capacity.
    /// Returns false when the snapshot is full.
    pub fn push_point(&mut self, point: PricePoint) -> bool {
        if self.points.len() >= MAX_PRICE_POINTS {
            return false;
        }
        self.points.push(point);
        true
    }

    /// Mark this snapshot failed with the given message, keeping no points
    pub fn fail(&mut self, message: &str) {
        self.ok = false;
        self.error = message.to_string();
        self.running_average = None;
        self.points.clear();
        self.current_index = None;
        self.current = CurrentSlot::default();
    }

    /// Find the index of the slot whose interval contains `now_local`
    pub fn find_current_index(&self, now_local: NaiveDateTime) -> Option<usize> {
        let slot_len = chrono::Duration::minutes(i64::from(self.resolution.minutes()));
        self.points.iter().position(|p| {
            parse_slot_start(&p.starts_at)
                .map(|start| start <= now_local && now_local < start + slot_len)
                .unwrap_or(false)
        })
    }

    /// Denormalize `points[idx]` into the current-slot fields
    pub fn set_current(&mut self, idx: usize) {
        if let Some(point) = self.points.get(idx) {
            self.current_index = Some(idx);
            self.current = CurrentSlot {
                starts_at: point.starts_at.clone(),
                level: Some(point.level),
                price: point.price,
            };
        }
    }

    /// Resolve the current slot from the clock, falling back to the first
    /// point so the display never shows an undefined slot when data exists.
    pub fn assign_current_from_clock(&mut self, now_local: NaiveDateTime) {
        if self.points.is_empty() {
            self.current_index = None;
            self.current = CurrentSlot::default();
            return;
        }
        let idx = self.find_current_index(now_local).unwrap_or(0);
        self.set_current(idx);
    }
}

/// Parse a local slot start of the form "YYYY-MM-DDTHH:MM"
pub fn parse_slot_start(starts_at: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(starts_at, "%Y-%m-%dT%H:%M").ok()
}

/// Canonical interval key for a slot start: "YYYY-MM-DDTHH" at hourly
/// resolution, "YYYY-MM-DDTHH:MM" below it. Lexicographic order equals
/// chronological order, which the ingestion watermark relies on.
pub fn interval_key(starts_at: &str, resolution: Resolution) -> Option<String> {
    let want = match resolution {
        Resolution::Hour => 13,
        Resolution::Half | Resolution::Quarter => 16,
    };
    starts_at.get(..want).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_level_mapping_roundtrip() {
        use PriceLevel::*;
        assert_eq!(PriceLevel::from_label("VERY_CHEAP"), VeryCheap);
        assert_eq!(PriceLevel::from_label("cheap"), Cheap);
        assert_eq!(PriceLevel::from_label("normal"), Normal);
        assert_eq!(PriceLevel::from_label("EXPENSIVE"), Expensive);
        assert_eq!(PriceLevel::from_label("very_expensive"), VeryExpensive);
        assert_eq!(PriceLevel::from_label("whatever"), Unknown);

        assert_eq!(VeryCheap.as_str(), "VERY_CHEAP");
        assert_eq!(Unknown.as_str(), "UNKNOWN");
    }

    #[test]
    fn resolution_normalization_is_total_and_idempotent() {
        for input in [0u16, 1, 15, 30, 45, 60, 120, u16::MAX] {
            let r = Resolution::from_minutes(input);
            assert!(matches!(r.minutes(), 15 | 30 | 60));
            assert_eq!(Resolution::from_minutes(r.minutes()), r);
        }
        assert_eq!(Resolution::from_minutes(15), Resolution::Quarter);
        assert_eq!(Resolution::from_minutes(30), Resolution::Half);
        assert_eq!(Resolution::from_minutes(17), Resolution::Hour);
    }

    #[test]
    fn push_point_respects_capacity() {
        let mut state = PriceState::default();
        for i in 0..MAX_PRICE_POINTS {
            assert!(state.push_point(PricePoint {
                starts_at: format!("2025-01-01T{:02}:00", i % 24),
                level: PriceLevel::Unknown,
                price: 1.0,
                raw_price: Some(1.0),
            }));
        }
        assert!(!state.push_point(PricePoint {
            starts_at: "2025-01-11T00:00".to_string(),
            level: PriceLevel::Unknown,
            price: 1.0,
            raw_price: Some(1.0),
        }));
        assert_eq!(state.count(), MAX_PRICE_POINTS);
    }

    #[test]
    fn interval_key_lengths() {
        assert_eq!(
            interval_key("2025-03-01T14:00", Resolution::Hour).as_deref(),
            Some("2025-03-01T14")
        );
        assert_eq!(
            interval_key("2025-03-01T14:15", Resolution::Quarter).as_deref(),
            Some("2025-03-01T14:15")
        );
        assert_eq!(interval_key("bogus", Resolution::Hour), None);
        // Multibyte garbage around the cut point must not panic
        assert_eq!(interval_key("2025-03-01Tåäö14:00", Resolution::Hour), None);
    }

    #[test]
    fn current_index_from_clock_with_fallback() {
        let mut state = PriceState::default();
        state.resolution = Resolution::Hour;
        for h in 10..14 {
            state.push_point(PricePoint {
                starts_at: format!("2025-03-01T{:02}:00", h),
                level: PriceLevel::Normal,
                price: 1.0,
                raw_price: Some(0.8),
            });
        }

        let inside = parse_slot_start("2025-03-01T12:59").unwrap();
        state.assign_current_from_clock(inside);
        assert_eq!(state.current_index, Some(2));
        assert_eq!(state.current.starts_at, "2025-03-01T12:00");

        // No interval contains "now": fall back to the first point
        let outside = parse_slot_start("2025-03-02T03:00").unwrap();
        state.assign_current_from_clock(outside);
        assert_eq!(state.current_index, Some(0));
    }
}
