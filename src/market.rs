//! Market source seam and price fetch pipeline
//!
//! [`MarketApi`] abstracts the day-ahead price source as one query per
//! calendar day with a data/empty tri-state. [`fetch_price_info`] runs
//! the today+tomorrow queries, converts units, applies the configured
//! cost formula, folds raw prices into the persisted rolling history and
//! classifies every slot against the resulting average.

use crate::classify::{MIN_MEANINGFUL_AVERAGE, apply_levels};
use crate::config::{Config, PricingConfig};
use crate::error::Result;
use crate::history::{DEFAULT_RAW_AVERAGE_PER_KWH, MovingAverageStore};
use crate::logging::get_logger;
use crate::state::{PricePoint, PriceSource, PriceState, Resolution, interval_key};
use crate::storage::BlobStore;
use chrono::{DateTime, Duration, NaiveDate};
use chrono_tz::Tz;

pub mod nordpool;

/// Major-to-minor currency unit factor; the formula works in minor units
/// to avoid accumulating bias before dividing back down
const CENTS_MULTIPLIER: f64 = 100.0;

/// Prerequisite failure messages surfaced on the snapshot
pub const ERR_NOT_CONNECTED: &str = "Network not connected";
pub const ERR_CLOCK_NOT_SYNCED: &str = "Clock not synced";
pub const ERR_NO_PRICES: &str = "No prices";

/// One calendar-day price query
#[derive(Debug, Clone)]
pub struct DayQuery<'a> {
    pub date: NaiveDate,
    pub area: &'a str,
    pub currency: &'a str,
    pub resolution: Resolution,
}

/// One raw index entry as returned by the source
#[derive(Debug, Clone)]
pub struct DayEntry {
    /// Slot start in UTC, RFC 3339
    pub delivery_start_utc: String,

    /// Market price in major currency units per MWh
    pub raw_price_per_mwh: f64,
}

/// Successful day-query payload
#[derive(Debug, Clone, Default)]
pub struct DayData {
    /// Currency confirmation from the source, if it sent one
    pub currency: Option<String>,

    pub entries: Vec<DayEntry>,
}

/// Tri-state result of a day query; errors travel through `Result`
#[derive(Debug, Clone)]
pub enum DayPrices {
    Data(DayData),
    /// The source has no prices for that day yet. Not an error:
    /// tomorrow's prices are legitimately unavailable for part of the day.
    Empty,
}

/// Day-ahead price source
pub trait MarketApi {
    /// Query one calendar day of index prices
    fn fetch_day(
        &self,
        query: &DayQuery<'_>,
    ) -> impl std::future::Future<Output = Result<DayPrices>> + Send;

    /// Cheap connectivity probe evaluated before issuing queries
    fn is_reachable(&self) -> impl std::future::Future<Output = bool> + Send {
        async { true }
    }
}

/// Normalized cost-formula and query parameters for one fetch cycle
#[derive(Debug, Clone)]
pub struct FetchParams {
    pub area: String,
    pub currency: String,
    pub resolution: Resolution,
    pub vat_percent: f64,
    pub fixed_cost_minor_per_kwh: f64,
}

impl FetchParams {
    /// Build from configuration, clamping untrusted pricing inputs
    pub fn from_config(config: &Config) -> Self {
        Self {
            area: config.market.area.clone(),
            currency: config.market.currency.clone(),
            resolution: Resolution::from_minutes(config.market.resolution_minutes),
            vat_percent: config.pricing.normalized_vat_percent(),
            fixed_cost_minor_per_kwh: config.pricing.normalized_fixed_cost_minor_per_kwh(),
        }
    }

    /// Re-derive formula parameters only, from fresh pricing config
    pub fn with_pricing(mut self, pricing: &PricingConfig) -> Self {
        self.vat_percent = pricing.normalized_vat_percent();
        self.fixed_cost_minor_per_kwh = pricing.normalized_fixed_cost_minor_per_kwh();
        self
    }
}

/// Apply the configured cost formula in minor units per kWh:
/// ((energy_major * 100) * (1 + VAT/100) + fixed_cost_minor) / 100
pub fn apply_price_formula(raw_per_kwh: f64, vat_percent: f64, fixed_cost_minor_per_kwh: f64) -> f64 {
    let vat_multiplier = 1.0 + vat_percent / 100.0;
    let energy_minor_per_kwh = raw_per_kwh * CENTS_MULTIPLIER;
    (energy_minor_per_kwh * vat_multiplier + fixed_cost_minor_per_kwh) / CENTS_MULTIPLIER
}

/// Convert a UTC RFC 3339 slot start to the local "YYYY-MM-DDTHH:MM" form
pub fn utc_iso_to_local_slot(iso_utc: &str, tz: Tz) -> Option<String> {
    let utc = DateTime::parse_from_rfc3339(iso_utc).ok()?;
    Some(utc.with_timezone(&tz).format("%Y-%m-%dT%H:%M").to_string())
}

fn add_points(data: &DayData, params: &FetchParams, tz: Tz, out: &mut PriceState) {
    if let Some(currency) = &data.currency {
        out.currency = currency.clone();
    }
    for entry in &data.entries {
        let Some(starts_at) = utc_iso_to_local_slot(&entry.delivery_start_utc, tz) else {
            continue;
        };
        // Index prices arrive per MWh; the display works per kWh
        let raw_per_kwh = entry.raw_price_per_mwh / 1000.0;
        let adjusted = apply_price_formula(
            raw_per_kwh,
            params.vat_percent,
            params.fixed_cost_minor_per_kwh,
        );
        let added = out.push_point(PricePoint {
            starts_at,
            level: crate::state::PriceLevel::Unknown,
            price: adjusted,
            raw_price: Some(raw_per_kwh),
        });
        if !added {
            return;
        }
    }
}

/// Fold every point past the watermark into the rolling history.
/// Returns whether the buffer changed (and therefore needs saving).
fn update_history_from_points(state: &PriceState, store: &mut MovingAverageStore) -> bool {
    let mut changed = false;
    for point in &state.points {
        let Some(key) = interval_key(&point.starts_at, state.resolution) else {
            continue;
        };
        if !store.is_new_slot(&key) {
            continue;
        }
        let Some(raw) = point.raw_price else {
            continue;
        };
        store.append(raw as f32);
        store.record_slot(&key);
        changed = true;
    }
    changed
}

/// Load (or reset) the history, ingest new samples, persist if changed,
/// then classify the snapshot against the formula-adjusted average and
/// resolve the current slot. Returns the history sample count.
pub fn apply_moving_average_to_state<S: BlobStore>(
    store: &S,
    state: &mut PriceState,
    params: &FetchParams,
    now_local: chrono::NaiveDateTime,
) -> u16 {
    if state.points.is_empty() {
        return 0;
    }
    let logger = get_logger("market");

    let mut history = match MovingAverageStore::load(store) {
        Ok(Some(h)) => h,
        Ok(None) => MovingAverageStore::new(),
        Err(e) => {
            // Incompatible or corrupted blob: self-heal with a reset
            logger.warn(&format!("History load failed, resetting: {}", e));
            MovingAverageStore::new()
        }
    };
    history.ensure_shape(state.resolution);

    let history_changed = update_history_from_points(state, &mut history);
    if history_changed
        && let Err(e) = history.save(store)
    {
        // Soft failure: the in-memory average stays valid for this cycle
        logger.warn(&format!("History save failed: {}", e));
    }

    let mut raw_average = history.mean();
    if raw_average <= MIN_MEANINGFUL_AVERAGE {
        raw_average = DEFAULT_RAW_AVERAGE_PER_KWH;
    }

    let mut average = apply_price_formula(
        raw_average,
        params.vat_percent,
        params.fixed_cost_minor_per_kwh,
    );
    if average <= MIN_MEANINGFUL_AVERAGE {
        average = apply_price_formula(
            DEFAULT_RAW_AVERAGE_PER_KWH,
            params.vat_percent,
            params.fixed_cost_minor_per_kwh,
        );
    }
    if average <= MIN_MEANINGFUL_AVERAGE {
        average = DEFAULT_RAW_AVERAGE_PER_KWH;
    }

    state.running_average = Some(average);
    apply_levels(state, average);
    state.assign_current_from_clock(now_local);
    history.count
}

/// Fetch today's and tomorrow's prices and build a display snapshot.
///
/// Never returns an error: every failure mode lands as a failed
/// `PriceState` with a human-readable message, so the orchestration loop
/// can apply its keep-last-good policy uniformly.
pub async fn fetch_price_info<M: MarketApi, S: BlobStore>(
    market: &M,
    store: &S,
    params: &FetchParams,
    now: DateTime<Tz>,
) -> PriceState {
    let logger = get_logger("market");
    let mut out = PriceState::for_fetch(PriceSource::NordPool, &params.currency, params.resolution);
    logger.info(&format!(
        "Fetch start: area={} currency={} resolution={} vat={:.2}% fixed_minor_kwh={:.2}",
        params.area,
        params.currency,
        params.resolution.minutes(),
        params.vat_percent,
        params.fixed_cost_minor_per_kwh,
    ));

    if !market.is_reachable().await {
        out.fail(ERR_NOT_CONNECTED);
        return out;
    }
    if !crate::schedule::is_valid_clock(now.timestamp()) {
        out.fail(ERR_CLOCK_NOT_SYNCED);
        return out;
    }

    let tz = now.timezone();
    let today = now.date_naive();
    let tomorrow = today + Duration::days(1);

    for (is_today, date) in [(true, today), (false, tomorrow)] {
        let query = DayQuery {
            date,
            area: &params.area,
            currency: &params.currency,
            resolution: params.resolution,
        };
        match market.fetch_day(&query).await {
            Ok(DayPrices::Data(data)) => add_points(&data, params, tz, &mut out),
            Ok(DayPrices::Empty) => {
                logger.debug(&format!("No prices published yet for {}", date));
            }
            Err(e) => {
                if is_today || out.points.is_empty() {
                    out.fail(&e.to_string());
                    return out;
                }
                // Tomorrow failed but today succeeded: keep what we have
                logger.warn(&format!("Tomorrow fetch failed, keeping today: {}", e));
                break;
            }
        }
    }

    if out.points.is_empty() {
        out.fail(ERR_NO_PRICES);
        return out;
    }

    let sample_count =
        apply_moving_average_to_state(store, &mut out, params, now.naive_local());

    out.ok = true;
    out.error.clear();
    logger.info(&format!(
        "Fetch OK: points={} res={} current={:.3} {} level={} ma={:.3} samples={}",
        out.count(),
        out.resolution.minutes(),
        out.current.price,
        out.currency,
        out.current.level.map_or("UNKNOWN", |l| l.as_str()),
        out.running_average.unwrap_or_default(),
        sample_count,
    ));
    out
}

/// Re-derive every point's consumer price from its stored raw price
/// under new formula parameters, without touching the network.
///
/// Atomic: fails without mutation when any point lacks a raw price.
pub fn recalculate_from_raw<S: BlobStore>(
    store: &S,
    state: &mut PriceState,
    params: &FetchParams,
    now_local: chrono::NaiveDateTime,
) -> Result<()> {
    if state.points.is_empty() {
        return Err(crate::error::ElspotError::validation(
            "points",
            "nothing to recalculate",
        ));
    }

    if let Some(idx) = state.points.iter().position(|p| p.raw_price.is_none()) {
        return Err(crate::error::ElspotError::validation(
            "raw_price",
            format!("missing raw price at index {}", idx).as_str(),
        ));
    }

    for point in &mut state.points {
        if let Some(raw) = point.raw_price {
            point.price = apply_price_formula(
                raw,
                params.vat_percent,
                params.fixed_cost_minor_per_kwh,
            );
        }
    }

    if state.ok {
        apply_moving_average_to_state(store, state, params, now_local);
    } else {
        state.assign_current_from_clock(now_local);
    }
    Ok(())
}
