//! End-to-end fetch pipeline tests against a scripted market source

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Europe::Stockholm;
use chrono_tz::Tz;
use elspot::error::ElspotError;
use elspot::freshness::has_new_price_info;
use elspot::history::MovingAverageStore;
use elspot::market::{
    DayData, DayEntry, DayPrices, DayQuery, ERR_NO_PRICES, ERR_NOT_CONNECTED, FetchParams,
    MarketApi, fetch_price_info, recalculate_from_raw,
};
use elspot::state::{PriceLevel, Resolution};
use elspot::storage::{BlobStore, FileBlobStore, HISTORY_BLOB_KEY};

/// Counts writes so tests can assert the no-op path really skips them
struct CountingStore<S: BlobStore> {
    inner: S,
    saves: std::sync::atomic::AtomicUsize,
}

impl<S: BlobStore> CountingStore<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            saves: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl<S: BlobStore> BlobStore for CountingStore<S> {
    fn load(&self, key: &str) -> elspot::Result<Option<Vec<u8>>> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, bytes: &[u8]) -> elspot::Result<()> {
        self.saves
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.save(key, bytes)
    }

    fn clear(&self) -> elspot::Result<()> {
        self.inner.clear()
    }
}

enum DayScript {
    Data(Vec<DayEntry>),
    Empty,
    Fail(&'static str),
}

struct ScriptedMarket {
    reachable: bool,
    today: NaiveDate,
    today_script: DayScript,
    tomorrow_script: DayScript,
}

impl MarketApi for ScriptedMarket {
    async fn fetch_day(&self, query: &DayQuery<'_>) -> elspot::Result<DayPrices> {
        let script = if query.date == self.today {
            &self.today_script
        } else {
            &self.tomorrow_script
        };
        match script {
            DayScript::Data(entries) => Ok(DayPrices::Data(DayData {
                currency: Some("SEK".to_string()),
                entries: entries.clone(),
            })),
            DayScript::Empty => Ok(DayPrices::Empty),
            DayScript::Fail(msg) => Err(ElspotError::network(*msg)),
        }
    }

    async fn is_reachable(&self) -> bool {
        self.reachable
    }
}

fn params() -> FetchParams {
    FetchParams {
        area: "SE3".to_string(),
        currency: "SEK".to_string(),
        resolution: Resolution::Hour,
        vat_percent: 25.0,
        fixed_cost_minor_per_kwh: 0.0,
    }
}

/// 24 hourly entries for a local calendar day, priced per MWh
fn hourly_entries(date: NaiveDate, raw_per_mwh: &dyn Fn(u32) -> f64) -> Vec<DayEntry> {
    (0..24)
        .filter_map(|h| {
            let naive = date.and_hms_opt(h, 0, 0)?;
            let local = Stockholm.from_local_datetime(&naive).single()?;
            Some(DayEntry {
                delivery_start_utc: local.with_timezone(&Utc).to_rfc3339(),
                raw_price_per_mwh: raw_per_mwh(h),
            })
        })
        .collect()
}

fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
    Stockholm
        .with_ymd_and_hms(y, mo, d, h, mi, 0)
        .single()
        .unwrap()
}

fn two_day_market(today: NaiveDate, tomorrow: NaiveDate) -> ScriptedMarket {
    // Flat 800 SEK/MWh with one expensive evening hour today
    ScriptedMarket {
        reachable: true,
        today,
        today_script: DayScript::Data(hourly_entries(today, &|h| {
            if h == 18 { 3000.0 } else { 800.0 }
        })),
        tomorrow_script: DayScript::Data(hourly_entries(tomorrow, &|_| 800.0)),
    }
}

#[tokio::test]
async fn full_pipeline_builds_classified_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileBlobStore::new(tmp.path());
    let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let tomorrow = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
    let market = two_day_market(today, tomorrow);

    let state = fetch_price_info(&market, &store, &params(), local(2025, 3, 1, 12, 30)).await;

    assert!(state.ok);
    assert!(state.error.is_empty());
    assert_eq!(state.count(), 48);
    assert_eq!(state.currency, "SEK");

    // 800 SEK/MWh -> 0.8/kWh -> 1.0 with 25% VAT
    assert_eq!(state.current_index, Some(12));
    assert_eq!(state.current.starts_at, "2025-03-01T12:00");
    assert!((state.current.price - 1.0).abs() < 1e-9);

    // Average over 47 normal + 1 outlier raw samples, formula-adjusted
    let expected_avg = ((47.0 * 0.8 + 3.0) / 48.0) * 1.25;
    let avg = state.running_average.unwrap();
    assert!((avg - expected_avg).abs() < 1e-6);

    // Normal hours sit just above 0.90x the average; the outlier is way out
    assert_eq!(state.points[12].level, PriceLevel::Normal);
    assert_eq!(state.points[18].level, PriceLevel::VeryExpensive);
    assert!((state.points[18].price - 3.75).abs() < 1e-9);

    // Raw prices are retained for later recalculation
    assert!(state.points.iter().all(|p| p.raw_price.is_some()));
}

#[tokio::test]
async fn repeated_fetch_is_unchanged_and_history_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CountingStore::new(FileBlobStore::new(tmp.path()));
    let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let tomorrow = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
    let market = two_day_market(today, tomorrow);
    let now = local(2025, 3, 1, 14, 0);

    let first = fetch_price_info(&market, &store, &params(), now).await;
    let saves_after_first = store.save_count();
    assert!(saves_after_first > 0);

    let second = fetch_price_info(&market, &store, &params(), now).await;

    assert!(!has_new_price_info(&second, &first));
    assert_eq!(first.running_average, second.running_average);

    // The unchanged fetch must not write to storage at all
    assert_eq!(store.save_count(), saves_after_first);

    // The watermark blocks re-ingestion of already-counted slots
    let history = MovingAverageStore::load(&store).unwrap().unwrap();
    assert_eq!(history.count, 48);
    assert_eq!(history.last_slot_key, "2025-03-02T23");
}

#[tokio::test]
async fn unreachable_market_fails_without_touching_storage() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileBlobStore::new(tmp.path());
    let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let market = ScriptedMarket {
        reachable: false,
        today,
        today_script: DayScript::Empty,
        tomorrow_script: DayScript::Empty,
    };

    let state = fetch_price_info(&market, &store, &params(), local(2025, 3, 1, 14, 0)).await;

    assert!(!state.ok);
    assert_eq!(state.error, ERR_NOT_CONNECTED);
    assert!(state.points.is_empty());
    assert!(store.load(HISTORY_BLOB_KEY).unwrap().is_none());
}

#[tokio::test]
async fn unsynced_clock_fails_before_any_query() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileBlobStore::new(tmp.path());
    let today = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
    let market = ScriptedMarket {
        reachable: true,
        today,
        today_script: DayScript::Fail("must not be queried"),
        tomorrow_script: DayScript::Fail("must not be queried"),
    };

    let boot = Stockholm.timestamp_opt(1_000, 0).single().unwrap();
    let state = fetch_price_info(&market, &store, &params(), boot).await;

    assert!(!state.ok);
    assert_eq!(state.error, "Clock not synced");
}

#[tokio::test]
async fn tomorrow_failure_keeps_todays_points() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileBlobStore::new(tmp.path());
    let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let market = ScriptedMarket {
        reachable: true,
        today,
        today_script: DayScript::Data(hourly_entries(today, &|_| 800.0)),
        tomorrow_script: DayScript::Fail("HTTP 500"),
    };

    let state = fetch_price_info(&market, &store, &params(), local(2025, 3, 1, 14, 0)).await;

    assert!(state.ok);
    assert!(state.error.is_empty());
    assert_eq!(state.count(), 24);
}

#[tokio::test]
async fn today_failure_fails_the_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileBlobStore::new(tmp.path());
    let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let tomorrow = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
    let market = ScriptedMarket {
        reachable: true,
        today,
        today_script: DayScript::Fail("HTTP 503"),
        tomorrow_script: DayScript::Data(hourly_entries(tomorrow, &|_| 800.0)),
    };

    let state = fetch_price_info(&market, &store, &params(), local(2025, 3, 1, 14, 0)).await;

    assert!(!state.ok);
    assert!(state.error.contains("HTTP 503"));
    assert!(state.points.is_empty());
}

#[tokio::test]
async fn empty_days_report_no_prices() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileBlobStore::new(tmp.path());
    let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let market = ScriptedMarket {
        reachable: true,
        today,
        today_script: DayScript::Empty,
        tomorrow_script: DayScript::Empty,
    };

    let state = fetch_price_info(&market, &store, &params(), local(2025, 3, 1, 14, 0)).await;

    assert!(!state.ok);
    assert_eq!(state.error, ERR_NO_PRICES);
}

#[tokio::test]
async fn corrupted_history_blob_resets_and_rebuilds() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileBlobStore::new(tmp.path());
    store.save(HISTORY_BLOB_KEY, b"not a history blob").unwrap();

    let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let tomorrow = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
    let market = two_day_market(today, tomorrow);

    let state = fetch_price_info(&market, &store, &params(), local(2025, 3, 1, 14, 0)).await;
    assert!(state.ok);

    // The garbage was replaced by a fresh buffer holding only this fetch
    let history = MovingAverageStore::load(&store).unwrap().unwrap();
    assert_eq!(history.count, 48);
    assert_eq!(history.resolution, Resolution::Hour);
    let expected_mean = (47.0 * 0.8 + 3.0) / 48.0;
    assert!((history.mean() - expected_mean).abs() < 1e-6);
}

#[tokio::test]
async fn recalculate_applies_new_formula_atomically() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileBlobStore::new(tmp.path());
    let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let tomorrow = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
    let market = two_day_market(today, tomorrow);
    let now = local(2025, 3, 1, 14, 0);

    let mut state = fetch_price_info(&market, &store, &params(), now).await;
    assert!((state.points[0].price - 1.0).abs() < 1e-9);

    // Dropping VAT to zero makes consumer price equal the raw price
    let mut zero_vat = params();
    zero_vat.vat_percent = 0.0;
    recalculate_from_raw(&store, &mut state, &zero_vat, now.naive_local()).unwrap();
    for point in &state.points {
        assert!((point.price - point.raw_price.unwrap()).abs() < 1e-9);
    }
    assert_eq!(state.current_index, Some(14));

    // A snapshot missing any raw price is left completely untouched
    state.points[5].raw_price = None;
    let before: Vec<f64> = state.points.iter().map(|p| p.price).collect();
    let err = recalculate_from_raw(&store, &mut state, &params(), now.naive_local());
    assert!(err.is_err());
    let after: Vec<f64> = state.points.iter().map(|p| p.price).collect();
    assert_eq!(before, after);
}
