//! Orchestration loop for Elspot
//!
//! Owns the displayed price snapshot and the schedule deadlines, and
//! ties the fetch pipeline, rolling history, classifier and comparator
//! together into the runtime policy: when to fetch, when to accept a
//! result, when to retry, and when to re-evaluate the current slot.
//!
//! Single-owner, poll-driven: one task owns all mutable state and
//! performs at most one blocking operation per tick.

use crate::clock::Clock;
use crate::config::{Config, PricingConfig};
use crate::error::{ElspotError, Result};
use crate::freshness::{has_new_price_info, would_reduce_coverage};
use crate::logging::get_logger;
use crate::market::{
    ERR_NOT_CONNECTED, FetchParams, MarketApi, fetch_price_info, recalculate_from_raw,
};
use crate::schedule;
use crate::state::{PriceSource, PriceState};
use crate::storage::{self, BlobStore};
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, interval};

/// Commands accepted by the driver from external components
#[derive(Debug, Clone)]
pub enum DriverCommand {
    /// Fetch now, regardless of the daily schedule
    ForceFetch,
    /// Re-derive consumer prices from stored raw prices under new
    /// formula parameters, without a network fetch
    Recalculate(PricingConfig),
    /// Stop the loop after the current tick
    Shutdown,
}

/// Main driver: price acquisition and scheduling engine
pub struct PriceDriver<M: MarketApi, S: BlobStore, C: Clock> {
    config: Config,
    params: FetchParams,
    tz: Tz,

    market: M,
    store: S,
    clock: C,

    logger: crate::logging::StructuredLogger,

    /// The snapshot the display currently shows
    state: PriceState,

    // Schedule deadlines, epoch seconds; None until the clock is valid
    next_daily_fetch: Option<i64>,
    next_minute_boundary: Option<i64>,
    next_clock_resync: Option<i64>,

    /// Re-evaluate the catch-up predicate on the next valid-clock tick
    pending_catch_up: bool,

    last_fetch_epoch: i64,
    shutdown: bool,

    commands_rx: mpsc::UnboundedReceiver<DriverCommand>,

    /// Snapshot fan-out to display consumers
    snapshot_tx: watch::Sender<Arc<PriceState>>,
}

impl<M: MarketApi, S: BlobStore, C: Clock> PriceDriver<M, S, C> {
    /// Create a new driver instance
    pub fn new(
        config: Config,
        market: M,
        store: S,
        clock: C,
        commands_rx: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> Result<Self> {
        config.validate()?;
        crate::logging::init_logging(&config.logging)?;

        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|_| ElspotError::config(format!("bad timezone: {}", config.timezone)))?;
        let params = FetchParams::from_config(&config);

        let logger = get_logger("driver");
        logger.info(&format!(
            "Initializing spot price driver: area={} tz={} daily_fetch={:02}:{:02}",
            params.area, tz, config.schedule.daily_fetch_hour, config.schedule.daily_fetch_minute,
        ));

        let (snapshot_tx, _) = watch::channel(Arc::new(PriceState::default()));

        Ok(Self {
            config,
            params,
            tz,
            market,
            store,
            clock,
            logger,
            state: PriceState::default(),
            next_daily_fetch: None,
            next_minute_boundary: None,
            next_clock_resync: None,
            pending_catch_up: false,
            last_fetch_epoch: 0,
            shutdown: false,
            commands_rx,
            snapshot_tx,
        })
    }

    /// Subscribe to displayed-snapshot updates
    pub fn subscribe(&self) -> watch::Receiver<Arc<PriceState>> {
        self.snapshot_tx.subscribe()
    }

    /// The currently displayed snapshot
    pub fn displayed(&self) -> &PriceState {
        &self.state
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(Arc::new(self.state.clone()));
    }

    fn now_local(&self, epoch: i64) -> Option<DateTime<Tz>> {
        self.tz.timestamp_opt(epoch, 0).single()
    }

    /// Run the driver main loop
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting spot price driver main loop");
        self.startup().await;

        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms));
        loop {
            ticker.tick().await;
            self.drain_commands().await;
            if self.shutdown {
                break;
            }
            self.tick().await;
        }

        self.logger.info("Driver shutdown complete");
        Ok(())
    }

    /// Startup policy: trust a cached snapshot when possible, otherwise
    /// fetch; either way schedule a catch-up evaluation so a stale cache
    /// heals on the first valid tick.
    async fn startup(&mut self) {
        let epoch = self.clock.now_epoch();
        let mut loaded_from_cache = false;

        match storage::load_snapshot(&self.store) {
            Ok(Some(cached)) if cached.ok && !cached.points.is_empty() => {
                if cached.resolution != self.params.resolution {
                    self.logger.warn(&format!(
                        "Cached snapshot has different resolution: cache={} configured={}",
                        cached.resolution.minutes(),
                        self.params.resolution.minutes(),
                    ));
                }
                let is_current = self
                    .now_local(epoch)
                    .map(|now| {
                        storage::snapshot_is_current(
                            &cached,
                            self.params.resolution,
                            now.date_naive(),
                        )
                    })
                    .unwrap_or(false);
                self.state = cached;
                self.logger.info(&format!(
                    "Loaded {} prices from cache: points={}",
                    if is_current { "current" } else { "available" },
                    self.state.count(),
                ));
                if is_current
                    && let Err(e) = storage::save_snapshot(&self.store, &self.state)
                {
                    self.logger.warn(&format!("Snapshot cache save failed: {}", e));
                }
                self.pending_catch_up = true;
                loaded_from_cache = true;
                self.publish();
            }
            Ok(_) => {}
            Err(e) => self.logger.warn(&format!("Snapshot cache load failed: {}", e)),
        }

        if !loaded_from_cache {
            self.fetch_and_apply().await;
        }

        let epoch = self.clock.now_epoch();
        self.prime_schedules(epoch);

        if loaded_from_cache
            && let Some(now) = self.now_local(epoch)
            && schedule::should_catch_up_missed_daily_update(
                &now,
                &self.state,
                self.config.schedule.daily_fetch_hour,
                self.config.schedule.daily_fetch_minute,
            )
        {
            self.logger.info("Startup catch-up fetch scheduled immediately");
            self.next_daily_fetch = Some(epoch);
            self.pending_catch_up = false;
        }

        self.update_current_interval(epoch, true);
    }

    fn prime_schedules(&mut self, epoch: i64) {
        self.schedule_daily_fetch(epoch);
        self.next_minute_boundary = schedule::next_minute_boundary(epoch);
        self.next_clock_resync =
            schedule::schedule_after(epoch, self.config.schedule.clock_resync_interval_secs);
    }

    fn schedule_daily_fetch(&mut self, epoch: i64) {
        self.next_daily_fetch = self.now_local(epoch).and_then(|now| {
            schedule::next_daily_fetch(
                &now,
                self.config.schedule.daily_fetch_hour,
                self.config.schedule.daily_fetch_minute,
            )
        })
        .map(|dt| dt.timestamp());
        if let Some(next) = self.next_daily_fetch
            && let Some(dt) = self.now_local(next)
        {
            self.logger.info(&format!(
                "Next daily fetch scheduled: {}",
                dt.format("%d/%m %H:%M")
            ));
        }
    }

    async fn drain_commands(&mut self) {
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                DriverCommand::ForceFetch => {
                    self.logger.info("Forced fetch requested");
                    self.next_daily_fetch = Some(self.clock.now_epoch());
                }
                DriverCommand::Recalculate(pricing) => self.recalculate(&pricing),
                DriverCommand::Shutdown => {
                    self.logger.info("Shutdown requested");
                    self.shutdown = true;
                }
            }
        }
    }

    /// Apply new formula parameters to the displayed snapshot without a
    /// refetch. Atomic: a snapshot missing raw prices stays untouched.
    fn recalculate(&mut self, pricing: &PricingConfig) {
        self.params = self.params.clone().with_pricing(pricing);
        let epoch = self.clock.now_epoch();
        let Some(now) = self.now_local(epoch) else {
            return;
        };
        match recalculate_from_raw(&self.store, &mut self.state, &self.params, now.naive_local())
        {
            Ok(()) => {
                self.logger.info(&format!(
                    "Recalculated prices: vat={:.2}% fixed_minor_kwh={:.2}",
                    self.params.vat_percent, self.params.fixed_cost_minor_per_kwh,
                ));
                if self.state.ok
                    && let Err(e) = storage::save_snapshot(&self.store, &self.state)
                {
                    self.logger.warn(&format!("Snapshot cache save failed: {}", e));
                }
                self.publish();
            }
            Err(e) => self.logger.warn(&format!("Recalculate skipped: {}", e)),
        }
    }

    /// One pass of the clock-driven policy: resync, catch-up, minute
    /// boundary, daily fetch, in that order.
    async fn tick(&mut self) {
        let mut epoch = self.clock.now_epoch();
        if !schedule::is_valid_clock(epoch) {
            return;
        }

        // Recover from an error state faster than the daily cadence
        if !self.state.ok
            && epoch - self.last_fetch_epoch >= self.config.schedule.retry_on_error_secs
        {
            self.logger.info("Retry fetch due to error state");
            self.fetch_and_apply().await;
            epoch = self.clock.now_epoch();
        }

        if self.next_clock_resync.is_none() {
            self.next_clock_resync =
                schedule::schedule_after(epoch, self.config.schedule.clock_resync_interval_secs);
        }
        if self.next_clock_resync.is_some_and(|due| epoch >= due) {
            epoch = self.resync_clock(epoch).await;
        }

        if self.pending_catch_up {
            self.pending_catch_up = false;
            if let Some(now) = self.now_local(epoch)
                && schedule::should_catch_up_missed_daily_update(
                    &now,
                    &self.state,
                    self.config.schedule.daily_fetch_hour,
                    self.config.schedule.daily_fetch_minute,
                )
            {
                self.logger.info("Delayed catch-up fetch scheduled immediately");
                self.next_daily_fetch = Some(epoch);
            }
        }

        if self.next_minute_boundary.is_none() {
            self.next_minute_boundary = schedule::next_minute_boundary(epoch);
        }
        if self.next_minute_boundary.is_some_and(|due| epoch >= due) {
            self.update_current_interval(epoch, false);
            self.next_minute_boundary = schedule::next_minute_boundary(epoch);
        }

        if self.next_daily_fetch.is_none() {
            self.schedule_daily_fetch(epoch);
        }
        if self.next_daily_fetch.is_some_and(|due| epoch >= due) {
            self.daily_fetch(epoch).await;
        }
    }

    /// Periodic resync; on success every derived schedule is rebuilt
    /// from the corrected time, on failure a short retry is scheduled.
    async fn resync_clock(&mut self, epoch: i64) -> i64 {
        self.logger.info("Periodic clock resync trigger");
        match self.clock.resync().await {
            Ok(synced) if schedule::is_valid_clock(synced) => {
                self.next_minute_boundary = schedule::next_minute_boundary(synced);
                self.next_clock_resync = schedule::schedule_after(
                    synced,
                    self.config.schedule.clock_resync_interval_secs,
                );
                self.update_current_interval(synced, true);
                synced
            }
            Ok(_) | Err(_) => {
                self.logger.warn("Clock resync failed, scheduling retry");
                self.next_clock_resync = schedule::schedule_after(
                    epoch,
                    self.config.schedule.clock_resync_retry_secs,
                );
                epoch
            }
        }
    }

    /// Daily fetch with the acceptance policy: reject-and-retry-soon on
    /// reduced coverage, accept on genuinely new data, no-op on
    /// unchanged data. A failed fetch never overwrites good data.
    async fn daily_fetch(&mut self, epoch: i64) {
        self.logger.info("Daily fetch trigger");
        let Some(now) = self.now_local(epoch) else {
            return;
        };
        let fetched = fetch_price_info(&self.market, &self.store, &self.params, now).await;
        self.last_fetch_epoch = self.clock.now_epoch();
        let retry = self.config.schedule.retry_unchanged_secs;

        if !fetched.ok {
            self.logger.warn(&format!(
                "Daily fetch failed ({}), retry in {} sec",
                fetched.error, retry
            ));
            self.apply_fetched(fetched);
            self.next_daily_fetch = schedule::schedule_after(epoch, retry);
            return;
        }

        if would_reduce_coverage(&fetched, &self.state) {
            self.logger.warn(&format!(
                "Daily fetch has fewer prices ({} < {}), keep existing and retry in {} sec",
                fetched.count(),
                self.state.count(),
                retry
            ));
            self.next_daily_fetch = schedule::schedule_after(epoch, retry);
            return;
        }

        if has_new_price_info(&fetched, &self.state) {
            self.logger.info("Daily fetch returned updated prices");
            self.apply_fetched(fetched);
            self.schedule_daily_fetch(epoch);
            return;
        }

        self.logger.info(&format!(
            "Daily fetch unchanged, retry in {} sec",
            retry
        ));
        self.next_daily_fetch = schedule::schedule_after(epoch, retry);
    }

    async fn fetch_and_apply(&mut self) {
        let epoch = self.clock.now_epoch();
        let fetched = match self.now_local(epoch) {
            Some(now) => fetch_price_info(&self.market, &self.store, &self.params, now).await,
            None => {
                let mut failed = PriceState::default();
                failed.fail(crate::market::ERR_CLOCK_NOT_SYNCED);
                failed
            }
        };
        self.last_fetch_epoch = self.clock.now_epoch();
        self.apply_fetched(fetched);
    }

    /// Merge a fetch result into the displayed state. Good data replaces
    /// and is cached; a failure on top of good data only updates the
    /// error message (and source, when the network is down).
    fn apply_fetched(&mut self, fetched: PriceState) {
        if fetched.ok {
            self.state = fetched;
            if let Err(e) = storage::save_snapshot(&self.store, &self.state) {
                self.logger.warn(&format!("Snapshot cache save failed: {}", e));
            }
        } else if self.state.count() > 0 {
            self.state.error = fetched.error.clone();
            if fetched.error == ERR_NOT_CONNECTED {
                self.state.source = PriceSource::Offline;
            }
        } else {
            self.state = fetched;
        }
        self.publish();
    }

    /// Re-resolve which slot is "current" from the clock; republish only
    /// when the slot actually moved (or when forced)
    fn update_current_interval(&mut self, epoch: i64, force: bool) {
        if !self.state.ok || self.state.points.is_empty() {
            return;
        }
        let Some(now) = self.now_local(epoch) else {
            return;
        };
        let Some(idx) = self.state.find_current_index(now.naive_local()) else {
            return;
        };
        if !force && self.state.current_index == Some(idx) {
            return;
        }
        self.state.set_current(idx);
        self.logger.debug(&format!(
            "Price slot update: idx={} price={:.3}",
            idx, self.state.current.price
        ));
        self.publish();
    }
}
